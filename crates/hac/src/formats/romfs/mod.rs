pub mod dictionary;
pub mod structs;
pub mod tables;

use crate::filesystem::{Entry, ReadableDirectory, ReadableFile, ReadableFileSystem};
use crate::formats::romfs::dictionary::RomFsDictionary;
use crate::formats::romfs::structs::{
    DirectoryRomEntry, FileRomEntry, FindPosition, RomFileInfo, RomFsHeader,
};
use crate::formats::romfs::tables::HierarchicalRomTables;
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum RomFsParseError {
    Read { source: binrw::Error },
    Slice { source: SliceStorageError },
}

#[derive(Debug)]
pub struct RomFileSystem<S: ReadableStorage> {
    storage: SharedStorage<S>,
    table: HierarchicalRomTables,
    data_offset: u64,
}

impl<S: ReadableStorage> RomFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, RomFsParseError> {
        let storage = storage.shared();

        let header = RomFsHeader::read(&mut storage.clone().buf_read()).context(ReadSnafu)?;

        let dir_hash_table = SliceStorage::new(
            storage.clone(),
            header.dir_hash_table_offset,
            header.dir_hash_table_size,
        )
        .context(SliceSnafu)?;
        let dir_meta_table = SliceStorage::new(
            storage.clone(),
            header.dir_meta_table_offset,
            header.dir_meta_table_size,
        )
        .context(SliceSnafu)?;
        let file_hash_table = SliceStorage::new(
            storage.clone(),
            header.file_hash_table_offset,
            header.file_hash_table_size,
        )
        .context(SliceSnafu)?;
        let file_meta_table = SliceStorage::new(
            storage.clone(),
            header.file_meta_table_offset,
            header.file_meta_table_size,
        )
        .context(SliceSnafu)?;

        let directory_table: RomFsDictionary<DirectoryRomEntry> = RomFsDictionary::from_storage(
            dir_hash_table,
            dir_meta_table,
        )
        .context(ReadSnafu)?;
        let file_table: RomFsDictionary<FileRomEntry> =
            RomFsDictionary::from_storage(file_hash_table, file_meta_table).context(ReadSnafu)?;

        Ok(Self {
            storage,
            table: HierarchicalRomTables::new(file_table, directory_table),
            data_offset: header.data_offset,
        })
    }

    fn file_storage(&self, info: RomFileInfo) -> Result<SliceStorage<SharedStorage<S>>, SliceStorageError> {
        SliceStorage::new(self.storage.clone(), self.data_offset + info.offset, info.size)
    }
}

#[derive(Debug)]
pub struct File<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    info: RomFileInfo,
}

impl<'a, S: ReadableStorage> ReadableFile for File<'a, S> {
    type Storage = SliceStorage<SharedStorage<S>>;
    type Error = SliceStorageError;

    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> u64 {
        self.info.size
    }

    fn storage(&self) -> Result<Self::Storage, Self::Error> {
        self.fs.file_storage(self.info)
    }
}

#[derive(Debug)]
pub struct Directory<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    position: FindPosition,
}

pub struct DirectoryIter<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    position: FindPosition,
    files_done: bool,
}

impl<'a, S: ReadableStorage> Iterator for DirectoryIter<'a, S> {
    type Item = Entry<File<'a, S>, Directory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.files_done {
            if let Some((name, info)) = self.fs.table.next_file(&mut self.position) {
                return Some(Entry::File(File {
                    fs: self.fs,
                    name,
                    info,
                }));
            }
            self.files_done = true;
        }

        let (name, position) = self.fs.table.next_directory(&mut self.position)?;
        Some(Entry::Directory(Directory {
            fs: self.fs,
            name,
            position,
        }))
    }
}

impl<'a, S: ReadableStorage> ReadableDirectory for Directory<'a, S> {
    type File = File<'a, S>;
    type Iter = DirectoryIter<'a, S>;

    fn name(&self) -> &str {
        self.name
    }

    fn entries(&self) -> Self::Iter {
        DirectoryIter {
            fs: self.fs,
            position: self.position,
            files_done: false,
        }
    }
}

impl<S: ReadableStorage> ReadableFileSystem for RomFileSystem<S> {
    type File<'a> = File<'a, S> where Self: 'a;
    type Directory<'a> = Directory<'a, S> where Self: 'a;
    type Storage = SliceStorage<SharedStorage<S>>;
    type OpenError = SliceStorageError;

    fn root(&self) -> Self::Directory<'_> {
        let (_, position) = self
            .table
            .get_directory("")
            .expect("RomFS root directory must exist");
        Directory {
            fs: self,
            name: "",
            position,
        }
    }

    fn open_directory(&self, path: &str) -> Option<Self::Directory<'_>> {
        let (name, position) = self.table.get_directory(path)?;
        Some(Directory {
            fs: self,
            name,
            position,
        })
    }

    fn open_file(&self, path: &str) -> Option<Self::File<'_>> {
        let (name, info) = self.table.get_file(path)?;
        Some(File {
            fs: self,
            name,
            info,
        })
    }
}
