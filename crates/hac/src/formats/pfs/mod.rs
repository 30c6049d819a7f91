mod open_file;
pub mod structs;

pub use open_file::PfsOpenFileError;

use crate::filesystem::{
    Entry, ReadableDirectory, ReadableFile, ReadableFileSystem,
};
use crate::formats::npdm::{Npdm, NpdmParseError};
use crate::formats::pfs::structs::{get_string, PartitionFsHeader};
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;

#[derive(Debug, Snafu)]
pub enum PfsParseError {
    Read { source: binrw::Error },
    Slice { source: SliceStorageError },
    /// PFS0: file entry {name} has size {size}, which does not fit in a
    /// container of size {container_size}
    OversizeEntry {
        name: String,
        size: u64,
        container_size: u64,
    },
}

#[derive(Debug, Copy, Clone)]
struct FileInfo {
    offset: u64,
    size: u64,
}

#[derive(Debug)]
pub struct PartitionFileSystem<S: ReadableStorage> {
    storage: SharedStorage<S>,
    files: HashMap<String, FileInfo>,
    header_size: u64,
}

impl<S: ReadableStorage> PartitionFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, PfsParseError> {
        let storage = storage.shared();
        let container_size = storage.get_size();

        let header = PartitionFsHeader::read(&mut storage.clone().buf_read()).context(ReadSnafu)?;

        let entries_size = header.num_files as u64 * 0x18;
        let header_size = 0x10 + entries_size + header.string_table_size as u64;

        let mut files = HashMap::with_capacity(header.file_entries.len());
        for entry in &header.file_entries {
            let name = get_string(&header.string_table, entry.string_table_offset).to_string();

            // hactool rejects a file whose size is >= the whole container's
            // size, not just > it; preserved here for the same edge cases.
            if entry.size >= container_size {
                return Err(PfsParseError::OversizeEntry {
                    name,
                    size: entry.size,
                    container_size,
                });
            }

            files.insert(
                name,
                FileInfo {
                    offset: entry.offset,
                    size: entry.size,
                },
            );
        }

        Ok(Self {
            storage,
            files,
            header_size,
        })
    }

    fn file_storage(&self, info: FileInfo) -> Result<SliceStorage<SharedStorage<S>>, SliceStorageError> {
        SliceStorage::new(
            self.storage.clone(),
            self.header_size + info.offset,
            info.size,
        )
    }

    /// If this partition contains a `main.npdm` entry, parses it — the
    /// ExeFS detection spec §4.7 describes for a Program NCA's code section.
    pub fn npdm(&self) -> Option<Result<Npdm, NpdmParseError>> {
        let info = *self.files.get("main.npdm")?;
        // offset/size were already bounds-checked against the container in
        // `new`, so slicing a looked-up entry can't fail here.
        let storage = self.file_storage(info).ok()?;
        Some(Npdm::parse(&storage))
    }
}

#[derive(Debug)]
pub struct File<'a, S: ReadableStorage> {
    fs: &'a PartitionFileSystem<S>,
    filename: &'a str,
    info: FileInfo,
}

impl<'a, S: ReadableStorage> ReadableFile for File<'a, S> {
    type Storage = SliceStorage<SharedStorage<S>>;
    type Error = SliceStorageError;

    fn name(&self) -> &str {
        self.filename
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
    fs: &'a PartitionFileSystem<S>,
}

pub struct DirectoryIter<'a, S: ReadableStorage> {
    fs: &'a PartitionFileSystem<S>,
    inner: std::collections::hash_map::Iter<'a, String, FileInfo>,
}

impl<'a, S: ReadableStorage> Iterator for DirectoryIter<'a, S> {
    type Item = Entry<File<'a, S>, Directory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (filename, info) = self.inner.next()?;
        Some(Entry::File(File {
            fs: self.fs,
            filename,
            info: *info,
        }))
    }
}

impl<'a, S: ReadableStorage> ReadableDirectory for Directory<'a, S> {
    type File = File<'a, S>;
    type Iter = DirectoryIter<'a, S>;

    fn name(&self) -> &str {
        ""
    }

    fn entries(&self) -> Self::Iter {
        DirectoryIter {
            fs: self.fs,
            inner: self.fs.files.iter(),
        }
    }
}

impl<S: ReadableStorage> ReadableFileSystem for PartitionFileSystem<S> {
    type File<'a> = File<'a, S> where Self: 'a;
    type Directory<'a> = Directory<'a, S> where Self: 'a;
    type Storage = SliceStorage<SharedStorage<S>>;
    type OpenError = SliceStorageError;

    fn root(&self) -> Self::Directory<'_> {
        Directory { fs: self }
    }

    fn open_directory(&self, path: &str) -> Option<Self::Directory<'_>> {
        if path.is_empty() || path == "/" {
            Some(self.root())
        } else {
            None
        }
    }

    fn open_file(&self, path: &str) -> Option<Self::File<'_>> {
        let (filename, info) = self.files.get_key_value(path)?;
        Some(File {
            fs: self,
            filename,
            info: *info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pfs::structs::{PartitionFsEntry, PartitionFsHeader};
    use crate::storage::VecStorage;
    use binrw::BinWrite;

    fn build_pfs0(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut string_table = Vec::new();
        let mut entries = Vec::new();
        let mut data = Vec::new();

        for (name, contents) in files {
            entries.push(PartitionFsEntry {
                offset: data.len() as u64,
                size: contents.len() as u64,
                string_table_offset: string_table.len() as u32,
            });
            string_table.extend_from_slice(name.as_bytes());
            string_table.push(0);
            data.extend_from_slice(contents);
        }

        let header = PartitionFsHeader {
            num_files: entries.len() as u32,
            string_table_size: string_table.len() as u32,
            _reserved: 0,
            file_entries: entries,
            string_table,
        };

        let mut out = std::io::Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        let mut out = out.into_inner();
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn parses_files_and_reads_contents() {
        let raw = build_pfs0(&[("hello.txt", b"hi there"), ("empty.bin", b"")]);
        let fs = PartitionFileSystem::new(VecStorage::new(raw)).unwrap();

        let file = fs.open_file("hello.txt").unwrap();
        assert_eq!(file.size(), 8);
        let storage = file.storage().unwrap();
        let mut buf = vec![0; 8];
        storage.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hi there");

        let empty = fs.open_file("empty.bin").unwrap();
        assert_eq!(empty.size(), 0);

        assert!(fs.open_file("missing.txt").is_none());
    }

    #[test]
    fn root_lists_all_entries() {
        let raw = build_pfs0(&[("a", b"1"), ("b", b"22"), ("c", b"333")]);
        let fs = PartitionFileSystem::new(VecStorage::new(raw)).unwrap();

        let mut names: Vec<_> = fs
            .root()
            .entries()
            .map(|e| match e {
                Entry::File(f) => f.name().to_string(),
                Entry::Directory(_) => panic!("PFS0 has no subdirectories"),
            })
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_entry_whose_size_equals_container_size() {
        let mut raw = build_pfs0(&[("a", b"1234")]);
        let container_size = raw.len() as u64;

        // corrupt the one entry's size field (offset 0x10, the start of the
        // first PartitionFsEntry) to equal the whole container's size.
        raw[0x10..0x18].copy_from_slice(&container_size.to_le_bytes());

        let err = PartitionFileSystem::new(VecStorage::new(raw)).unwrap_err();
        assert!(matches!(
            err,
            PfsParseError::OversizeEntry { size, container_size: cs, .. }
                if size == container_size && cs == container_size
        ));
    }
}
