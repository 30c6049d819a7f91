pub mod structs;

use crate::filesystem::{Entry, ReadableDirectory, ReadableFile, ReadableFileSystem};
use crate::formats::hfs0::structs::{get_string, Hfs0Header};
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;

#[derive(Debug, Snafu)]
pub enum Hfs0ParseError {
    Read { source: binrw::Error },
    Slice { source: SliceStorageError },
}

#[derive(Debug, Copy, Clone)]
struct FileInfo {
    offset: u64,
    size: u64,
    hashed_size: u32,
    hash: [u8; 0x20],
}

#[derive(Debug)]
pub struct HierarchicalFileSystem<S: ReadableStorage> {
    storage: SharedStorage<S>,
    files: HashMap<String, FileInfo>,
    header_size: u64,
}

impl<S: ReadableStorage> HierarchicalFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, Hfs0ParseError> {
        let storage = storage.shared();

        let header = Hfs0Header::read(&mut storage.clone().buf_read()).context(ReadSnafu)?;

        let entries_size = header.num_files as u64 * 0x40;
        let header_size = 0x10 + entries_size + header.string_table_size as u64;

        let mut files = HashMap::with_capacity(header.file_entries.len());
        for entry in &header.file_entries {
            let name = get_string(&header.string_table, entry.string_table_offset).to_string();
            files.insert(
                name,
                FileInfo {
                    offset: entry.offset,
                    size: entry.size,
                    hashed_size: entry.hashed_size,
                    hash: entry.hash.0,
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

    /// Verifies the entry's embedded SHA-256 against the first `hashed_size`
    /// bytes of its content, as recorded in the HFS0 header (not the whole
    /// file — only a game-card partition's leading region is hashed).
    pub fn verify_entry(&self, name: &str) -> Option<bool> {
        let info = *self.files.get(name)?;
        let mut buf = vec![0u8; info.hashed_size as usize];
        self.storage
            .read(self.header_size + info.offset, &mut buf)
            .ok()?;

        use digest::Digest;
        let mut hasher = sha2::Sha256::default();
        hasher.update(&buf);
        Some(hasher.finalize().as_slice() == info.hash)
    }
}

#[derive(Debug)]
pub struct File<'a, S: ReadableStorage> {
    fs: &'a HierarchicalFileSystem<S>,
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
    fs: &'a HierarchicalFileSystem<S>,
}

pub struct DirectoryIter<'a, S: ReadableStorage> {
    fs: &'a HierarchicalFileSystem<S>,
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

impl<S: ReadableStorage> ReadableFileSystem for HierarchicalFileSystem<S> {
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
    use crate::formats::hfs0::structs::{Hfs0Entry, Hfs0Header};
    use crate::hexstring::HexData;
    use crate::storage::VecStorage;
    use binrw::BinWrite;
    use digest::Digest;

    fn build_hfs0(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut string_table = Vec::new();
        let mut entries = Vec::new();
        let mut data = Vec::new();

        for (name, contents) in files {
            let mut hasher = sha2::Sha256::default();
            hasher.update(contents);
            let digest = hasher.finalize();
            let mut hash = [0u8; 0x20];
            hash.copy_from_slice(digest.as_slice());

            entries.push(Hfs0Entry {
                offset: data.len() as u64,
                size: contents.len() as u64,
                string_table_offset: string_table.len() as u32,
                hashed_size: contents.len() as u32,
                hash: HexData(hash),
            });
            string_table.extend_from_slice(name.as_bytes());
            string_table.push(0);
            data.extend_from_slice(contents);
        }

        let header = Hfs0Header {
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
    fn verify_entry_accepts_matching_hash() {
        let raw = build_hfs0(&[("Icon.nca", b"icon-bytes")]);
        let fs = HierarchicalFileSystem::new(VecStorage::new(raw)).unwrap();

        assert_eq!(fs.verify_entry("Icon.nca"), Some(true));
        assert_eq!(fs.verify_entry("missing"), None);
    }

    #[test]
    fn verify_entry_rejects_corrupted_contents() {
        let mut raw = build_hfs0(&[("Icon.nca", b"icon-bytes")]);
        *raw.last_mut().unwrap() ^= 0xff;

        let fs = HierarchicalFileSystem::new(VecStorage::new(raw)).unwrap();
        assert_eq!(fs.verify_entry("Icon.nca"), Some(false));
    }
}
