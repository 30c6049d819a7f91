use crate::formats::romfs::structs::{RomFsEntry, RomId};
use crate::storage::{ReadableStorage, ReadableStorageExt};
use binrw::{BinRead, BinWrite};
use std::marker::PhantomData;

#[derive(BinRead)]
#[br(little)]
struct Buckets(#[br(parse_with = binrw::until_eof)] Vec<RomId>);

#[derive(BinRead)]
#[br(little)]
struct Entries(#[br(parse_with = binrw::until_eof)] Vec<u8>);

#[derive(Debug)]
pub struct RomFsDictionary<T: BinRead<Args = ()> + BinWrite<Args = ()>> {
    buckets: Vec<RomId>,
    entries: Vec<u8>,
    phantom: PhantomData<T>,
}

impl<T: BinRead<Args = ()> + BinWrite<Args = ()>> RomFsDictionary<T> {
    pub fn new(buckets: Vec<RomId>, entries: Vec<u8>) -> Self {
        Self {
            buckets,
            entries,
            phantom: PhantomData,
        }
    }

    pub fn from_storage(
        buckets: impl ReadableStorage,
        entries: impl ReadableStorage,
    ) -> Result<Self, binrw::Error> {
        let buckets = Buckets::read(&mut buckets.buf_read())?.0;
        let entries = Entries::read(&mut entries.buf_read())?.0;

        Ok(Self::new(buckets, entries))
    }

    pub fn get_offset_from_key(&self, key: RomEntryKey) -> Option<(&str, RomId)> {
        let hash = key.hash();
        let index = hash as usize % self.buckets.len();
        let mut id = self.buckets[index];

        while id.is_some() {
            let (name, entry) = self.get_entry_by_id(id);

            if entry.parent == key.parent && name == key.name {
                return Some((name, id));
            }

            id = entry.next;
        }

        None
    }

    pub fn get_entry_by_key(&self, key: RomEntryKey) -> Option<(&str, RomFsEntry<T>)> {
        let (_name, id) = self.get_offset_from_key(key)?;

        Some(self.get_entry_by_id(id))
    }

    pub fn get_entry_by_id(&self, id: RomId) -> (&str, RomFsEntry<T>) {
        assert!(id.is_some());

        let mut cur = std::io::Cursor::new(&self.entries);
        cur.set_position(id.0 as u64);

        let entry = RomFsEntry::read(&mut cur).unwrap();

        let key = &self.entries[cur.position() as usize..][..entry.key_length as usize];

        let key = std::str::from_utf8(key).expect("Invalid UTF-8 in RomFS dictionary");

        (key, entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RomEntryKey<'a> {
    pub name: &'a str,
    pub parent: RomId,
}

impl<'a> RomEntryKey<'a> {
    pub fn hash(&self) -> u32 {
        let mut hash = 123456789 ^ self.parent.0 as u32;

        for c in self.name.bytes() {
            hash = (c as u32) ^ ((hash << 27) | (hash >> 5));
        }

        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::romfs::structs::{FileRomEntry, RomFileInfo, RomFsEntry};
    use binrw::BinWrite;

    #[test]
    fn hash_is_deterministic_and_key_sensitive() {
        let key = RomEntryKey {
            name: "file.bin",
            parent: RomId(0),
        };

        assert_eq!(key.hash(), key.hash());

        let different_name = RomEntryKey {
            name: "other.bin",
            parent: RomId(0),
        };
        assert_ne!(key.hash(), different_name.hash());

        let different_parent = RomEntryKey {
            name: "file.bin",
            parent: RomId(1),
        };
        assert_ne!(key.hash(), different_parent.hash());
    }

    fn encode_entry(entry: RomFsEntry<FileRomEntry>, name: &str) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        entry.write(&mut out).unwrap();
        let mut out = out.into_inner();
        out.extend_from_slice(name.as_bytes());
        out
    }

    #[test]
    fn looks_up_single_entry_by_key() {
        let key = RomEntryKey {
            name: "file.bin",
            parent: RomId(0),
        };

        let entries = encode_entry(
            RomFsEntry {
                parent: RomId(0),
                value: FileRomEntry {
                    next_sibling: RomId::NONE,
                    info: RomFileInfo { offset: 0, size: 42 },
                },
                next: RomId::NONE,
                key_length: key.name.len() as u32,
            },
            key.name,
        );

        // a single-bucket table: the one entry is the head of its own bucket.
        let dict: RomFsDictionary<FileRomEntry> = RomFsDictionary::new(vec![RomId(0)], entries);

        let (name, entry) = dict.get_entry_by_key(key).unwrap();
        assert_eq!(name, "file.bin");
        assert_eq!(entry.value.info.size, 42);

        let missing = RomEntryKey {
            name: "missing.bin",
            parent: RomId(0),
        };
        assert!(dict.get_entry_by_key(missing).is_none());
    }
}
