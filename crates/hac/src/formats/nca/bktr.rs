//! Bucket-tree relocation: the virtual-to-physical indirection layered over a
//! patch NCA's RomFS section when the section's crypto type is BKTR.

use crate::crypto::AesKey;
use crate::storage::block_transforms::{AesCtrExBlockTransform, CtrHighLookup};
use crate::storage::{
    BlockAdapterStorage, BlockTransformStorage, LinearAdapterStorage, ReadableStorage,
    ReadableStorageExt, SharedStorage, StorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
struct RelocationEntry {
    virt_offset: u64,
    phys_offset: u64,
    #[br(pad_after = 8)]
    is_patch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
struct SubsectionEntry {
    offset: u64,
    ctr_val: u32,
    #[br(pad_after = 4)]
    _reserved: u32,
}

#[derive(Debug)]
pub struct RelocationTable {
    entries: Vec<RelocationEntry>,
}

impl RelocationTable {
    /// Binary search for the entry whose `[virt_offset, next.virt_offset)`
    /// range contains `v`. The caller-appended sentinel guarantees `idx + 1`
    /// is always a valid index.
    fn get_relocation(&self, v: u64) -> usize {
        match self
            .entries
            .binary_search_by_key(&v, |e| e.virt_offset)
        {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        }
    }
}

#[derive(Debug)]
pub struct SubsectionTable {
    entries: Vec<SubsectionEntry>,
}

impl SubsectionTable {
    fn get_subsection(&self, p: u64) -> usize {
        match self.entries.binary_search_by_key(&p, |e| e.offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        }
    }

    fn ctr_val_at(&self, p: u64) -> u32 {
        self.entries[self.get_subsection(p)].ctr_val
    }
}

impl CtrHighLookup for SubsectionTable {
    fn ctr_high_at(&self, byte_offset: u64) -> u32 {
        self.ctr_val_at(byte_offset)
    }
}

#[derive(Snafu, Debug)]
pub enum BktrParseError {
    Read { source: binrw::Error },
}

pub fn parse_relocation_table(
    data: &[u8],
    patch_romfs_size: u64,
) -> Result<RelocationTable, BktrParseError> {
    let mut cur = std::io::Cursor::new(data);
    let count = u32::read_le(&mut cur).context(ReadSnafu)?;
    cur.set_position(cur.position() + 12); // reserved in the bucket header

    let mut entries = Vec::with_capacity(count as usize + 1);
    for _ in 0..count {
        entries.push(RelocationEntry::read(&mut cur).context(ReadSnafu)?);
    }
    entries.push(RelocationEntry {
        virt_offset: patch_romfs_size,
        phys_offset: 0,
        is_patch: 0,
    });

    Ok(RelocationTable { entries })
}

pub fn parse_subsection_table(
    data: &[u8],
    relocation_table_offset: u64,
    base_ctr_val: u32,
) -> Result<SubsectionTable, BktrParseError> {
    let mut cur = std::io::Cursor::new(data);
    let count = u32::read_le(&mut cur).context(ReadSnafu)?;
    cur.set_position(cur.position() + 12);

    let mut entries = Vec::with_capacity(count as usize + 1);
    for _ in 0..count {
        entries.push(SubsectionEntry::read(&mut cur).context(ReadSnafu)?);
    }
    entries.push(SubsectionEntry {
        offset: relocation_table_offset,
        ctr_val: base_ctr_val,
        _reserved: 0,
    });

    Ok(SubsectionTable { entries })
}

/// The patch-side storage of a BKTR section: AES-CTR decryption where the
/// upper 4 bytes of the counter come from whichever subsection covers the
/// block being read, rather than staying fixed for the whole section.
pub type BktrPatchStorage<S> =
    LinearAdapterStorage<BlockTransformStorage<BlockAdapterStorage<S>, AesCtrExBlockTransform>>;

pub fn new_bktr_patch_storage<S: ReadableStorage>(
    storage: S,
    key: AesKey,
    nonce: [u8; 0x10],
    subsections: Arc<SubsectionTable>,
) -> BktrPatchStorage<S> {
    let block_adapter = BlockAdapterStorage::new(storage, 0x10);
    let transform = AesCtrExBlockTransform::new(key, nonce, subsections);
    LinearAdapterStorage::new(BlockTransformStorage::new(block_adapter, transform))
}

/// Either a raw base RomFS file or a recursive reference into the base NCA's
/// already-verified RomFS section — whichever the caller supplied when the
/// patch's base archive was opened.
#[derive(Debug, Clone)]
pub enum BaseSource<B: ReadableStorage> {
    Raw(SharedStorage<B>),
    BaseNcaSection(SharedStorage<B>),
}

impl<B: ReadableStorage> BaseSource<B> {
    fn storage(&self) -> &SharedStorage<B> {
        match self {
            BaseSource::Raw(s) => s,
            BaseSource::BaseNcaSection(s) => s,
        }
    }
}

/// Virtually reconstructed RomFS: reads are split at relocation-table
/// boundaries and dispatched to either the patch's decrypted storage or the
/// base archive's RomFS storage.
#[derive(Debug)]
pub struct BktrStorage<S: ReadableStorage, B: ReadableStorage> {
    patch: SharedStorage<BktrPatchStorage<S>>,
    base: Option<BaseSource<B>>,
    relocation: RelocationTable,
    size: u64,
}

impl<S: ReadableStorage, B: ReadableStorage> BktrStorage<S, B> {
    pub fn new(
        patch: BktrPatchStorage<S>,
        base: Option<BaseSource<B>>,
        relocation: RelocationTable,
        size: u64,
    ) -> Self {
        Self {
            patch: patch.shared(),
            base,
            relocation,
            size,
        }
    }
}

impl<S: ReadableStorage, B: ReadableStorage> ReadableStorage for BktrStorage<S, B> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut remaining = buf;
        let mut virt = offset;

        while !remaining.is_empty() {
            let idx = self.relocation.get_relocation(virt);
            let entry = self.relocation.entries[idx];
            let next_virt_offset = self.relocation.entries[idx + 1].virt_offset;

            let span = std::cmp::min(remaining.len() as u64, next_virt_offset - virt) as usize;
            let (head, tail) = remaining.split_at_mut(span);

            if entry.is_patch != 0 {
                let phys = entry.phys_offset + (virt - entry.virt_offset);
                self.patch.read(phys, head)?;
            } else {
                let base = self
                    .base
                    .as_ref()
                    .ok_or(StorageError::OutOfBounds {})?
                    .storage();
                let phys = entry.phys_offset + (virt - entry.virt_offset);
                base.read(phys, head)?;
            }

            virt += span as u64;
            remaining = tail;
        }

        Ok(())
    }

    fn get_size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u64, u64, u32)]) -> RelocationTable {
        RelocationTable {
            entries: entries
                .iter()
                .map(|&(virt_offset, phys_offset, is_patch)| RelocationEntry {
                    virt_offset,
                    phys_offset,
                    is_patch,
                })
                .collect(),
        }
    }

    #[test]
    fn get_relocation_finds_containing_entry() {
        // three real entries plus the size sentinel appended by the parser
        let t = table(&[(0, 0, 1), (0x100, 0, 0), (0x300, 0x100, 1), (0x400, 0, 0)]);

        assert_eq!(t.get_relocation(0), 0);
        assert_eq!(t.get_relocation(0xff), 0);
        assert_eq!(t.get_relocation(0x100), 1);
        assert_eq!(t.get_relocation(0x2ff), 1);
        assert_eq!(t.get_relocation(0x300), 2);
        assert_eq!(t.get_relocation(0x3ff), 2);
    }

    fn sub_table(entries: &[(u64, u32)]) -> SubsectionTable {
        SubsectionTable {
            entries: entries
                .iter()
                .map(|&(offset, ctr_val)| SubsectionEntry {
                    offset,
                    ctr_val,
                    _reserved: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn ctr_val_at_uses_the_right_subsection() {
        let t = sub_table(&[(0, 1), (0x200, 2), (0x600, 3), (0x800, 0)]);

        assert_eq!(t.ctr_val_at(0), 1);
        assert_eq!(t.ctr_val_at(0x1ff), 1);
        assert_eq!(t.ctr_val_at(0x200), 2);
        assert_eq!(t.ctr_val_at(0x5ff), 2);
        assert_eq!(t.ctr_val_at(0x600), 3);
        assert_eq!(t.ctr_val_at(0x7ff), 3);
    }

    #[test]
    fn parse_relocation_table_appends_size_sentinel() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // count
        data.extend_from_slice(&[0u8; 12]); // reserved
        data.extend_from_slice(&0u64.to_le_bytes()); // virt_offset
        data.extend_from_slice(&0u64.to_le_bytes()); // phys_offset
        data.extend_from_slice(&1u32.to_le_bytes()); // is_patch
        data.extend_from_slice(&[0u8; 8]); // pad_after

        let table = parse_relocation_table(&data, 0x1000).unwrap();
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[1].virt_offset, 0x1000);
        assert_eq!(table.get_relocation(0x500), 0);
    }
}
