use crate::formats::nca::verification_storage::{IntegrityCheckLevel, IntegrityStorageType};
use crate::storage::{ReadableBlockStorage, ReadableStorage, StorageError};
use num_integer::Integer;
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::sync::Mutex;

const DIGEST_SIZE: usize = 0x20;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BlockStatus {
    Unchecked,
    Invalid,
    Valid,
}

enum BlockBuffer<'a> {
    Borrowed(&'a mut [u8]),
    Owned(Vec<u8>),
}

impl<'a> Deref for BlockBuffer<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl<'a> DerefMut for BlockBuffer<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl<'a> Index<std::ops::Range<usize>> for BlockBuffer<'a> {
    type Output = [u8];

    fn index(&self, index: std::ops::Range<usize>) -> &[u8] {
        &self.deref()[index]
    }
}

impl<'a> IndexMut<std::ops::Range<usize>> for BlockBuffer<'a> {
    fn index_mut(&mut self, index: std::ops::Range<usize>) -> &mut [u8] {
        &mut self.deref_mut()[index]
    }
}

/// Reads a block-hashed storage, verifying each block against a digest read
/// from a parallel hash storage the first time that block is touched, and
/// caching the verdict so a block is never hashed twice.
#[derive(Debug)]
pub struct IntegrityVerificationLevelStorage<
    S: ReadableBlockStorage,
    H: ReadableStorage,
> {
    storage: S,
    hash_storage: H,
    level: IntegrityCheckLevel,
    ty: IntegrityStorageType,
    block_statuses: Mutex<Vec<BlockStatus>>,
}

impl<S: ReadableBlockStorage, H: ReadableStorage> IntegrityVerificationLevelStorage<S, H> {
    pub fn new(storage: S, hash_storage: H, level: IntegrityCheckLevel, ty: IntegrityStorageType) -> Self {
        let block_count = Integer::div_ceil(&storage.get_size(), &storage.block_size()) as usize;
        Self {
            storage,
            hash_storage,
            level,
            ty,
            block_statuses: Mutex::new(vec![BlockStatus::Unchecked; block_count]),
        }
    }
}

impl<S: ReadableBlockStorage, H: ReadableStorage> ReadableBlockStorage
    for IntegrityVerificationLevelStorage<S, H>
{
    fn block_size(&self) -> u64 {
        self.storage.block_size()
    }

    fn get_size(&self) -> u64 {
        self.storage.get_size()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_size = self.storage.block_size() as usize;
        let current_block_size = buf.len();

        let mut block_buf = if current_block_size == block_size {
            BlockBuffer::Borrowed(buf)
        } else {
            BlockBuffer::Owned(vec![0; block_size])
        };

        self.storage
            .read_block(block_index, &mut block_buf[0..current_block_size])?;

        if self.level == IntegrityCheckLevel::None {
            if let BlockBuffer::Owned(owned) = &block_buf {
                buf.copy_from_slice(&owned[0..current_block_size]);
            }
            return Ok(());
        }

        let mut statuses = self.block_statuses.lock().unwrap();
        let status = statuses[block_index as usize];

        let status = if status == BlockStatus::Unchecked {
            let bytes_to_hash: &[u8] = match self.ty {
                IntegrityStorageType::HierarchicalSha256 => &block_buf[0..current_block_size],
                IntegrityStorageType::Ivfc => {
                    if current_block_size != block_size {
                        // zero-pad the tail block before hashing
                        block_buf[current_block_size..block_size].fill(0);
                    }
                    &block_buf[0..block_size]
                }
            };

            let computed = crate::crypto::sha256(bytes_to_hash);

            let mut expected = [0u8; DIGEST_SIZE];
            self.hash_storage
                .read((block_index as u64) * DIGEST_SIZE as u64, &mut expected)?;

            let new_status = if computed == expected {
                BlockStatus::Valid
            } else {
                BlockStatus::Invalid
            };
            statuses[block_index as usize] = new_status;
            new_status
        } else {
            status
        };
        drop(statuses);

        if status == BlockStatus::Invalid && self.level == IntegrityCheckLevel::Full {
            return Err(StorageError::IntegrityCheckFailed {});
        }

        if let BlockBuffer::Owned(owned) = &block_buf {
            buf.copy_from_slice(&owned[0..current_block_size]);
        }

        Ok(())
    }
}
