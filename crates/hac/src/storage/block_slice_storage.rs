use crate::storage::{BlockStorage, FixedSizeSnafu, ReadableBlockStorage, StorageError};
use num_integer::Integer;
use snafu::Snafu;

#[derive(Snafu, Debug)]
pub enum BlockSliceStorageError {
    #[snafu(display("Offset {} is out of bounds for storage of size {}", offset, size))]
    OffsetOutOfBounds { offset: u64, size: u64 },
    #[snafu(display("Size {} is out of bounds for storage of size {}", size, storage_size))]
    SizeOutOfBounds { size: u64, storage_size: u64 },
}

#[derive(Debug)]
pub struct BlockSliceStorage<S: ReadableBlockStorage> {
    storage: S,
    block_offset: u64,
    size: u64,
}

impl<S: ReadableBlockStorage> BlockSliceStorage<S> {
    pub fn new(storage: S, block_offset: u64, size: u64) -> Result<Self, BlockSliceStorageError> {
        let storage_size = storage.get_size();
        let offset = block_offset * storage.block_size();

        if offset > storage_size {
            return OffsetOutOfBoundsSnafu {
                offset,
                size: storage_size,
            }
            .fail();
        }

        if offset + size > storage_size {
            return SizeOutOfBoundsSnafu { size, storage_size }.fail();
        }

        Ok(Self {
            storage,
            block_offset,
            size,
        })
    }
}

impl<S: ReadableBlockStorage> ReadableBlockStorage for BlockSliceStorage<S> {
    fn block_size(&self) -> u64 {
        self.storage.block_size()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_size = self.block_size();
        let max_block = Integer::div_ceil(&self.size, &block_size);
        if block_index >= max_block {
            return Err(StorageError::OutOfBounds {});
        }
        self.storage.read_block(self.block_offset + block_index, buf)
    }

    fn get_size(&self) -> u64 {
        self.size
    }

    fn read_block_bulk(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_size = self.block_size();
        let max_block = Integer::div_ceil(&self.size, &block_size);
        if block_index >= max_block {
            return Err(StorageError::OutOfBounds {});
        }
        self.storage
            .read_block_bulk(self.block_offset + block_index, buf)
    }
}

impl<S: BlockStorage> BlockStorage for BlockSliceStorage<S> {
    fn write_block(&self, _block_index: u64, _buf: &[u8]) -> Result<(), StorageError> {
        todo!()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.storage.flush()
    }

    fn set_size(&self, _new_size: u64) -> Result<(), StorageError> {
        FixedSizeSnafu {}.fail()
    }
}
