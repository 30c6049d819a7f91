use crate::formats::hfs0::{Hfs0ParseError, HierarchicalFileSystem};
use crate::hexstring::HexData;
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::{BinRead, BinWrite};
use snafu::{ResultExt, Snafu};

/// The 0x200-byte XCI header: an RSA-2048 signature over the remainder,
/// followed by the `"HEAD"`-tagged fields naming the root HFS0 partition by
/// absolute (media-unit) offset and size.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct XciHeader {
    pub signature: HexData<0x100>,
    #[brw(magic = b"HEAD")]
    #[brw(pad_before = 0x4)]
    pub root_partition_media_offset: u32,
    #[brw(pad_after = 0xf0)]
    pub root_partition_media_size: u32,
}

impl XciHeader {
    pub fn root_partition_offset(&self) -> u64 {
        self.root_partition_media_offset as u64 * 0x200
    }

    pub fn root_partition_size(&self) -> u64 {
        self.root_partition_media_size as u64 * 0x200
    }
}

#[derive(Debug, Snafu)]
pub enum XciParseError {
    Read { source: binrw::Error },
    Slice { source: SliceStorageError },
    Hfs0 { source: Hfs0ParseError },
}

type PartitionStorage<S> = SliceStorage<SharedStorage<S>>;

/// The game card image: a root HFS0 partition naming `update`, `normal`, and
/// `secure` sub-partitions by file, each itself an embedded HFS0 blob.
#[derive(Debug)]
pub struct GameCardImage<S: ReadableStorage> {
    storage: SharedStorage<S>,
    header: XciHeader,
    root: HierarchicalFileSystem<PartitionStorage<S>>,
}

impl<S: ReadableStorage> GameCardImage<S> {
    pub fn new(storage: S) -> Result<Self, XciParseError> {
        let storage = storage.shared();

        let header = XciHeader::read(&mut storage.clone().buf_read()).context(ReadSnafu)?;

        let root_storage = SliceStorage::new(
            storage.clone(),
            header.root_partition_offset(),
            header.root_partition_size(),
        )
        .context(SliceSnafu)?;
        let root = HierarchicalFileSystem::new(root_storage).context(Hfs0Snafu)?;

        Ok(Self {
            storage,
            header,
            root,
        })
    }

    pub fn header(&self) -> &XciHeader {
        &self.header
    }

    pub fn root(&self) -> &HierarchicalFileSystem<PartitionStorage<S>> {
        &self.root
    }

    fn named_partition(
        &self,
        name: &str,
    ) -> Result<Option<HierarchicalFileSystem<PartitionStorage<PartitionStorage<S>>>>, XciParseError>
    {
        use crate::filesystem::{ReadableFile, ReadableFileSystem};

        let Some(file) = self.root.open_file(name) else {
            return Ok(None);
        };
        let storage = file.storage().context(SliceSnafu)?;
        Ok(Some(HierarchicalFileSystem::new(storage).context(Hfs0Snafu)?))
    }

    pub fn update(
        &self,
    ) -> Result<Option<HierarchicalFileSystem<PartitionStorage<PartitionStorage<S>>>>, XciParseError>
    {
        self.named_partition("update")
    }

    pub fn normal(
        &self,
    ) -> Result<Option<HierarchicalFileSystem<PartitionStorage<PartitionStorage<S>>>>, XciParseError>
    {
        self.named_partition("normal")
    }

    pub fn secure(
        &self,
    ) -> Result<Option<HierarchicalFileSystem<PartitionStorage<PartitionStorage<S>>>>, XciParseError>
    {
        self.named_partition("secure")
    }

    pub fn raw_storage(&self) -> &SharedStorage<S> {
        &self.storage
    }
}
