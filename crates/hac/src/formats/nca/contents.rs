use crate::crypto::AesKey;
use crate::formats::nca::bktr::{self, BaseSource};
use crate::formats::nca::filesystem::NcaFileSystem;
use crate::formats::nca::structs::{IntegrityInfo, NcaEncryptionType, NcaFormatType};
use crate::formats::nca::{
    IntegrityCheckLevel, Nca, NcaContentKeys, NcaCryptStorage, NcaError, NcaSectionType,
    NcaVerificationStorage,
};
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, StorageError,
};
use snafu::ResultExt;
use std::sync::Arc;

#[derive(Debug)]
pub struct Body<S: ReadableStorage>(SharedStorage<S>);

impl<S: ReadableStorage> ReadableStorage for Body<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.0.read(offset, buf)
    }

    fn get_size(&self) -> u64 {
        self.0.get_size()
    }
}

pub type RawEncryptedSectionStorage<S> = SliceStorage<SharedStorage<S>>;
pub type VerifiedSectionStorage<S> = NcaVerificationStorage<RawDecryptedSectionStorage<S>>;
pub type SectionFileSystem<S> = NcaFileSystem<VerifiedSectionStorage<S>>;

pub enum RawDecryptedSectionStorage<S: ReadableStorage> {
    Plain(NcaCryptStorage<RawEncryptedSectionStorage<S>>),
    Bktr(bktr::BktrStorage<RawEncryptedSectionStorage<S>, S>),
}

impl<S: ReadableStorage> ReadableStorage for RawDecryptedSectionStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        match self {
            RawDecryptedSectionStorage::Plain(s) => s.read(offset, buf),
            RawDecryptedSectionStorage::Bktr(s) => s.read(offset, buf),
        }
    }

    fn get_size(&self) -> u64 {
        match self {
            RawDecryptedSectionStorage::Plain(s) => s.get_size(),
            RawDecryptedSectionStorage::Bktr(s) => s.get_size(),
        }
    }
}

#[derive(Debug)]
pub struct SectionRange {
    offset: u64,
    size: u64,
}

impl<S: ReadableStorage> Nca<S> {
    fn get_section_range(&self, index: usize) -> Option<SectionRange> {
        let section_entry = self.headers.nca_header.section_table[index];

        if !section_entry.is_enabled {
            return None;
        }

        Some(SectionRange {
            offset: section_entry.start.into(),
            size: section_entry.size(),
        })
    }

    pub fn get_raw_encrypted_section_storage(
        &self,
        index: usize,
    ) -> Option<RawEncryptedSectionStorage<S>> {
        let section_entry = self.headers.nca_header.section_table[index];

        if !section_entry.is_enabled {
            return None;
        }

        Some(
            self.body
                .0
                .clone()
                .slice(section_entry.start.into(), section_entry.size())
                .expect("BUG: invalid section slice"),
        )
    }

    fn get_ctr_key(&self) -> AesKey {
        match self.content_key {
            NcaContentKeys::Plaintext => panic!("Attempt to get CTR key for plaintext NCA"),
            NcaContentKeys::KeyArea { ctr: key, .. } | NcaContentKeys::RightsId(key) => key,
        }
    }

    /// Reads a BKTR bucket-tree table (relocation or subsection) out of the
    /// section's raw encrypted storage. Both tables live in the clear at a
    /// fixed offset recorded in the fs header's patch info, ahead of the
    /// section's virtual (encrypted) addressable range.
    fn read_bktr_table(
        &self,
        index: usize,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, NcaError> {
        let mut buf = vec![0u8; size as usize];
        self.get_raw_encrypted_section_storage(index)
            .expect("BUG: BKTR section must have a raw storage")
            .read(offset, &mut buf)
            .context(crate::formats::nca::StorageSnafu)?;
        Ok(buf)
    }

    pub fn get_raw_decrypted_section_storage(
        &self,
        index: usize,
        base: Option<BaseSource<S>>,
    ) -> Option<Result<RawDecryptedSectionStorage<S>, NcaError>> {
        self.get_raw_encrypted_section_storage(index)
            .map(|storage| -> Result<_, NcaError> {
                let fs_header = self.headers.fs_headers[index].as_ref().unwrap();

                if self.is_plaintext() {
                    return Ok(RawDecryptedSectionStorage::Plain(
                        NcaCryptStorage::Plaintext(storage),
                    ));
                }

                let storage = match fs_header.encryption_type {
                    NcaEncryptionType::Auto => {
                        return Err(NcaError::InvalidEncryptionType { index })
                    }
                    NcaEncryptionType::None => NcaCryptStorage::Plaintext(storage),
                    NcaEncryptionType::Xts => {
                        let key = match self.content_key {
                            NcaContentKeys::KeyArea { xts, .. } => xts,
                            _ => panic!("Attempt to get XTS key for non-KeyArea NCA"),
                        };
                        NcaCryptStorage::new_xts(storage, key)
                    }
                    NcaEncryptionType::AesCtr => {
                        let key = self.get_ctr_key();
                        let start_offset =
                            self.headers.nca_header.section_table[index].start.into();

                        NcaCryptStorage::new_ctr(
                            storage,
                            key,
                            fs_header.upper_counter,
                            start_offset,
                        )
                    }
                    NcaEncryptionType::AesCtrEx => {
                        let key = self.get_ctr_key();
                        let patch_info = fs_header.patch_info;

                        let relocation_data = self.read_bktr_table(
                            index,
                            patch_info.relocation_tree_offset,
                            patch_info.relocation_tree_size,
                        )?;
                        let section_size = self.get_section_range(index).unwrap().size;
                        let relocation =
                            bktr::parse_relocation_table(&relocation_data, section_size)
                                .context(crate::formats::nca::BktrParsingSnafu { index })?;

                        let subsection_data = self.read_bktr_table(
                            index,
                            patch_info.encryption_tree_offset,
                            patch_info.encryption_tree_size,
                        )?;
                        let subsections = Arc::new(
                            bktr::parse_subsection_table(
                                &subsection_data,
                                patch_info.relocation_tree_offset,
                                (fs_header.upper_counter & 0xffff_ffff) as u32,
                            )
                            .context(crate::formats::nca::BktrParsingSnafu { index })?,
                        );

                        let patch = bktr::new_bktr_patch_storage(
                            storage,
                            key,
                            {
                                let mut nonce = [0u8; 0x10];
                                nonce[..8].copy_from_slice(&fs_header.upper_counter.to_be_bytes());
                                nonce
                            },
                            subsections,
                        );

                        return Ok(RawDecryptedSectionStorage::Bktr(bktr::BktrStorage::new(
                            patch,
                            base,
                            relocation,
                            section_size,
                        )));
                    }
                };

                Ok(RawDecryptedSectionStorage::Plain(storage))
            })
    }

    pub fn get_section_storage(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
        base: Option<BaseSource<S>>,
    ) -> Option<Result<VerifiedSectionStorage<S>, NcaError>> {
        self.get_raw_decrypted_section_storage(index, base)
            .map(|storage| {
                let storage = storage?;
                let fs_header = self.headers.fs_headers[index].as_ref().unwrap();

                Ok(match fs_header.integrity_info {
                    IntegrityInfo::None => return Err(NcaError::UnsupportedHashType { index }),
                    IntegrityInfo::Sha256(s) => {
                        assert_eq!(s.level_count, 2);
                        let levels = s.level_info[..2].try_into().unwrap();

                        NcaVerificationStorage::new_pfs_verification_storage(
                            storage,
                            s.master_hash.0 .0,
                            levels,
                            s.block_size,
                            integrity_level,
                        )
                        .context(crate::formats::nca::InvalidIntegrityLevelsSnafu { index })?
                    }
                    IntegrityInfo::Ivfc(s) => {
                        assert_eq!(s.master_hash_size, 0x20);
                        let master_hash = s.master_hash.0[..0x20].try_into().unwrap();

                        // -1 because the last level is the master hash
                        NcaVerificationStorage::new_ivfc_verification_storage(storage, master_hash, s.level_count - 1, s.level_info, integrity_level)
                            .context(crate::formats::nca::InvalidIntegrityLevelsSnafu { index })?
                    }
                })
            })
    }

    pub fn get_section_fs(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
        base: Option<BaseSource<S>>,
    ) -> Option<Result<SectionFileSystem<S>, NcaError>> {
        self.get_section_storage(index, integrity_level, base)
            .map(|storage| {
                let storage = storage?;
                let fs_header = self.headers.fs_headers[index].as_ref().unwrap();

                Ok(match fs_header.format_type {
                    NcaFormatType::Romfs => NcaFileSystem::new_romfs(storage)
                        .context(crate::formats::nca::InvalidRomFsSnafu { index })?,
                    NcaFormatType::Pfs0 => NcaFileSystem::new_pfs(storage)
                        .context(crate::formats::nca::InvalidPfs0Snafu { index })?,
                })
            })
    }

    pub fn get_section_type(&self, index: usize) -> Option<NcaSectionType> {
        use crate::formats::nca::NcaContentType::Program;
        use crate::formats::nca::NcaSectionType::{Code, Data, Logo};

        match (index, self.headers.nca_header.content_type) {
            (0, Program) => Some(Code),
            (1, Program) => Some(Data),
            (2, Program) => Some(Logo),
            (0, _) => Some(Data),
            _ => None,
        }
    }

    pub fn get_fs(
        &self,
        ty: NcaSectionType,
        integrity_level: IntegrityCheckLevel,
        base: Option<BaseSource<S>>,
    ) -> Option<Result<SectionFileSystem<S>, NcaError>> {
        let index = (0..4).find(|&i| self.get_section_type(i) == Some(ty))?;

        self.get_section_fs(index, integrity_level, base)
    }
}
