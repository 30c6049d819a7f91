mod bktr;
mod contents;
mod crypt_storage;
pub mod filesystem;
mod structs;
mod verification_storage;

use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;

use crate::crypto::keyset::KeySet;
use crate::crypto::{AesKey, AesXtsKey};
use crate::formats::nca::structs::{NcaFsHeader, NcaHeader, NcaMagic};
use crate::storage::{ReadableStorage, ReadableStorageExt, StorageError};

pub use bktr::BaseSource;
pub use contents::{
    RawDecryptedSectionStorage, RawEncryptedSectionStorage, SectionFileSystem,
    VerifiedSectionStorage,
};
pub use crypt_storage::NcaCryptStorage;
pub use structs::{NcaContentType, NcaSectionType};
pub use verification_storage::{IntegrityCheckLevel, NcaVerificationStorage};

use crate::formats::nca::contents::Body;

#[derive(Snafu, Debug)]
pub enum NcaError {
    /// NCA: Failed to read from the storage
    Storage { source: StorageError },
    /// NCA: Missing a crypto key
    MissingKey {
        source: crate::crypto::keyset::MissingKeyError,
    },
    /// NCA: Missing a title key
    MissingTitleKey {
        source: crate::crypto::keyset::MissingTitleKeyError,
    },
    /// NCA: Failed to parse the NCA header
    NcaHeaderParsing { source: binrw::Error },
    /// NCA: Failed to parse the NCA FS header for section {index}
    FsHeaderParsing { index: usize, source: binrw::Error },
    /// NCA: Failed to parse the BKTR relocation/subsection table for section {index}
    BktrParsing {
        index: usize,
        source: bktr::BktrParseError,
    },
    /// NCA: FS header hash mismatch for section {index}
    FsHeaderHashMismatch { index: usize },
    /// NCA: section {index} uses an unsupported hash type
    UnsupportedHashType { index: usize },
    /// NCA: Invalid size: expected {expected}, got {actual}
    StorageSizeMismatch { expected: u64, actual: u64 },
    /// NCA: section {index} has invalid integrity level offsets
    InvalidIntegrityLevels {
        index: usize,
        source: crate::storage::SliceStorageError,
    },
    /// NCA: section {index} contains a malformed RomFS header
    InvalidRomFs {
        index: usize,
        source: crate::formats::romfs::RomFsParseError,
    },
    /// NCA: section {index} contains a malformed PFS0 header
    InvalidPfs0 {
        index: usize,
        source: crate::formats::pfs::PfsParseError,
    },
    /// NCA: section {index} has invalid encryption type `Auto`
    InvalidEncryptionType { index: usize },
}

#[derive(Debug)]
struct AllNcaHeaders {
    pub nca_header: NcaHeader,
    pub fs_headers: [Option<NcaFsHeader>; 4],
}

impl AllNcaHeaders {
    pub fn has_rights_id(&self) -> bool {
        !self.nca_header.rights_id.is_empty()
    }

    pub fn master_key_revision(&self) -> u8 {
        std::cmp::max(
            self.nca_header.key_generation_1,
            self.nca_header.key_generation_2,
        )
        .saturating_sub(1)
    }
}

#[derive(Debug)]
enum NcaContentKeys {
    /// NCA is decrypted, no keys are needed.
    Plaintext,
    /// Keys that were decrypted from the key area for Normal crypto
    KeyArea { ctr: AesKey, xts: AesXtsKey },
    /// Decrypted key for the RightsId crypto obtained externally
    RightsId(AesKey),
}

#[derive(Debug)]
pub struct Nca<S: ReadableStorage> {
    body: Body<S>,
    headers: AllNcaHeaders,
    content_key: NcaContentKeys,
    /// Result of verifying the header's fixed-key RSA-PSS signature against
    /// the keyset's fixed modulus, or `None` if no fixed modulus was
    /// available to check against.
    fixed_key_signature_valid: Option<bool>,
    /// The signed region of the header (everything from the magic onward),
    /// kept around to verify `npdm_signature` once a caller has an NPDM's
    /// ACID modulus in hand.
    header_signed_region: [u8; NCA_HEADER_SIZE - 0x200],
}

const ALL_HEADERS_SIZE: usize = 0xc00;
const NCA_HEADER_SIZE: usize = 0x400;
const HEADER_SECTOR_SIZE: usize = 0x200;

impl<S: ReadableStorage> Nca<S> {
    pub fn new(key_set: &KeySet, storage: S) -> Result<Self, NcaError> {
        Self::new_with_key_overrides(key_set, storage, None, None)
    }

    /// Like [`Nca::new`], but lets a caller supply the title key or the
    /// decrypted content (CTR) key directly, bypassing the keyset's
    /// `title.keys` lookup and key-area decryption respectively. An explicit
    /// content key takes priority over an explicit title key, which in turn
    /// takes priority over key-area/title.keys derivation.
    pub fn new_with_key_overrides(
        key_set: &KeySet,
        storage: S,
        title_key_override: Option<crate::crypto::TitleKey>,
        content_key_override: Option<AesKey>,
    ) -> Result<Self, NcaError> {
        let (headers, is_decrypted, fixed_key_signature_valid, header_signed_region) =
            Self::parse_headers(key_set, &storage)?;

        let content_key = if is_decrypted {
            NcaContentKeys::Plaintext
        } else if let Some(key) = content_key_override {
            NcaContentKeys::RightsId(key)
        } else if let Some(title_key) = title_key_override {
            let title_kek = key_set
                .title_kek(headers.master_key_revision())
                .context(MissingKeySnafu)?;

            NcaContentKeys::RightsId(title_key.decrypt(title_kek))
        } else if headers.has_rights_id() {
            let title_key = key_set
                .title_key(&headers.nca_header.rights_id)
                .context(MissingTitleKeySnafu)?;

            let title_kek = key_set
                .title_kek(headers.master_key_revision())
                .context(MissingKeySnafu)?;

            NcaContentKeys::RightsId(title_key.decrypt(title_kek))
        } else {
            let kak = key_set
                .key_area_key(
                    headers.master_key_revision(),
                    headers.nca_header.key_area_key_index,
                )
                .context(MissingKeySnafu)?;

            let ctr = kak.decrypt_key(headers.nca_header.key_area.encrypted_ctr_key);
            let xts = kak.decrypt_xts_key(headers.nca_header.key_area.encrypted_xts_key);

            NcaContentKeys::KeyArea { ctr, xts }
        };

        let section_count = headers.fs_headers.iter().flatten().count();
        if headers.nca_header.content_type == NcaContentType::Program {
            assert!(matches!(section_count, 2 | 3)); // base NCA contain 3 sections, update NCA contain 2 sections (w/o the logo)
        } else {
            assert_eq!(section_count, 1);
        };

        let body = Body(storage.shared());

        if headers.nca_header.nca_size != body.get_size() {
            return Err(NcaError::StorageSizeMismatch {
                expected: headers.nca_header.nca_size,
                actual: body.get_size(),
            });
        }

        Ok(Self {
            body,
            headers,
            content_key,
            fixed_key_signature_valid,
            header_signed_region,
        })
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self.content_key, NcaContentKeys::Plaintext)
    }

    /// Whether the header's fixed-key RSA-PSS signature verified against the
    /// keyset's fixed modulus. `None` if no fixed modulus was available.
    pub fn fixed_key_signature_valid(&self) -> Option<bool> {
        self.fixed_key_signature_valid
    }

    pub fn master_key_revision(&self) -> u8 {
        self.headers.master_key_revision()
    }

    fn try_parse_nca_header(header: &[u8]) -> Result<NcaHeader, NcaError> {
        assert_eq!(header.len(), NCA_HEADER_SIZE);
        let mut cur = Cursor::new(header);

        let res = NcaHeader::read(&mut cur).context(NcaHeaderParsingSnafu)?;
        assert_eq!(cur.position(), NCA_HEADER_SIZE as u64);
        Ok(res)
    }

    /// Just do the decryption, don't parse the full header yet.
    #[allow(clippy::type_complexity)]
    fn parse_headers(
        key_set: &KeySet,
        storage: &S,
    ) -> Result<
        (
            AllNcaHeaders,
            bool,
            Option<bool>,
            [u8; NCA_HEADER_SIZE - 0x200],
        ),
        NcaError,
    > {
        let mut headers_data = [0; ALL_HEADERS_SIZE];
        storage.read(0, &mut headers_data).context(StorageSnafu)?;

        let (nca_header_data, fs_header_data) = headers_data.split_at_mut(NCA_HEADER_SIZE);

        let mut is_decrypted = false;

        let nca_header = if let Ok(nca_header) = Self::try_parse_nca_header(nca_header_data) {
            // if we were able to parse the NCA header, chances are it's not encrypted
            is_decrypted = true;
            nca_header
        } else {
            // else - perform the decryption
            let key = key_set.header_key().context(MissingKeySnafu)?;

            key.decrypt(nca_header_data, 0, HEADER_SECTOR_SIZE);

            let nca_header = Self::try_parse_nca_header(nca_header_data)?;

            let NcaMagic::Nca3 = nca_header.magic;
            // decrypt the rest with normal sector numbers
            key.decrypt(fs_header_data, 2, HEADER_SECTOR_SIZE);

            nca_header
        };

        let mut header_signed_region = [0u8; NCA_HEADER_SIZE - 0x200];
        header_signed_region.copy_from_slice(&nca_header_data[0x200..]);

        let fixed_key_signature_valid = if let Ok(modulus) = key_set.fixed_modulus() {
            let valid = crate::crypto::rsa2048_pss_verify(
                &header_signed_region,
                &nca_header.fixed_key_signature.0 .0,
                &modulus,
            );
            if !valid {
                tracing::warn!("NCA header fixed-key signature verification failed");
            }
            Some(valid)
        } else {
            None
        };

        let mut fs_headers = [None; 4];
        // parse the section fs headers
        for (index, data) in fs_header_data.chunks_exact(HEADER_SECTOR_SIZE).enumerate() {
            let section_entry = nca_header.section_table[index];

            if section_entry.is_enabled {
                let hash = nca_header.fs_header_hashes[index];
                hash.verify(data)
                    .map_err(|_| NcaError::FsHeaderHashMismatch { index })?;

                let mut cur = Cursor::new(data);

                fs_headers[index] =
                    Some(NcaFsHeader::read(&mut cur).context(FsHeaderParsingSnafu { index })?);
                assert_eq!(cur.position(), HEADER_SECTOR_SIZE as u64);
            }
        }

        Ok((
            AllNcaHeaders {
                nca_header,
                fs_headers,
            },
            is_decrypted,
            fixed_key_signature_valid,
            header_signed_region,
        ))
    }

    /// Verifies the header's `npdm_signature` against the modulus embedded in
    /// the given NCA's own `main.npdm` ACID. Returns `None` if the NPDM has
    /// no ACID to source a modulus from.
    pub fn verify_npdm_signature(&self, npdm: &crate::formats::npdm::Npdm) -> Option<bool> {
        let modulus = npdm.acid.as_ref()?.modulus();
        Some(crate::crypto::rsa2048_pss_verify(
            &self.header_signed_region,
            &self.headers.nca_header.npdm_signature.0 .0,
            modulus,
        ))
    }
}
impl<S: ReadableStorage> Nca<S> {
    pub fn content_type(&self) -> NcaContentType {
        self.headers.nca_header.content_type
    }
}

/// Names the firmware version range a master key revision was introduced in,
/// for the `info` action's human-readable header dump.
pub fn master_key_summary(revision: u8) -> &'static str {
    match revision {
        0 => "1.0.0-2.3.0",
        1 => "3.0.0",
        2 => "3.0.1-3.0.2",
        3 => "4.0.0-4.1.0",
        _ => "Unknown",
    }
}
