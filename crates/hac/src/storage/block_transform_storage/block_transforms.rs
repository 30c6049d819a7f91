use crate::crypto::{AesKey, AesXtsKey};
use crate::hexstring::HexData;
use crate::storage::BlockTransform;
use std::sync::Arc;

/// Looks up the high 32 bits of a BKTR section's AES-CTR counter for the
/// subsection covering a given byte offset into the patch stream. Implemented
/// by the subsection table so [`AesCtrExBlockTransform`] doesn't need to know
/// about bucket-tree parsing.
pub trait CtrHighLookup: std::fmt::Debug + Send + Sync {
    fn ctr_high_at(&self, byte_offset: u64) -> u32;
}

/// CTR-mode decryption where the IV is the NCA section's base counter plus
/// the block index, matching the big-endian 128-bit counter layout NCA
/// sections use for their main body.
#[derive(Debug, Clone)]
pub struct AesCtrBlockTransform {
    key: AesKey,
    nonce: HexData<0x10>,
}

impl AesCtrBlockTransform {
    pub fn new(key: AesKey, nonce: [u8; 0x10]) -> Self {
        Self {
            key,
            nonce: HexData(nonce),
        }
    }

    fn get_ctr(&self, block_index: u64) -> [u8; 0x10] {
        let nonce = u128::from_be_bytes(self.nonce.0);
        (nonce + block_index as u128).to_be_bytes()
    }
}

impl BlockTransform for AesCtrBlockTransform {
    const BLOCK_SIZE: u64 = 0x10;

    fn transform_read(&self, block: &mut [u8], block_index: u64) {
        self.key.decrypt_ctr(block, &self.get_ctr(block_index));
    }

    fn transform_write(&self, block: &mut [u8], block_index: u64) {
        self.key.encrypt_ctr(block, &self.get_ctr(block_index));
    }
}

/// CTR-mode decryption for a BKTR (patch-romfs) section, where the upper
/// 32 bits of the counter are overridden per-subsection by the subsection
/// table rather than staying fixed for the whole section.
#[derive(Debug, Clone)]
pub struct AesCtrExBlockTransform {
    key: AesKey,
    section_counter_high: [u8; 4],
    subsections: Arc<dyn CtrHighLookup>,
}

impl AesCtrExBlockTransform {
    pub fn new(key: AesKey, nonce: [u8; 0x10], subsections: Arc<dyn CtrHighLookup>) -> Self {
        let section_counter_high = nonce[0x0..0x4].try_into().unwrap();
        Self {
            key,
            section_counter_high,
            subsections,
        }
    }

    fn get_ctr(&self, block_index: u64) -> [u8; 0x10] {
        let ctr_val = self.subsections.ctr_high_at(block_index * Self::BLOCK_SIZE);
        let mut ctr = [0u8; 0x10];
        ctr[0x0..0x4].copy_from_slice(&self.section_counter_high);
        ctr[0x4..0x8].copy_from_slice(&ctr_val.to_be_bytes());
        ctr[0x8..0x10].copy_from_slice(&(block_index as u64).to_be_bytes());
        ctr
    }
}

impl BlockTransform for AesCtrExBlockTransform {
    const BLOCK_SIZE: u64 = 0x10;

    fn transform_read(&self, block: &mut [u8], block_index: u64) {
        self.key.decrypt_ctr(block, &self.get_ctr(block_index));
    }

    fn transform_write(&self, block: &mut [u8], block_index: u64) {
        self.key.encrypt_ctr(block, &self.get_ctr(block_index));
    }
}

/// XTS-mode decryption with Nintendo's custom little-endian sector tweak,
/// used for NCA section 0 (the "exefs"/logo-embedded filesystem) on older
/// titles and for NCA header encryption itself.
#[derive(Debug, Clone)]
pub struct AesXtsBlockTransform {
    key: AesXtsKey,
    sector_size: usize,
}

impl AesXtsBlockTransform {
    pub fn new(key: AesXtsKey, sector_size: usize) -> Self {
        Self { key, sector_size }
    }
}

impl BlockTransform for AesXtsBlockTransform {
    const BLOCK_SIZE: u64 = 0x200;

    fn transform_read(&self, block: &mut [u8], block_index: u64) {
        self.key.decrypt(block, block_index as usize, self.sector_size);
    }

    fn transform_write(&self, _block: &mut [u8], _block_index: u64) {
        unimplemented!("XTS encryption is not needed by an extraction-only tool")
    }
}
