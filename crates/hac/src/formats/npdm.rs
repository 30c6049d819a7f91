//! NPDM (Nintendo Program Descriptor Meta): the access-control/process
//! metadata file embedded as `main.npdm` in a Program NCA's code section.
//!
//! A well-formed NPDM carries an ACID (Access Control Info Descriptor) whose
//! embedded RSA modulus is used elsewhere to verify the NCA header's
//! `npdm_signature` field; the ACID itself is signed by a fixed Nintendo key
//! so that embedded modulus can be trusted in the first place.

use crate::crypto::keyset::{KeySet, MissingKeyError};
use crate::hexstring::HexData;
use crate::storage::{ReadableStorage, ReadableStorageExt, StorageError};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead)]
enum MetaMagic {
    #[br(magic = b"META")]
    Meta,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead)]
enum Aci0Magic {
    #[br(magic = b"ACI0")]
    Aci0,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead)]
enum AcidMagic {
    #[br(magic = b"ACID")]
    Acid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
struct NpdmHeader {
    magic: MetaMagic,
    #[br(pad_before = 0x8)]
    mmu_flags: u8,
    #[br(pad_before = 1)]
    main_thread_priority: u8,
    main_thread_core_number: u8,
    #[br(pad_before = 4)]
    system_resource_size: u32,
    version: u32,
    main_thread_stack_size: u32,
    title_name: HexData<0x10>,
    product_code: HexData<0x10>,
    #[br(pad_before = 0x30)]
    aci_offset: u32,
    aci_size: u32,
    acid_offset: u32,
    acid_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
struct Aci0Header {
    magic: Aci0Magic,
    #[br(pad_before = 0xc)]
    program_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
struct AcidHeader {
    signature: HexData<0x100>,
    modulus: HexData<0x100>,
    magic: AcidMagic,
    #[br(pad_before = 4)]
    flags: u32,
    #[br(pad_before = 4)]
    program_id_min: u64,
    program_id_max: u64,
}

#[derive(Debug, Snafu)]
pub enum NpdmParseError {
    Storage { source: StorageError },
    Read { source: binrw::Error },
}

/// The parsed ACID (Access Control Info Descriptor): a signed policy
/// envelope carrying the RSA modulus used to verify the owning NCA header's
/// `npdm_signature`.
#[derive(Debug)]
pub struct Acid {
    modulus: [u8; 0x100],
    flags: u32,
    program_id_min: u64,
    program_id_max: u64,
    signature: [u8; 0x100],
    signed_region: Vec<u8>,
}

impl Acid {
    pub fn modulus(&self) -> &[u8; 0x100] {
        &self.modulus
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn program_id_range(&self) -> (u64, u64) {
        (self.program_id_min, self.program_id_max)
    }

    /// Verifies the ACID's own signature against the keyset's fixed ACID
    /// modulus, confirming the embedded modulus was actually issued by
    /// Nintendo rather than forged by whoever built the NCA.
    pub fn verify_signature(&self, key_set: &KeySet) -> Result<bool, MissingKeyError> {
        let modulus = key_set.acid_fixed_modulus()?;
        Ok(crate::crypto::rsa2048_pss_verify(
            &self.signed_region,
            &self.signature,
            &modulus,
        ))
    }
}

#[derive(Debug)]
pub struct Npdm {
    pub title_name: String,
    pub product_code: String,
    pub program_id: u64,
    pub acid: Option<Acid>,
}

impl Npdm {
    pub fn parse(storage: &impl ReadableStorage) -> Result<Self, NpdmParseError> {
        let data = storage.read_all().context(StorageSnafu)?;

        let header = NpdmHeader::read(&mut Cursor::new(&data)).context(ReadSnafu)?;

        let aci = Aci0Header::read(&mut Cursor::new(&data[header.aci_offset as usize..]))
            .context(ReadSnafu)?;

        let acid = if header.acid_size > 0 {
            let acid_data = &data[header.acid_offset as usize..];
            let acid = AcidHeader::read(&mut Cursor::new(acid_data)).context(ReadSnafu)?;
            let signed_region = acid_data[0x100..header.acid_size as usize].to_vec();

            Some(Acid {
                modulus: acid.modulus.0,
                flags: acid.flags,
                program_id_min: acid.program_id_min,
                program_id_max: acid.program_id_max,
                signature: acid.signature.0,
                signed_region,
            })
        } else {
            None
        };

        Ok(Self {
            title_name: null_padded_string(&header.title_name.0),
            product_code: null_padded_string(&header.product_code.0),
            program_id: aci.program_id,
            acid,
        })
    }
}

fn null_padded_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    fn build_npdm(program_id: u64, acid_modulus: [u8; 0x100]) -> Vec<u8> {
        let aci_offset = 0x100u32;
        let acid_offset = 0x200u32;
        let acid_size = 0x300u32;

        let mut header = Vec::new();
        header.extend_from_slice(b"META");
        header.extend_from_slice(&[0u8; 8]); // signature key generation + reserved
        header.push(1); // mmu_flags: 64-bit
        header.push(0);
        header.push(20); // main_thread_priority
        header.push(0); // main_thread_core_number
        header.extend_from_slice(&[0u8; 4]);
        header.extend_from_slice(&0u32.to_le_bytes()); // system_resource_size
        header.extend_from_slice(&0u32.to_le_bytes()); // version
        header.extend_from_slice(&0x1000u32.to_le_bytes()); // main_thread_stack_size
        header.extend_from_slice(b"title\0\0\0\0\0\0\0\0\0\0\0"); // title_name
        header.extend_from_slice(&[0u8; 0x10]); // product_code
        header.extend_from_slice(&[0u8; 0x30]);
        header.extend_from_slice(&aci_offset.to_le_bytes());
        header.extend_from_slice(&0x100u32.to_le_bytes()); // aci_size
        header.extend_from_slice(&acid_offset.to_le_bytes());
        header.extend_from_slice(&acid_size.to_le_bytes());

        let mut out = header;
        out.resize(aci_offset as usize, 0);
        out.extend_from_slice(b"ACI0");
        out.extend_from_slice(&[0u8; 0xc]);
        out.extend_from_slice(&program_id.to_le_bytes());

        out.resize(acid_offset as usize, 0);
        out.extend_from_slice(&[0xaau8; 0x100]); // signature
        out.extend_from_slice(&acid_modulus); // modulus
        out.extend_from_slice(b"ACID");
        out.extend_from_slice(&[0u8; 4]); // size (unused by the parser)
        out.extend_from_slice(&0u32.to_le_bytes()); // flags
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&1u64.to_le_bytes()); // program_id_min
        out.extend_from_slice(&2u64.to_le_bytes()); // program_id_max

        out.resize((acid_offset + acid_size) as usize, 0);
        out
    }

    #[test]
    fn parses_program_id_and_acid_modulus() {
        let modulus = [0x42u8; 0x100];
        let raw = build_npdm(0x0100_dead_beef_0000, modulus);
        let npdm = Npdm::parse(&VecStorage::new(raw)).unwrap();

        assert_eq!(npdm.program_id, 0x0100_dead_beef_0000);
        let acid = npdm.acid.unwrap();
        assert_eq!(*acid.modulus(), modulus);
        assert_eq!(acid.program_id_range(), (1, 2));
    }
}
