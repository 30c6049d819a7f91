use binrw::{BinRead, BinWrite};

use crate::hexstring::HexData;

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct Hfs0Entry {
    pub offset: u64,
    pub size: u64,
    pub string_table_offset: u32,
    #[brw(pad_after = 8)]
    pub hashed_size: u32,
    pub hash: HexData<0x20>,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"HFS0")]
pub struct Hfs0Header {
    pub num_files: u32,
    pub string_table_size: u32,
    pub _reserved: u32,
    #[br(count = num_files)]
    pub file_entries: Vec<Hfs0Entry>,
    #[br(count = string_table_size)]
    pub string_table: Vec<u8>,
}

pub fn get_string(string_table: &[u8], offset: u32) -> &str {
    let rest = &string_table[offset as usize..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    std::str::from_utf8(&rest[..end]).expect("HFS0 string table entry is not valid UTF-8")
}
