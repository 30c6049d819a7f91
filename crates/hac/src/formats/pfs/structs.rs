use binrw::{BinRead, BinWrite};

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct PartitionFsEntry {
    pub offset: u64,
    pub size: u64,
    #[brw(pad_after = 4)]
    pub string_table_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PFS0")]
pub struct PartitionFsHeader {
    pub num_files: u32,
    pub string_table_size: u32,
    pub _reserved: u32,
    #[br(count = num_files)]
    pub file_entries: Vec<PartitionFsEntry>,
    #[br(count = string_table_size)]
    pub string_table: Vec<u8>,
}

pub fn get_string(string_table: &[u8], offset: u32) -> &str {
    let rest = &string_table[offset as usize..];
    let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    std::str::from_utf8(&rest[..len]).expect("Invalid UTF-8 in PFS0 string table")
}
