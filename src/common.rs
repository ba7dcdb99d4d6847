pub type FileId = u32;
pub type PageNo = u32;
pub type SlotNo = u16;

/// Cache key of a page: the file it belongs to and its position in that file.
pub type PageId = (FileId, PageNo);

/// Locator of a tuple inside a heap file, assigned at insert time.
pub type RecordId = (PageNo, SlotNo);

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 8;

/// On-disk width of a string field. Longer values are truncated on insert.
pub const STRING_WIDTH: usize = 32;
