pub type FileId = u16;
pub type PageNo = i32;
pub type SlotNo = i32;
pub type PageId = (FileId, PageNo);

pub const INVALID_FILE_ID: FileId = 0;
pub const INVALID_PAGE_NO: PageNo = -1;
pub const INVALID_SLOT_NO: SlotNo = -1;
pub const INVALID_PAGE_ID: PageId = (INVALID_FILE_ID, INVALID_PAGE_NO);
pub const PAGE_SIZE: usize = 8192;

/// Physical page holding the heap file header. Record pages follow it.
pub const FILE_HEADER_PAGE_NO: PageNo = 0;
