use std::fmt;

use crate::common::{PageNo, SlotNo, INVALID_PAGE_NO, INVALID_SLOT_NO};

pub mod file;
pub mod header;
pub mod scan;

pub use file::{HeapFile, HeapFileOptions};
pub use scan::{
    HeapPages, HeapRecordIterator, HeapScanCursor, PageOccupancy, ScanError, ScanPosition,
};

/// Physical location of a record: the record page and the slot inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub page_no: PageNo,
    pub slot_no: SlotNo,
}

impl RecordId {
    /// Sentinel meaning "no position".
    pub const INVALID: RecordId = RecordId {
        page_no: INVALID_PAGE_NO,
        slot_no: INVALID_SLOT_NO,
    };

    pub fn new(page_no: PageNo, slot_no: SlotNo) -> Self {
        Self { page_no, slot_no }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_no, self.slot_no)
    }
}
