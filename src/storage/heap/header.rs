use std::ops::Range;

use anyhow::{Error, Result};

use crate::common::{PageNo, INVALID_PAGE_NO, PAGE_SIZE};
use crate::storage::bitmap::Bitmap;
use crate::storage::utils::{Deserializer, Serializer};

/// Bookkeeping of a heap file, stored on the first page of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    record_size: u32,
    /// number of record pages, the header page is not counted
    num_pages: u32,
    records_per_page: u32,
    /// head of the list of record pages which still have a free slot
    first_free_page_no: PageNo,
    bitmap_size: u32,
}

impl FileHeader {
    pub const SIZE: usize = 20;

    pub fn new(layout: &PageLayout) -> Self {
        Self {
            record_size: layout.record_size as u32,
            num_pages: 0,
            records_per_page: layout.records_per_page as u32,
            first_free_page_no: INVALID_PAGE_NO,
            bitmap_size: layout.bitmap_size as u32,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut deserializer = Deserializer::new(bytes);
        let header = Self {
            record_size: deserializer.deserialize_u32(),
            num_pages: deserializer.deserialize_u32(),
            records_per_page: deserializer.deserialize_u32(),
            first_free_page_no: deserializer.deserialize_i32(),
            bitmap_size: deserializer.deserialize_u32(),
        };

        let layout = header.layout();
        if header.record_size == 0 || header.records_per_page == 0 || !layout.fits() {
            return Err(Error::msg(format!(
                "Corrupted heap file header. {} records of {} bytes do not fit into a page",
                header.records_per_page, header.record_size
            )));
        }
        if header.bitmap_size as usize != layout.bitmap_size {
            return Err(Error::msg(format!(
                "Corrupted heap file header. Bitmap of {} bytes cannot hold {} slots",
                header.bitmap_size, header.records_per_page
            )));
        }
        if header.first_free_page_no < INVALID_PAGE_NO
            || header.first_free_page_no >= header.page_count()
        {
            return Err(Error::msg(format!(
                "Corrupted heap file header. Free page {} is out of range",
                header.first_free_page_no
            )));
        }
        Ok(header)
    }

    /// serializes this FileHeader so that it can be persisted to disk.
    /// Returns how many bytes were written to the buffer
    pub fn serialize(&self, buffer: &mut [u8]) -> usize {
        let mut serializer = Serializer::new(buffer);
        serializer.serialize_u32(self.record_size);
        serializer.serialize_u32(self.num_pages);
        serializer.serialize_u32(self.records_per_page);
        serializer.serialize_i32(self.first_free_page_no);
        serializer.serialize_u32(self.bitmap_size);
        serializer.end()
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout::new(self.record_size as usize, self.records_per_page as usize)
    }

    pub fn record_size(&self) -> usize {
        self.record_size as usize
    }

    pub fn records_per_page(&self) -> usize {
        self.records_per_page as usize
    }

    pub fn page_count(&self) -> PageNo {
        self.num_pages as PageNo
    }

    pub fn add_page(&mut self) -> PageNo {
        self.num_pages += 1;
        self.num_pages as PageNo - 1
    }

    pub fn first_free_page_no(&self) -> PageNo {
        self.first_free_page_no
    }

    pub fn set_first_free_page_no(&mut self, page_no: PageNo) {
        self.first_free_page_no = page_no;
    }
}

/// Header at the start of every record page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// next page on the free list, INVALID_PAGE_NO if this is the last one
    next_free_page_no: PageNo,
    num_records: u32,
}

impl PageHeader {
    pub const SIZE: usize = 8;

    pub fn empty() -> Self {
        Self {
            next_free_page_no: INVALID_PAGE_NO,
            num_records: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> Self {
        let mut deserializer = Deserializer::new(bytes);
        let next_free_page_no = deserializer.deserialize_i32();
        let num_records = deserializer.deserialize_u32();

        Self {
            next_free_page_no,
            num_records,
        }
    }

    pub fn serialize(&self, buffer: &mut [u8]) -> usize {
        let mut serializer = Serializer::new(buffer);
        serializer.serialize_i32(self.next_free_page_no);
        serializer.serialize_u32(self.num_records);
        serializer.end()
    }

    pub fn next_free_page_no(&self) -> PageNo {
        self.next_free_page_no
    }

    pub fn set_next_free_page_no(&mut self, page_no: PageNo) {
        self.next_free_page_no = page_no;
    }

    pub fn num_records(&self) -> usize {
        self.num_records as usize
    }

    pub fn add_record(&mut self) {
        self.num_records += 1;
    }

    pub fn remove_record(&mut self) {
        self.num_records -= 1;
    }
}

/// Where the bitmap and the record slots live inside a record page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub record_size: usize,
    pub records_per_page: usize,
    pub bitmap_size: usize,
}

impl PageLayout {
    pub fn new(record_size: usize, records_per_page: usize) -> Self {
        Self {
            record_size,
            records_per_page,
            bitmap_size: Bitmap::size_for(records_per_page),
        }
    }

    /// Largest number of records of the given size that fit into one page,
    /// together with the page header and one bitmap bit per record.
    pub fn max_records_per_page(record_size: usize) -> usize {
        let available_bits = (PAGE_SIZE - PageHeader::SIZE) * u8::BITS as usize;
        let bits_per_record = record_size
            .saturating_mul(u8::BITS as usize)
            .saturating_add(1);
        available_bits / bits_per_record
    }

    /// Returns whether header, bitmap and all slots fit into a page.
    pub fn fits(&self) -> bool {
        self.records_per_page
            .checked_mul(self.record_size)
            .and_then(|slots| slots.checked_add(PageHeader::SIZE + self.bitmap_size))
            .map_or(false, |size| size <= PAGE_SIZE)
    }

    pub fn bitmap_range(&self) -> Range<usize> {
        PageHeader::SIZE..PageHeader::SIZE + self.bitmap_size
    }

    pub fn slot_range(&self, slot: usize) -> Range<usize> {
        let start = PageHeader::SIZE + self.bitmap_size + slot * self.record_size;
        start..start + self.record_size
    }
}

#[cfg(test)]
mod tests {

    use super::{FileHeader, PageHeader, PageLayout};
    use crate::common::{INVALID_PAGE_NO, PAGE_SIZE};

    use anyhow::Result;

    #[test]
    fn max_records_fill_the_page() {
        for record_size in [1, 3, 8, 100, 1000, 4000] {
            let records = PageLayout::max_records_per_page(record_size);
            assert!(records > 0);
            assert!(PageLayout::new(record_size, records).fits());
            assert!(
                !PageLayout::new(record_size, records + 1).fits(),
                "{} records of size {} should not fit",
                records + 1,
                record_size
            );
        }
        assert_eq!(PageLayout::max_records_per_page(PAGE_SIZE), 0);
    }

    #[test]
    fn slots_follow_the_bitmap() {
        let layout = PageLayout::new(16, 10);
        assert_eq!(layout.bitmap_size, 2);
        assert_eq!(layout.bitmap_range(), 8..10);
        assert_eq!(layout.slot_range(0), 10..26);
        assert_eq!(layout.slot_range(9), 154..170);
    }

    #[test]
    fn file_header_is_persisted() -> Result<()> {
        let mut header = FileHeader::new(&PageLayout::new(32, 50));
        assert_eq!(header.add_page(), 0);
        assert_eq!(header.add_page(), 1);
        header.set_first_free_page_no(1);

        let mut page = [0u8; PAGE_SIZE];
        assert_eq!(header.serialize(&mut page), FileHeader::SIZE);
        let parsed = FileHeader::parse(&page)?;
        assert_eq!(parsed, header);
        assert_eq!(parsed.page_count(), 2);
        assert_eq!(parsed.records_per_page(), 50);
        assert_eq!(parsed.record_size(), 32);
        Ok(())
    }

    #[test]
    fn corrupted_file_header_is_rejected() {
        let mut header = FileHeader::new(&PageLayout::new(32, 50));
        header.set_first_free_page_no(3);
        let mut page = [0u8; PAGE_SIZE];
        header.serialize(&mut page);
        assert!(FileHeader::parse(&page).is_err());

        assert!(FileHeader::parse(&[0u8; PAGE_SIZE]).is_err());

        let mut header = FileHeader::new(&PageLayout::new(PAGE_SIZE, 2));
        header.set_first_free_page_no(INVALID_PAGE_NO);
        header.serialize(&mut page);
        assert!(FileHeader::parse(&page).is_err());
    }

    #[test]
    fn page_header_counts_records() {
        let mut header = PageHeader::empty();
        header.add_record();
        header.add_record();
        header.remove_record();
        header.set_next_free_page_no(4);

        let mut page = [0u8; PAGE_SIZE];
        header.serialize(&mut page);
        let parsed = PageHeader::parse(&page);
        assert_eq!(parsed.num_records(), 1);
        assert_eq!(parsed.next_free_page_no(), 4);
    }
}
