use std::sync::RwLock;

use anyhow::{Error, Result};
use lazy_static::lazy_static;
use tracing::{debug, warn};

use super::header::{FileHeader, PageHeader, PageLayout};
use super::scan::{HeapPages, HeapRecordIterator, HeapScanCursor, PageOccupancy};
use super::RecordId;
use crate::buffer::buffer_manager::{BufferGuard, BufferManager};
use crate::common::{FileId, PageNo, SlotNo, FILE_HEADER_PAGE_NO, INVALID_PAGE_NO, PAGE_SIZE};
use crate::storage::bitmap::Bitmap;

lazy_static! {
    static ref EMPTY_RECORD_PAGE: [u8; PAGE_SIZE] = {
        let mut data = [0u8; PAGE_SIZE];
        PageHeader::empty().serialize(&mut data);
        data
    };
}

/// Options for creating a new heap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapFileOptions {
    /// size in bytes of every record
    pub record_size: usize,
    /// slots per page, defaults to as many as fit into a page
    pub records_per_page: Option<usize>,
}

impl HeapFileOptions {
    pub fn new(record_size: usize) -> Self {
        Self {
            record_size,
            records_per_page: None,
        }
    }

    pub fn records_per_page(mut self, records_per_page: usize) -> Self {
        self.records_per_page = Some(records_per_page);
        self
    }

    fn layout(&self) -> Result<PageLayout> {
        if self.record_size == 0 {
            return Err(Error::msg("Record size must be greater than 0"));
        }
        let max_records = PageLayout::max_records_per_page(self.record_size);
        let records_per_page = self.records_per_page.unwrap_or(max_records);
        if records_per_page == 0 || records_per_page > max_records {
            return Err(Error::msg(format!(
                "Cannot store {} records of {} bytes on a page of {} bytes",
                records_per_page, self.record_size, PAGE_SIZE
            )));
        }
        Ok(PageLayout::new(self.record_size, records_per_page))
    }
}

/// Maps a record page number to the page number inside the data file.
/// The first page of the data file holds the FileHeader.
fn physical_page_no(page_no: PageNo) -> PageNo {
    page_no + 1
}

/// Writes the header of an empty heap file to the first page of its data file.
fn write_file_header(
    buffer_manager: &BufferManager,
    file_id: FileId,
    header: &FileHeader,
) -> Result<()> {
    let mut data = [0u8; PAGE_SIZE];
    header.serialize(&mut data);
    let buffer = buffer_manager
        .allocate_new_page(file_id, &data)?
        .ok_or_else(|| {
            Error::msg(format!(
                "Could not allocate header page for heap file {}. All buffers in buffer manager are pinned.",
                file_id
            ))
        })?;
    if buffer.page_id().1 != FILE_HEADER_PAGE_NO {
        return Err(Error::msg(format!(
            "Heap file {} was not empty when it was created",
            file_id
        )));
    }
    Ok(())
}

/// A file of fixed-size records, organized in pages of slots.
pub struct HeapFile<'a> {
    file_id: FileId,
    buffer_manager: &'a BufferManager,
    header: RwLock<FileHeader>,
}

impl<'a> HeapFile<'a> {
    /// Creates a new data file and writes the header page of an empty heap file to it.
    pub fn create(
        buffer_manager: &'a BufferManager,
        file_id: FileId,
        options: HeapFileOptions,
    ) -> Result<Self> {
        let layout = options.layout()?;
        let header = FileHeader::new(&layout);

        buffer_manager.create_file(file_id)?;
        if let Err(err) = write_file_header(buffer_manager, file_id, &header) {
            // a data file without header page could neither be opened nor created again
            if let Err(cleanup_err) = buffer_manager.remove_file(file_id) {
                warn!(file_id, error = %cleanup_err, "could not remove incomplete heap file");
            }
            return Err(err);
        }
        debug!(
            file_id,
            record_size = layout.record_size,
            records_per_page = layout.records_per_page,
            "created heap file"
        );

        Ok(Self {
            file_id,
            buffer_manager,
            header: RwLock::new(header),
        })
    }

    /// Opens an existing heap file by reading its header page.
    pub fn open(buffer_manager: &'a BufferManager, file_id: FileId) -> Result<Self> {
        if !buffer_manager.contains_file(file_id) {
            return Err(Error::msg(format!("Heap file {} does not exist", file_id)));
        }
        let buffer = fetch_page(buffer_manager, file_id, FILE_HEADER_PAGE_NO)?;
        let header = FileHeader::parse(&buffer.read())?;
        drop(buffer);

        let allocated = buffer_manager.page_count(file_id)?;
        if physical_page_no(header.page_count()) > allocated {
            return Err(Error::msg(format!(
                "Heap file {} claims {} record pages, but only {} pages are allocated",
                file_id,
                header.page_count(),
                allocated - 1
            )));
        }
        debug!(file_id, pages = header.page_count(), "opened heap file");

        Ok(Self {
            file_id,
            buffer_manager,
            header: RwLock::new(header),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn record_size(&self) -> usize {
        self.header.read().unwrap().record_size()
    }

    /// Returns a cursor positioned on the first record of this file.
    pub fn scan(&self) -> Result<HeapScanCursor<'_, HeapFile<'a>>> {
        HeapScanCursor::new(self)
    }

    /// Returns an iterator over all records of this file together with their ids.
    pub fn records(&self) -> Result<HeapRecordIterator<'_, 'a>> {
        HeapRecordIterator::new(self)
    }

    /// Writes all modified pages of this heap file to disk.
    pub fn flush(&self) -> Result<()> {
        self.buffer_manager.flush_all()
    }

    fn fetch_record_page(&self, page_no: PageNo) -> Result<BufferGuard> {
        fetch_page(self.buffer_manager, self.file_id, physical_page_no(page_no))
    }

    fn write_header(&self, header: &FileHeader) -> Result<()> {
        let buffer = fetch_page(self.buffer_manager, self.file_id, FILE_HEADER_PAGE_NO)?;
        header.serialize(&mut buffer.write());
        buffer.mark_dirty();
        Ok(())
    }

    fn check_page_no(&self, header: &FileHeader, page_no: PageNo) -> Result<()> {
        if page_no < 0 || page_no >= header.page_count() {
            return Err(Error::msg(format!(
                "Page {} is out of range, heap file {} has {} pages",
                page_no,
                self.file_id,
                header.page_count()
            )));
        }
        Ok(())
    }

    /// Returns the slot index of a record id, or an error if it lies outside the file.
    fn check_rid(&self, header: &FileHeader, rid: RecordId) -> Result<usize> {
        self.check_page_no(header, rid.page_no)?;
        if rid.slot_no < 0 || rid.slot_no as usize >= header.records_per_page() {
            return Err(Error::msg(format!(
                "Slot {} is out of range, pages of heap file {} have {} slots",
                rid.slot_no,
                self.file_id,
                header.records_per_page()
            )));
        }
        Ok(rid.slot_no as usize)
    }

    fn check_record_size(&self, header: &FileHeader, record: &[u8]) -> Result<()> {
        if record.len() != header.record_size() {
            return Err(Error::msg(format!(
                "Record of {} bytes does not match record size {} of heap file {}",
                record.len(),
                header.record_size(),
                self.file_id
            )));
        }
        Ok(())
    }

    /// Returns the first page with a free slot, allocating a new one if every page is full.
    fn free_page(&self, header: &mut FileHeader) -> Result<(PageNo, BufferGuard)> {
        let page_no = header.first_free_page_no();
        if page_no != INVALID_PAGE_NO {
            return Ok((page_no, self.fetch_record_page(page_no)?));
        }

        let buffer = self
            .buffer_manager
            .allocate_new_page(self.file_id, EMPTY_RECORD_PAGE.as_slice())?
            .ok_or_else(|| {
                Error::msg(format!(
                    "Could not allocate new page for heap file {}. All buffers in buffer manager are pinned.",
                    self.file_id
                ))
            })?;
        let page_no = header.add_page();
        if physical_page_no(page_no) != buffer.page_id().1 {
            return Err(Error::msg(format!(
                "Heap file {} is out of sync, expected page {} but allocated {}",
                self.file_id,
                physical_page_no(page_no),
                buffer.page_id().1
            )));
        }
        header.set_first_free_page_no(page_no);
        debug!(file_id = self.file_id, page_no, "allocated record page");
        Ok((page_no, buffer))
    }

    /// Stores a record in the first free slot and returns its id.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        let mut header = self.header.write().unwrap();
        self.check_record_size(&header, record)?;
        let layout = header.layout();

        let (page_no, buffer) = self.free_page(&mut header)?;
        let mut data = buffer.write();
        let mut page_header = PageHeader::parse(&data);
        let slot = Bitmap::first_unset(&data[layout.bitmap_range()], layout.records_per_page)
            .ok_or_else(|| {
                Error::msg(format!(
                    "Page {} of heap file {} is on the free list, but has no free slot",
                    page_no, self.file_id
                ))
            })?;

        Bitmap::set(&mut data[layout.bitmap_range()], slot);
        data[layout.slot_range(slot)].copy_from_slice(record);
        page_header.add_record();
        if page_header.num_records() == layout.records_per_page {
            header.set_first_free_page_no(page_header.next_free_page_no());
            page_header.set_next_free_page_no(INVALID_PAGE_NO);
            debug!(file_id = self.file_id, page_no, "record page is full");
        }
        page_header.serialize(&mut data);
        drop(data);
        buffer.mark_dirty();
        drop(buffer);

        self.write_header(&header)?;
        Ok(RecordId::new(page_no, slot as SlotNo))
    }

    /// Returns a copy of the record stored at rid.
    pub fn get_record(&self, rid: RecordId) -> Result<Vec<u8>> {
        let header = self.header.read().unwrap();
        let slot = self.check_rid(&header, rid)?;
        let layout = header.layout();

        let buffer = self.fetch_record_page(rid.page_no)?;
        let data = buffer.read();
        if !Bitmap::is_set(&data[layout.bitmap_range()], slot) {
            return Err(Error::msg(format!(
                "No record at {} in heap file {}",
                rid, self.file_id
            )));
        }
        Ok(data[layout.slot_range(slot)].to_vec())
    }

    /// Returns whether a record is stored at rid.
    pub fn is_record(&self, rid: RecordId) -> Result<bool> {
        let header = self.header.read().unwrap();
        let slot = self.check_rid(&header, rid)?;
        let layout = header.layout();

        let buffer = self.fetch_record_page(rid.page_no)?;
        let data = buffer.read();
        Ok(Bitmap::is_set(&data[layout.bitmap_range()], slot))
    }

    /// Overwrites the record stored at rid.
    pub fn update_record(&self, rid: RecordId, record: &[u8]) -> Result<()> {
        let header = self.header.read().unwrap();
        let slot = self.check_rid(&header, rid)?;
        self.check_record_size(&header, record)?;
        let layout = header.layout();

        let buffer = self.fetch_record_page(rid.page_no)?;
        let mut data = buffer.write();
        if !Bitmap::is_set(&data[layout.bitmap_range()], slot) {
            return Err(Error::msg(format!(
                "Cannot update {} in heap file {}, the slot is free",
                rid, self.file_id
            )));
        }
        data[layout.slot_range(slot)].copy_from_slice(record);
        drop(data);
        buffer.mark_dirty();
        Ok(())
    }

    /// Frees the slot of the record stored at rid. A page which was full goes back on the free list.
    pub fn delete_record(&self, rid: RecordId) -> Result<()> {
        let mut header = self.header.write().unwrap();
        let slot = self.check_rid(&header, rid)?;
        let layout = header.layout();

        let buffer = self.fetch_record_page(rid.page_no)?;
        let mut data = buffer.write();
        if !Bitmap::is_set(&data[layout.bitmap_range()], slot) {
            return Err(Error::msg(format!(
                "Cannot delete {} in heap file {}, the slot is already free",
                rid, self.file_id
            )));
        }

        let mut page_header = PageHeader::parse(&data);
        let was_full = page_header.num_records() == layout.records_per_page;
        Bitmap::reset(&mut data[layout.bitmap_range()], slot);
        page_header.remove_record();
        if was_full {
            page_header.set_next_free_page_no(header.first_free_page_no());
            header.set_first_free_page_no(rid.page_no);
            debug!(
                file_id = self.file_id,
                page_no = rid.page_no,
                "record page has free slots again"
            );
        }
        page_header.serialize(&mut data);
        drop(data);
        buffer.mark_dirty();
        drop(buffer);

        if was_full {
            self.write_header(&header)?;
        }
        Ok(())
    }
}

impl HeapPages for HeapFile<'_> {
    fn page_count(&self) -> PageNo {
        self.header.read().unwrap().page_count()
    }

    fn records_per_page(&self) -> usize {
        self.header.read().unwrap().records_per_page()
    }

    fn read_page<R, F>(&self, page_no: PageNo, f: F) -> Result<R>
    where
        F: FnOnce(PageOccupancy<'_>) -> R,
    {
        let layout = {
            let header = self.header.read().unwrap();
            self.check_page_no(&header, page_no)?;
            header.layout()
        };

        let buffer = self.fetch_record_page(page_no)?;
        let data = buffer.read();
        let page_header = PageHeader::parse(&data);
        Ok(f(PageOccupancy {
            bitmap: &data[layout.bitmap_range()],
            num_records: page_header.num_records(),
        }))
    }
}

fn fetch_page(
    buffer_manager: &BufferManager,
    file_id: FileId,
    page_no: PageNo,
) -> Result<BufferGuard> {
    buffer_manager.fetch((file_id, page_no))?.ok_or_else(|| {
        Error::msg(format!(
            "Could not fetch page {} for heap file {}. All buffers in buffer manager are pinned.",
            page_no, file_id
        ))
    })
}
