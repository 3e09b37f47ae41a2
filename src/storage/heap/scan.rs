use anyhow::Result;
use tracing::trace;

use super::{HeapFile, RecordId};
use crate::common::{PageNo, SlotNo};
use crate::storage::bitmap::{BitSearch, Bitmap};

/// Errors of a heap scan which callers are expected to tell apart from I/O faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// `advance` was called after the scan already reached the end of the file.
    #[error("cannot advance a heap scan which already reached the end of the file")]
    AdvancePastEnd,

    /// The current record was requested after the scan reached the end of the file.
    #[error("heap scan has no current record, it already reached the end of the file")]
    Exhausted,
}

/// Occupancy state of one record page.
#[derive(Debug, Clone, Copy)]
pub struct PageOccupancy<'p> {
    /// one bit per slot, set if the slot holds a record
    pub bitmap: &'p [u8],
    pub num_records: usize,
}

/// Page access a heap scan needs from the file it scans.
pub trait HeapPages {
    /// Number of record pages in the file.
    fn page_count(&self) -> PageNo;

    /// Slot capacity, the same for every page.
    fn records_per_page(&self) -> usize;

    /// Runs `f` on the occupancy of a record page. The page is only borrowed for the duration of the call.
    fn read_page<R, F>(&self, page_no: PageNo, f: F) -> Result<R>
    where
        F: FnOnce(PageOccupancy<'_>) -> R;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPosition {
    Positioned(RecordId),
    Ended,
}

/// Forward-only cursor over the occupied slots of a heap file.
///
/// The cursor only remembers where it is. Every call to [`HeapScanCursor::advance`] reads the
/// bitmap of the current page and, if needed, of the following pages, and moves to the next
/// occupied slot in ascending (page, slot) order. The file must not be modified while a scan
/// is in progress.
pub struct HeapScanCursor<'a, P, S = Bitmap> {
    file: &'a P,
    search: S,
    position: ScanPosition,
}

impl<'a, P: HeapPages> HeapScanCursor<'a, P> {
    /// Creates a cursor positioned on the first record of the file.
    pub fn new(file: &'a P) -> Result<Self> {
        Self::with_bit_search(file, Bitmap)
    }
}

impl<'a, P: HeapPages, S: BitSearch> HeapScanCursor<'a, P, S> {
    /// Creates a cursor which locates occupied slots with `search`.
    pub fn with_bit_search(file: &'a P, search: S) -> Result<Self> {
        let mut cursor = Self {
            file,
            search,
            position: ScanPosition::Ended,
        };
        cursor.position = cursor.seek(0, None)?;
        Ok(cursor)
    }

    /// Moves to the next occupied slot, or to the end if there is none left.
    pub fn advance(&mut self) -> Result<()> {
        let rid = match self.position {
            ScanPosition::Positioned(rid) => rid,
            ScanPosition::Ended => return Err(ScanError::AdvancePastEnd.into()),
        };
        self.position = self.seek(rid.page_no, Some(rid.slot_no))?;
        Ok(())
    }

    pub fn is_end(&self) -> bool {
        self.position == ScanPosition::Ended
    }

    /// Returns the current record id, or [`RecordId::INVALID`] once the scan ended.
    pub fn rid(&self) -> RecordId {
        match self.position {
            ScanPosition::Positioned(rid) => rid,
            ScanPosition::Ended => RecordId::INVALID,
        }
    }

    /// Returns the current record id, failing with [`ScanError::Exhausted`] once the scan ended.
    pub fn position(&self) -> Result<RecordId> {
        match self.position {
            ScanPosition::Positioned(rid) => Ok(rid),
            ScanPosition::Ended => Err(ScanError::Exhausted.into()),
        }
    }

    pub fn scan_position(&self) -> ScanPosition {
        self.position
    }

    /// Finds the first occupied slot of `page_no` after `after` (all slots if None),
    /// continuing on the following pages when that page has none left.
    fn seek(&self, page_no: PageNo, after: Option<SlotNo>) -> Result<ScanPosition> {
        let page_count = self.file.page_count();
        let limit = self.file.records_per_page();

        if page_no < page_count {
            let start = after.map_or(0, |slot_no| slot_no as usize + 1);
            let found = self.file.read_page(page_no, |page| {
                self.search.first_set_at_or_after(page.bitmap, start, limit)
            })?;
            if let Some(slot) = found {
                return Ok(ScanPosition::Positioned(RecordId::new(
                    page_no,
                    slot as SlotNo,
                )));
            }
        }

        for next_page_no in page_no + 1..page_count {
            let found = self.file.read_page(next_page_no, |page| {
                if page.num_records == 0 {
                    None
                } else {
                    self.search.first_set(page.bitmap, limit)
                }
            })?;
            if let Some(slot) = found {
                trace!(page_no = next_page_no, slot, "scan moved to next page");
                return Ok(ScanPosition::Positioned(RecordId::new(
                    next_page_no,
                    slot as SlotNo,
                )));
            }
        }

        trace!(page_count, "scan reached end of file");
        Ok(ScanPosition::Ended)
    }
}

/// Iterates over the records of a heap file in scan order, yielding each record with its id.
pub struct HeapRecordIterator<'a, 'b> {
    file: &'a HeapFile<'b>,
    cursor: HeapScanCursor<'a, HeapFile<'b>>,
    failed: bool,
}

impl<'a, 'b> HeapRecordIterator<'a, 'b> {
    pub(super) fn new(file: &'a HeapFile<'b>) -> Result<Self> {
        Ok(Self {
            file,
            cursor: HeapScanCursor::new(file)?,
            failed: false,
        })
    }

    fn fetch_next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        if self.cursor.is_end() {
            return Ok(None);
        }
        let rid = self.cursor.position()?;
        let record = self.file.get_record(rid)?;
        self.cursor.advance()?;
        Ok(Some((rid, record)))
    }
}

impl<'a, 'b> Iterator for HeapRecordIterator<'a, 'b> {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.fetch_next_record().transpose();
        self.failed = matches!(next, Some(Err(_)));
        next
    }
}

#[cfg(test)]
mod tests {

    use std::cell::Cell;

    use anyhow::{Error, Result};
    use rand::Rng;

    use super::{HeapPages, HeapScanCursor, PageOccupancy, ScanError, ScanPosition};
    use crate::common::PageNo;
    use crate::storage::bitmap::{BitSearch, Bitmap};
    use crate::storage::heap::RecordId;

    /// Heap pages kept in memory, one bitmap per page.
    struct MemoryPages {
        records_per_page: usize,
        bitmaps: Vec<Vec<u8>>,
        /// live counts as reported by the page headers
        num_records: Vec<usize>,
        failing_page: Option<PageNo>,
        reads: Cell<usize>,
    }

    impl MemoryPages {
        fn new(records_per_page: usize, occupied: &[&[usize]]) -> Self {
            let bitmaps: Vec<Vec<u8>> = occupied
                .iter()
                .map(|slots| {
                    let mut bitmap = vec![0u8; Bitmap::size_for(records_per_page)];
                    for &slot in slots.iter() {
                        Bitmap::set(&mut bitmap, slot);
                    }
                    bitmap
                })
                .collect();
            let num_records = occupied.iter().map(|slots| slots.len()).collect();
            Self {
                records_per_page,
                bitmaps,
                num_records,
                failing_page: None,
                reads: Cell::new(0),
            }
        }
    }

    impl HeapPages for MemoryPages {
        fn page_count(&self) -> PageNo {
            self.bitmaps.len() as PageNo
        }

        fn records_per_page(&self) -> usize {
            self.records_per_page
        }

        fn read_page<R, F>(&self, page_no: PageNo, f: F) -> Result<R>
        where
            F: FnOnce(PageOccupancy<'_>) -> R,
        {
            self.reads.set(self.reads.get() + 1);
            if self.failing_page == Some(page_no) {
                return Err(Error::msg(format!("Could not read page {page_no}")));
            }
            let bitmap = self
                .bitmaps
                .get(page_no as usize)
                .ok_or_else(|| Error::msg(format!("Page {page_no} does not exist")))?;
            Ok(f(PageOccupancy {
                bitmap,
                num_records: self.num_records[page_no as usize],
            }))
        }
    }

    /// Counts how many bitmap searches a scan performs.
    #[derive(Default)]
    struct CountingSearch {
        searches: Cell<usize>,
    }

    impl BitSearch for &CountingSearch {
        fn first_set_at_or_after(&self, bitmap: &[u8], start: usize, limit: usize) -> Option<usize> {
            self.searches.set(self.searches.get() + 1);
            Bitmap.first_set_at_or_after(bitmap, start, limit)
        }
    }

    fn collect<P: HeapPages>(file: &P) -> Result<Vec<RecordId>> {
        let mut cursor = HeapScanCursor::new(file)?;
        let mut rids = Vec::new();
        while !cursor.is_end() {
            rids.push(cursor.rid());
            cursor.advance()?;
        }
        Ok(rids)
    }

    #[test]
    fn page_with_stale_record_count_is_skipped() -> Result<()> {
        let mut file = MemoryPages::new(4, &[&[0], &[], &[1]]);
        file.num_records[1] = 3;
        let search = CountingSearch::default();
        let mut cursor = HeapScanCursor::with_bit_search(&file, &search)?;
        assert_eq!(cursor.rid(), RecordId::new(0, 0));
        cursor.advance()?;
        assert_eq!(cursor.rid(), RecordId::new(2, 1));
        // page 1 is searched because of its count, but yields nothing
        assert_eq!(search.searches.get(), 4);
        cursor.advance()?;
        assert!(cursor.is_end());
        assert_eq!(cursor.rid(), RecordId::INVALID);
        Ok(())
    }

    #[test]
    fn single_page_with_gaps() -> Result<()> {
        let file = MemoryPages::new(4, &[&[1, 3]]);
        let mut cursor = HeapScanCursor::new(&file)?;
        assert_eq!(cursor.rid(), RecordId::new(0, 1));
        cursor.advance()?;
        assert_eq!(cursor.rid(), RecordId::new(0, 3));
        cursor.advance()?;
        assert!(cursor.is_end());
        assert_eq!(cursor.scan_position(), ScanPosition::Ended);
        Ok(())
    }

    #[test]
    fn empty_pages_are_skipped_without_search() -> Result<()> {
        let file = MemoryPages::new(4, &[&[0], &[], &[2]]);
        let search = CountingSearch::default();
        let mut cursor = HeapScanCursor::with_bit_search(&file, &search)?;
        assert_eq!(cursor.rid(), RecordId::new(0, 0));
        cursor.advance()?;
        assert_eq!(cursor.rid(), RecordId::new(2, 2));
        cursor.advance()?;
        assert!(cursor.is_end());
        // page 0 twice, page 2 twice, page 1 never
        assert_eq!(search.searches.get(), 4);
        Ok(())
    }

    #[test]
    fn file_without_pages_ends_immediately() -> Result<()> {
        let file = MemoryPages::new(4, &[]);
        let cursor = HeapScanCursor::new(&file)?;
        assert!(cursor.is_end());
        assert_eq!(cursor.rid(), RecordId::INVALID);
        assert_eq!(cursor.rid(), RecordId::new(-1, -1));
        assert_eq!(file.reads.get(), 0);
        Ok(())
    }

    #[test]
    fn single_slot_file() -> Result<()> {
        let file = MemoryPages::new(1, &[&[0]]);
        let mut cursor = HeapScanCursor::new(&file)?;
        assert!(!cursor.is_end());
        assert_eq!(cursor.rid(), RecordId::new(0, 0));
        cursor.advance()?;
        assert!(cursor.is_end());
        Ok(())
    }

    #[test]
    fn file_with_only_empty_pages_ends_immediately() -> Result<()> {
        let file = MemoryPages::new(8, &[&[], &[], &[]]);
        let cursor = HeapScanCursor::new(&file)?;
        assert!(cursor.is_end());
        assert!(!cursor.rid().is_valid());
        Ok(())
    }

    #[test]
    fn first_page_empty_later_pages_full() -> Result<()> {
        let file = MemoryPages::new(3, &[&[], &[0, 1, 2], &[], &[], &[2]]);
        let rids = collect(&file)?;
        assert_eq!(
            rids,
            vec![
                RecordId::new(1, 0),
                RecordId::new(1, 1),
                RecordId::new(1, 2),
                RecordId::new(4, 2),
            ]
        );
        Ok(())
    }

    #[test]
    fn last_slot_of_page_then_first_slot_of_next() -> Result<()> {
        let file = MemoryPages::new(9, &[&[8], &[0]]);
        assert_eq!(
            collect(&file)?,
            vec![RecordId::new(0, 8), RecordId::new(1, 0)]
        );
        Ok(())
    }

    #[test]
    fn queries_do_not_move_the_cursor() -> Result<()> {
        let file = MemoryPages::new(4, &[&[2, 3]]);
        let mut cursor = HeapScanCursor::new(&file)?;
        let reads = file.reads.get();
        for _ in 0..3 {
            assert!(!cursor.is_end());
            assert_eq!(cursor.rid(), RecordId::new(0, 2));
            assert_eq!(cursor.position()?, RecordId::new(0, 2));
        }
        assert_eq!(file.reads.get(), reads);

        cursor.advance()?;
        cursor.advance()?;
        for _ in 0..3 {
            assert!(cursor.is_end());
            assert_eq!(cursor.rid(), RecordId::INVALID);
        }
        Ok(())
    }

    #[test]
    fn advancing_past_end_is_reported() -> Result<()> {
        let file = MemoryPages::new(2, &[&[0]]);
        let mut cursor = HeapScanCursor::new(&file)?;
        cursor.advance()?;
        assert!(cursor.is_end());

        let err = cursor.advance().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScanError>(),
            Some(&ScanError::AdvancePastEnd)
        );
        let err = cursor.position().unwrap_err();
        assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::Exhausted));

        // still ended, still safe to query
        assert!(cursor.is_end());
        assert_eq!(cursor.rid(), RecordId::INVALID);
        Ok(())
    }

    #[test]
    fn page_faults_propagate() -> Result<()> {
        let mut file = MemoryPages::new(4, &[&[0], &[], &[1]]);
        file.failing_page = Some(1);
        let mut cursor = HeapScanCursor::new(&file)?;
        assert_eq!(cursor.rid(), RecordId::new(0, 0));

        let err = cursor.advance().unwrap_err();
        assert!(err.downcast_ref::<ScanError>().is_none());
        assert!(err.to_string().contains("page 1"));

        file.failing_page = Some(0);
        assert!(HeapScanCursor::new(&file).is_err());
        Ok(())
    }

    #[test]
    fn visits_every_occupied_slot_once_in_order() -> Result<()> {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let records_per_page = rng.gen_range(1..=20);
            let page_count = rng.gen_range(0..=6);
            let density: f64 = rng.gen();
            let occupied = (0..page_count)
                .map(|_| {
                    (0..records_per_page)
                        .filter(|_| rng.gen_bool(density))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            let occupied_refs = occupied.iter().map(Vec::as_slice).collect::<Vec<_>>();
            let file = MemoryPages::new(records_per_page, &occupied_refs);

            let expected = occupied
                .iter()
                .enumerate()
                .flat_map(|(page_no, slots)| {
                    slots
                        .iter()
                        .map(move |&slot| RecordId::new(page_no as PageNo, slot as i32))
                })
                .collect::<Vec<_>>();

            let visited = collect(&file)?;
            assert_eq!(visited, expected, "occupancy {:?}", occupied);
            assert!(visited.windows(2).all(|pair| pair[0] < pair[1]));
        }
        Ok(())
    }
}
