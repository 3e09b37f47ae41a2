use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use tracing::trace;

use crate::common::{FileId, PageId, PageNo, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::file_manager::FileManager;

use super::clock_replacer::ClockReplacer;
use super::PoolPos;

/// A pinned page. The page stays in the pool until the guard is dropped.
pub struct BufferGuard<'a> {
    buffer_manager: &'a BufferManager,
    buffer: &'a Buffer,
}

impl<'a> BufferGuard<'a> {
    fn new(buffer_manager: &'a BufferManager, buffer: &'a Buffer) -> Self {
        Self {
            buffer_manager,
            buffer,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.buffer.page_id()
    }

    pub fn read(&self) -> RwLockReadGuard<[u8]> {
        self.buffer.data().read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<[u8]> {
        self.buffer.data().write().unwrap()
    }

    pub fn mark_dirty(&self) {
        self.buffer.mark_dirty();
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.buffer_manager.unpin(self.buffer)
    }
}

/// One slot of the pool, holding a copy of a page while the page is cached.
struct Buffer {
    pool_pos: PoolPos,
    /// INVALID_PAGE_ID while the slot is unused
    page_id: RwLock<PageId>,
    dirty: AtomicBool,
    data: RwLock<[u8; PAGE_SIZE]>,
}

impl Buffer {
    fn new(pool_pos: PoolPos) -> Self {
        Self {
            pool_pos,
            page_id: RwLock::new(INVALID_PAGE_ID),
            dirty: AtomicBool::new(false),
            data: RwLock::new([0; PAGE_SIZE]),
        }
    }

    fn page_id(&self) -> PageId {
        *self.page_id.read().unwrap()
    }

    /// Rebinds the slot to another page. The content counts as clean afterwards.
    fn change_page(&self, page_id: PageId) {
        *self.page_id.write().unwrap() = page_id;
        self.mark_clean();
    }

    fn data(&self) -> &RwLock<[u8]> {
        &self.data
    }

    fn dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

/// A fixed number of page buffers shared by all heap files. Pages are read on demand and
/// written back when their buffer is reused or on [`BufferManager::flush_all`].
pub struct BufferManager {
    pool: Box<[Buffer]>,
    clock_replacer: Mutex<ClockReplacer>,
    page_id_to_pool_pos: Mutex<HashMap<PageId, PoolPos>>,
    file_manager: RwLock<FileManager>,
}

impl BufferManager {
    pub fn new(file_manager: FileManager, pool_size: usize) -> Self {
        let clock_replacer = ClockReplacer::new(pool_size);
        let pool = (0..pool_size).map(Buffer::new).collect();

        Self {
            pool,
            clock_replacer: Mutex::new(clock_replacer),
            page_id_to_pool_pos: Mutex::new(HashMap::new()),
            file_manager: RwLock::new(file_manager),
        }
    }

    pub fn page_count(&self, file_id: FileId) -> Result<PageNo> {
        let file_manager = self.file_manager.read().unwrap();
        file_manager.page_count(file_id)
    }

    pub fn contains_file(&self, file_id: FileId) -> bool {
        let file_manager = self.file_manager.read().unwrap();
        file_manager.contains(file_id)
    }

    pub fn create_file(&self, file_id: FileId) -> Result<()> {
        let file_manager = self.file_manager.write().unwrap();
        file_manager.create_file(file_id)
    }

    /// Deletes a file. Its pages are dropped from the pool without being written back,
    /// so none of them may be pinned.
    pub fn remove_file(&self, file_id: FileId) -> Result<()> {
        let mut page_id_to_pool_pos = self.page_id_to_pool_pos.lock().unwrap();
        page_id_to_pool_pos.retain(|&(page_file_id, _), &mut pool_pos| {
            if page_file_id == file_id {
                self.pool[pool_pos].change_page(INVALID_PAGE_ID);
            }
            page_file_id != file_id
        });
        let file_manager = self.file_manager.write().unwrap();
        file_manager.remove_file(file_id)
    }

    /// Appends a page holding `initial_data` to a file and pins it.
    /// Returns None if all buffers are currently pinned.
    pub fn allocate_new_page(
        &self,
        file_id: FileId,
        initial_data: &[u8],
    ) -> Result<Option<BufferGuard>> {
        let mut page_id_to_pool_pos = self.page_id_to_pool_pos.lock().unwrap();
        let mut clock_replacer = self.clock_replacer.lock().unwrap();

        let buffer = match self.claim_buffer(&mut page_id_to_pool_pos, &mut clock_replacer)? {
            Some(buffer) => buffer,
            None => return Ok(None),
        };
        let page_no = {
            let file_manager = self.file_manager.read().unwrap();
            file_manager.allocate_new_page(file_id, initial_data)?
        };
        buffer.data().write().unwrap().copy_from_slice(initial_data);

        let page_id = (file_id, page_no);
        trace!(?page_id, pool_pos = buffer.pool_pos, "allocated page");
        Ok(Some(self.install(
            &mut page_id_to_pool_pos,
            &mut clock_replacer,
            buffer,
            page_id,
        )))
    }

    /// Pins a page, reading it from disk if it is not part of the pool yet.
    /// Returns None if all buffers are currently pinned.
    pub fn fetch(&self, page_id: PageId) -> Result<Option<BufferGuard>> {
        let mut page_id_to_pool_pos = self.page_id_to_pool_pos.lock().unwrap();
        let mut clock_replacer = self.clock_replacer.lock().unwrap();

        if let Some(&pool_pos) = page_id_to_pool_pos.get(&page_id) {
            clock_replacer.pin(pool_pos);
            return Ok(Some(BufferGuard::new(self, &self.pool[pool_pos])));
        }

        let buffer = match self.claim_buffer(&mut page_id_to_pool_pos, &mut clock_replacer)? {
            Some(buffer) => buffer,
            None => return Ok(None),
        };
        {
            let mut data = buffer.data().write().unwrap();
            let file_manager = self.file_manager.read().unwrap();
            file_manager.read_page(page_id.0, page_id.1, &mut data)?;
        }

        trace!(?page_id, pool_pos = buffer.pool_pos, "read page into pool");
        Ok(Some(self.install(
            &mut page_id_to_pool_pos,
            &mut clock_replacer,
            buffer,
            page_id,
        )))
    }

    /// Writes every dirty page in the pool back to disk.
    pub fn flush_all(&self) -> Result<()> {
        let _page_id_to_pool_pos = self.page_id_to_pool_pos.lock().unwrap();
        for buffer in self.pool.iter() {
            self.write_back(buffer)?;
        }
        Ok(())
    }

    fn unpin(&self, buffer: &Buffer) {
        let mut clock_replacer = self.clock_replacer.lock().unwrap();
        clock_replacer.unpin(buffer.pool_pos);
    }

    /// Picks an unpinned buffer and detaches it from the page it holds.
    /// Returns None if every buffer is pinned.
    fn claim_buffer(
        &self,
        page_id_to_pool_pos: &mut HashMap<PageId, PoolPos>,
        clock_replacer: &mut ClockReplacer,
    ) -> Result<Option<&Buffer>> {
        let victim = match clock_replacer.find_free_buffer() {
            Some(pool_pos) => &self.pool[pool_pos],
            None => return Ok(None),
        };
        let old_page_id = victim.page_id();
        if old_page_id != INVALID_PAGE_ID {
            self.write_back(victim)?;
            page_id_to_pool_pos.remove(&old_page_id);
            victim.change_page(INVALID_PAGE_ID);
        }
        Ok(Some(victim))
    }

    /// Binds a claimed buffer to `page_id` and hands it out pinned.
    fn install<'a>(
        &'a self,
        page_id_to_pool_pos: &mut HashMap<PageId, PoolPos>,
        clock_replacer: &mut ClockReplacer,
        buffer: &'a Buffer,
        page_id: PageId,
    ) -> BufferGuard<'a> {
        buffer.change_page(page_id);
        page_id_to_pool_pos.insert(page_id, buffer.pool_pos);
        clock_replacer.pin(buffer.pool_pos);
        BufferGuard::new(self, buffer)
    }

    /// Writes a buffer to its page on disk if it has been modified since it was read.
    fn write_back(&self, buffer: &Buffer) -> Result<()> {
        let page_id = buffer.page_id();
        if page_id == INVALID_PAGE_ID || !buffer.dirty() {
            return Ok(());
        }
        trace!(?page_id, "writing back dirty page");
        let data = buffer.data().read().unwrap();
        let file_manager = self.file_manager.read().unwrap();
        file_manager.write_page(page_id.0, page_id.1, &data)?;
        buffer.mark_clean();
        Ok(())
    }
}
