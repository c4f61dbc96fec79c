//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Automatic dirty page write-back, honoring the write-ahead-logging rule
//!   (a dirty page's log record must be durable before the page itself is
//!   written back)
//! - A pluggable eviction policy ([`Replacer`]), defaulting to [`ClockReplacer`]

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::buffer::replacer::{ClockReplacer, Replacer};
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Error, FrameId, PageId, Result};
use crate::log::LogManager;
use crate::storage::page::PageHeader;
use crate::storage::DiskStore;

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Thread Safety
/// - `page_table`: `RwLock` - many readers, few writers
/// - `free_list`: `Mutex` - always modified
/// - `replacer`: `Mutex<Box<dyn Replacer>>` - internal state changes on access
/// - `disk`: `Mutex<Box<dyn DiskStore>>` - single-threaded I/O
/// - `frames`: no lock - fixed size, each `Frame` has internal locks
/// - `stats`: no lock - all atomic counters
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    free_list: Mutex<Vec<FrameId>>,
    replacer: Mutex<Box<dyn Replacer>>,
    disk: Arc<Mutex<Box<dyn DiskStore>>>,
    /// When present, dirty-page flushes are preceded by a WAL flush up to
    /// the page's LSN (the ARIES write-ahead rule).
    log_manager: RwLock<Option<Arc<LogManager>>>,
    stats: BufferPoolStats,
    pool_size: usize,
}

impl BufferPoolManager {
    /// Create a buffer pool manager with the default (clock) eviction policy.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, disk: Arc<Mutex<Box<dyn DiskStore>>>) -> Self {
        Self::with_replacer(pool_size, disk, Box::new(ClockReplacer::new(pool_size)))
    }

    /// Create a buffer pool manager with an explicit eviction policy.
    pub fn with_replacer(
        pool_size: usize,
        disk: Arc<Mutex<Box<dyn DiskStore>>>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(replacer),
            disk,
            log_manager: RwLock::new(None),
            stats: BufferPoolStats::new(),
            pool_size,
        }
    }

    /// Wire in the log manager so dirty-page eviction/flush honors the
    /// write-ahead rule. Without this, pages flush without first forcing
    /// their log records durable (acceptable only for indexes/catalogs that
    /// don't participate in WAL, or in tests).
    pub fn attach_log_manager(&self, log_manager: Arc<LogManager>) {
        *self.log_manager.write() = Some(log_manager);
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    // ========================================================================
    // Public API: Create and delete pages
    // ========================================================================

    /// Allocate a new page on disk, format it as an empty slotted page, and
    /// load it into the buffer pool pinned for writing.
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.get_free_frame()?;

        let page_id = {
            let mut disk = self.disk.lock();
            disk.allocate_page()?
        };

        let frame = &self.frames[frame_id.0];
        {
            let mut page = frame.page_mut();
            page.reset();
            page.set_header(&PageHeader::new(page_id));
            page.update_checksum();
        }

        frame.set_page_id(Some(page_id));
        frame.pin();

        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
        }
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        let lock = frame.page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Remove a page from the buffer pool (does not deallocate it on disk).
    ///
    /// # Errors
    /// Returns `Error::PageNotPinned` is misleading here — it actually
    /// signals the page IS pinned and cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut pt = self.page_table.write();

        let frame_id = match pt.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::PageNotPinned(page_id.0));
        }

        pt.remove(&page_id);
        drop(pt);

        frame.set_page_id(None);
        frame.clear_dirty();

        {
            let mut replacer = self.replacer.lock();
            replacer.remove(frame_id);
        }
        {
            let mut fl = self.free_list.lock();
            fl.push(frame_id);
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let pt = self.page_table.read();
            match pt.get(&page_id) {
                Some(&fid) => fid,
                None => return Ok(()),
            }
        };
        self.flush_frame(frame_id, page_id)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };

        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn page_count(&self) -> usize {
        self.page_table.read().len()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        let new_pin_count = frame.unpin();
        if new_pin_count == 0 {
            let mut replacer = self.replacer.lock();
            replacer.set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        {
            let pt = self.page_table.read();
            if let Some(&frame_id) = pt.get(&page_id) {
                self.handle_cache_hit(frame_id);
                return Ok(frame_id);
            }
        }

        self.handle_cache_miss(page_id)
    }

    fn handle_cache_hit(&self, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0];
        frame.pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = self.get_free_frame()?;

        let page_data = {
            let mut disk = self.disk.lock();
            disk.read_page(page_id)?
        };
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        {
            let mut page = frame.page_mut();
            page.as_mut_slice().copy_from_slice(page_data.as_slice());
        }

        frame.set_page_id(Some(page_id));
        frame.pin();

        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
        }
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    fn get_free_frame(&self) -> Result<FrameId> {
        {
            let mut fl = self.free_list.lock();
            if let Some(frame_id) = fl.pop() {
                return Ok(frame_id);
            }
        }

        self.evict_page()
    }

    fn evict_page(&self) -> Result<FrameId> {
        let frame_id = {
            let mut replacer = self.replacer.lock();
            replacer.evict().ok_or(Error::NoFreeFrames)?
        };

        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Some(pid) = old_page_id {
                self.flush_frame(frame_id, pid)?;
            }
        }

        if let Some(pid) = old_page_id {
            let mut pt = self.page_table.write();
            pt.remove(&pid);
        }

        frame.clear_dirty();
        frame.set_page_id(None);

        Ok(frame_id)
    }

    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        if frame.is_dirty() {
            let page = frame.page();

            if let Some(log_manager) = self.log_manager.read().as_ref() {
                let page_lsn = page.header().lsn;
                log_manager.flush_up_to(crate::common::Lsn::new(page_lsn as u64))?;
            }

            {
                let mut disk = self.disk.lock();
                disk.write_page(page_id, &page)?;
            }
            drop(page);

            frame.clear_dirty();
            self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDisk;

    fn create_test_bpm(pool_size: usize) -> BufferPoolManager {
        let disk: Arc<Mutex<Box<dyn DiskStore>>> =
            Arc::new(Mutex::new(Box::new(InMemoryDisk::new())));
        BufferPoolManager::new(pool_size, disk)
    }

    #[test]
    fn test_new_page() {
        let bpm = create_test_bpm(10);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(0));
        drop(guard);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(1));
    }

    #[test]
    fn test_fetch_page_read() {
        let bpm = create_test_bpm(10);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0xAB;
        }

        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0xAB);
        }
    }

    #[test]
    fn test_fetch_page_write() {
        let bpm = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }
        {
            let mut guard = bpm.fetch_page_write(PageId::new(0)).unwrap();
            guard.as_mut_slice()[0] = 0xCD;
        }
        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0xCD);
        }
    }

    #[test]
    fn test_cache_hit() {
        let bpm = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }
        {
            let _guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        }
        {
            let _guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        }

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.cache_hits >= 2);
    }

    #[test]
    fn test_eviction() {
        let bpm = create_test_bpm(3);

        for _ in 0..3 {
            let _guard = bpm.new_page().unwrap();
        }
        assert_eq!(bpm.free_frame_count(), 0);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(3));

        let snapshot = bpm.stats().snapshot();
        assert_eq!(snapshot.evictions, 1);
    }

    #[test]
    fn test_dirty_page_flushed_on_eviction() {
        let bpm = create_test_bpm(1);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0x42;
        }
        {
            let _guard = bpm.new_page().unwrap();
        }
        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn test_delete_page() {
        let bpm = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }
        assert_eq!(bpm.page_count(), 1);

        bpm.delete_page(PageId::new(0)).unwrap();

        assert_eq!(bpm.free_frame_count(), 10);
        assert_eq!(bpm.page_count(), 0);
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let bpm = create_test_bpm(10);
        let _guard = bpm.new_page().unwrap();
        assert!(bpm.delete_page(PageId::new(0)).is_err());
    }

    #[test]
    fn test_flush_page() {
        let bpm = create_test_bpm(10);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0xFF;
        }
        bpm.flush_page(PageId::new(0)).unwrap();

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.pages_written >= 1);
    }

    #[test]
    fn test_flush_all_pages() {
        let bpm = create_test_bpm(10);

        for i in 0..5 {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = i;
        }
        bpm.flush_all_pages().unwrap();

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.pages_written >= 5);
    }

    #[test]
    fn test_multiple_read_guards() {
        let bpm = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }

        let guard1 = bpm.fetch_page_read(PageId::new(0)).unwrap();
        let guard2 = bpm.fetch_page_read(PageId::new(0)).unwrap();
        assert_eq!(guard1.page_id(), guard2.page_id());
    }

    #[test]
    fn test_page_not_found() {
        let bpm = create_test_bpm(10);
        assert!(bpm.fetch_page_read(PageId::new(999)).is_err());
    }

    #[test]
    fn test_no_free_frames() {
        let bpm = create_test_bpm(2);

        let _guard1 = bpm.new_page().unwrap();
        let _guard2 = bpm.new_page().unwrap();

        assert!(bpm.new_page().is_err());
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        use std::thread;

        let bpm = Arc::new(create_test_bpm(10));

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0x42;
        }

        let mut handles = vec![];
        for _ in 0..10 {
            let bpm_clone = Arc::clone(&bpm);
            handles.push(thread::spawn(move || {
                let guard = bpm_clone.fetch_page_read(PageId::new(0)).unwrap();
                assert_eq!(guard.as_slice()[0], 0x42);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
