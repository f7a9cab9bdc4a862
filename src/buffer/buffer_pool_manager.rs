use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::common::{FrameId, PageId, PagodaError, Result};
use crate::storage::disk::{DiskScheduler, PageStore};

use super::{FrameHeader, LruReplacer, ReadPageGuard, Replacer, WritePageGuard};

/// Bookkeeping guarded by the single pool latch. Every pin-count change that
/// can race with an eviction decision happens while this is locked.
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page, always used before evicting
    free_list: VecDeque<FrameId>,
    /// Eviction policy over unpinned frames
    replacer: Box<dyn Replacer>,
}

/// Internal state shared with page guards
struct PoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Pool-wide critical section
    inner: Mutex<PoolInner>,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl PoolState {
    fn frame(&self, frame_id: FrameId) -> &Arc<FrameHeader> {
        &self.frames[frame_id.as_usize()]
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = self.frame(frame_id);

        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    inner.replacer.unpin(frame_id);
                }
                true
            }
        }
    }

    /// Picks a frame for a new resident page: the free list first, then a
    /// victim from the replacer. A dirty victim is written back before its
    /// page-table entry is dropped; if that write fails the victim stays
    /// resident and evictable.
    ///
    /// Frames held by an in-flight flush are still tracked by the replacer
    /// but carry a pin, so they are passed over.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner
            .replacer
            .victim_where(&|id| self.frame(id).pin_count() == 0)
            .ok_or(PagodaError::OutOfFrames)?;
        let frame = self.frame(frame_id);
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let written = {
                let data = frame.read_data();
                self.disk_scheduler.schedule_write_sync(old_page_id, &data[..])
            };
            if let Err(e) = written {
                inner.replacer.unpin(frame_id);
                return Err(e);
            }
            frame.set_dirty(false);
        }

        inner.page_table.remove(&old_page_id);
        debug!(%frame_id, page_id = %old_page_id, "evicted page");
        Ok(frame_id)
    }

    fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let mut inner = self.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(self.frame(frame_id));
            frame.pin();
            frame
        };

        // The pin keeps the frame resident while the pool lock is released.
        // Flushing leaves the replacer order untouched.
        let written = {
            let data = frame.read_data();
            let was_dirty = frame.is_dirty();
            frame.set_dirty(false);
            let written = self.disk_scheduler.schedule_write_sync(page_id, &data[..]);
            if written.is_err() && was_dirty {
                frame.set_dirty(true);
            }
            written
        };

        // Registers the frame only if it was pinned by a client that let go
        // during the write; an already evictable frame keeps its position.
        self.unpin_page(page_id, false);
        written?;
        trace!(%page_id, "flushed page");
        Ok(true)
    }
}

impl Drop for PoolState {
    fn drop(&mut self) {
        for frame in &self.frames {
            let page_id = frame.page_id();
            if !page_id.is_valid() || !frame.is_dirty() {
                continue;
            }
            let data = frame.read_data();
            if let Err(e) = self.disk_scheduler.schedule_write_sync(page_id, &data[..]) {
                warn!(%page_id, error = %e, "failed to flush page on shutdown");
            }
        }
    }
}

/// BufferPoolManager is responsible for fetching database pages from the page
/// store and caching them in a fixed number of frames.
///
/// Frame bookkeeping (page table, free list, replacer) lives behind one mutex;
/// each frame's bytes are additionally protected by their own latch. Pages are
/// used either through the raw pin API (`fetch_page` / `new_page` paired with
/// `unpin_page`) or through RAII guards that unpin on drop.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size over the
    /// given page store, evicting with LRU.
    pub fn new(pool_size: usize, page_store: Arc<dyn PageStore>) -> Self {
        Self::with_replacer(pool_size, page_store, Box::new(LruReplacer::new(pool_size)))
    }

    /// Creates a new BufferPoolManager with a caller-supplied eviction policy.
    pub fn with_replacer(
        pool_size: usize,
        page_store: Arc<dyn PageStore>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer,
            }),
            disk_scheduler: DiskScheduler::new(page_store),
        });

        Self { pool_size, state }
    }

    /// Pins page `page_id`, reading it from the page store if it is not
    /// resident. Every successful call must be paired with `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if !page_id.is_valid() {
            return Err(PagodaError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = Arc::clone(self.state.frame(frame_id));
            frame.pin();
            inner.replacer.pin(frame_id);
            return Ok(frame);
        }

        let frame_id = self.state.acquire_frame(&mut inner)?;
        let frame = Arc::clone(self.state.frame(frame_id));
        frame.reset();

        let loaded = {
            let mut data = frame.write_data();
            self.state
                .disk_scheduler
                .schedule_read_sync(page_id, &mut data[..])
        };
        if let Err(e) = loaded {
            frame.reset();
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        trace!(%page_id, %frame_id, "fetched page from disk");
        Ok(frame)
    }

    /// Allocates a fresh page in the page store and pins a zeroed frame for it.
    /// Fails with `OutOfFrames` before allocating if no frame can be freed.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let mut inner = self.state.inner.lock();

        let frame_id = self.state.acquire_frame(&mut inner)?;
        let page_id = match self.state.disk_scheduler.page_store().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.state.frame(frame_id).reset();
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = Arc::clone(self.state.frame(frame_id));
        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        trace!(%page_id, %frame_id, "created page");
        Ok((page_id, frame))
    }

    /// Drops one pin on `page_id`, OR-ing in `is_dirty`. Returns false if the
    /// page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin_page(page_id, is_dirty)
    }

    /// Deletes a page from the buffer pool and returns its id to the page store.
    ///
    /// Returns `Ok(false)` while the page is pinned. A page that is not
    /// resident is only reclaimed in the store, and reported as deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() || page_id.is_reserved() {
            return Err(PagodaError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();
        let store = self.state.disk_scheduler.page_store();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            if !store.is_page_free(page_id) {
                store.deallocate_page(page_id)?;
            }
            return Ok(true);
        };

        let frame = self.state.frame(frame_id);
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        store.deallocate_page(page_id)?;
        trace!(%page_id, "deleted page");
        Ok(true)
    }

    /// Writes a resident page to the page store, dirty or not.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.state.flush_page(page_id)
    }

    /// Flushes every resident page to the page store.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = self.state.inner.lock().page_table.keys().copied().collect();
        for page_id in resident {
            self.state.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Fetches a page and latches it for reading.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Fetches a page and latches it for writing.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Allocates a new page and returns it latched for writing.
    pub fn new_page_write(&self) -> Result<WritePageGuard> {
        let (page_id, frame) = self.new_page()?;
        let mut guard = WritePageGuard::new(page_id, frame, self.release_callback());
        // A fresh page must reach disk even if the caller never writes to it.
        guard.data_mut();
        Ok(guard)
    }

    fn release_callback(&self) -> super::page_guard::ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            if !state.unpin_page(page_id, is_dirty) {
                warn!(%page_id, "page guard released an unpinned page");
            }
        })
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frame(frame_id).pin_count())
    }

    /// Returns whether `page_id` currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Returns the number of frames the replacer could evict right now.
    pub fn evictable_count(&self) -> usize {
        self.state.inner.lock().replacer.size()
    }

    /// Debug helper: true if no resident page is pinned. Logs every leak.
    pub fn check_all_unpinned(&self) -> bool {
        let inner = self.state.inner.lock();
        let mut all_unpinned = true;
        for (&page_id, &frame_id) in &inner.page_table {
            let pins = self.state.frame(frame_id).pin_count();
            if pins != 0 {
                warn!(%page_id, pins, "page still pinned");
                all_unpinned = false;
            }
        }
        all_unpinned
    }

    /// Returns the page store behind this pool.
    pub fn page_store(&self) -> &Arc<dyn PageStore> {
        self.state.disk_scheduler.page_store()
    }
}
