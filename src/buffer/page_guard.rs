use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::common::PageId;

use super::{FrameHeader, PageReadLatch, PageWriteLatch};

/// Callback type for releasing a page guard: unpins `page_id`, reporting
/// whether the holder modified it.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Holds the pin of a guarded page and hands it back on drop.
///
/// Guards declare their latch before this field, so the latch is always
/// released before the page is unpinned.
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Keeps the frame alive for the guard's lifetime
    _frame: Arc<FrameHeader>,
    /// Callback to release the pin
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was modified through this guard
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }
}

impl Drop for PageGuardBase {
    fn drop(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for read-only access to a pinned page.
/// Releases the read latch and unpins the page when dropped.
pub struct ReadPageGuard {
    latch: PageReadLatch,
    base: PageGuardBase,
}

impl ReadPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let latch = frame.read_latch();
        Self {
            latch,
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// RAII guard for read-write access to a pinned page.
/// Any mutable access marks the page dirty; dropping the guard releases the
/// write latch and then unpins the page with that dirty flag.
pub struct WritePageGuard {
    latch: PageWriteLatch,
    base: PageGuardBase,
}

impl WritePageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let latch = frame.write_latch();
        Self {
            latch,
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.latch[..]
    }

    /// Returns whether this guard has handed out mutable access.
    pub fn is_dirty(&self) -> bool {
        self.base.is_dirty
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}
