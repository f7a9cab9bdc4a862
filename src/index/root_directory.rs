use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{IndexId, PageId, Result, INDEX_ROOTS_PAGE_ID};
use crate::storage::page::IndexRootsPage;

/// Persistent `index_id -> root_page_id` mapping kept in the
/// well-known roots page, plus the index id allocator.
///
/// Each mutation is flushed before returning, so a tree whose root changed is
/// discoverable after reopen even if the pool is never flushed.
#[derive(Clone)]
pub struct RootDirectory {
    bpm: Arc<BufferPoolManager>,
}

impl RootDirectory {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self { bpm }
    }

    /// Root recorded for `index_id`. `Some(INVALID_PAGE_ID)` means the index
    /// exists but is empty.
    pub fn get_root(&self, index_id: IndexId) -> Result<Option<PageId>> {
        let guard = self.bpm.fetch_page_read(INDEX_ROOTS_PAGE_ID)?;
        let page = IndexRootsPage::new(guard.data());
        if !page.is_initialized() {
            return Ok(None);
        }
        Ok(page.get_root_id(index_id))
    }

    /// Inserts or updates the root of `index_id`.
    pub fn set_root(&self, index_id: IndexId, root: PageId) -> Result<()> {
        {
            let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
            let mut page = IndexRootsPage::new(guard.data_mut());
            if !page.is_initialized() {
                page.init();
            }
            page.observe_index_id(index_id)?;
            if !page.update(index_id, root) {
                page.insert(index_id, root)?;
            }
        }
        self.bpm.flush_page(INDEX_ROOTS_PAGE_ID)?;
        debug!(index_id, %root, "updated index root");
        Ok(())
    }

    /// Drops the entry of `index_id`. Returns whether it existed.
    pub fn remove_root(&self, index_id: IndexId) -> Result<bool> {
        let removed = {
            let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
            let mut page = IndexRootsPage::new(guard.data_mut());
            page.is_initialized() && page.delete(index_id)
        };
        if removed {
            self.bpm.flush_page(INDEX_ROOTS_PAGE_ID)?;
            debug!(index_id, "removed index root");
        }
        Ok(removed)
    }

    /// Hands out an index id no existing or previous index has used.
    pub fn allocate_index_id(&self) -> Result<IndexId> {
        let id = {
            let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
            let mut page = IndexRootsPage::new(guard.data_mut());
            if !page.is_initialized() {
                page.init();
            }
            page.allocate_index_id()?
        };
        self.bpm.flush_page(INDEX_ROOTS_PAGE_ID)?;
        Ok(id)
    }

    /// Every recorded `(index_id, root_page_id)` pair.
    pub fn entries(&self) -> Result<Vec<(IndexId, PageId)>> {
        let guard = self.bpm.fetch_page_read(INDEX_ROOTS_PAGE_ID)?;
        let page = IndexRootsPage::new(guard.data());
        if !page.is_initialized() {
            return Ok(Vec::new());
        }
        Ok(page.entries())
    }
}
