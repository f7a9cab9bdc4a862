use crate::common::{PageId, Result};

/// Fixed-size block storage addressed by logical page id.
///
/// The buffer pool is the only client. Implementations must be safe to call
/// from the disk scheduler thread and from the pool concurrently.
pub trait PageStore: Send + Sync {
    /// Reads page `page_id` into `data` (exactly `PAGE_SIZE` bytes).
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()>;

    /// Writes `data` (exactly `PAGE_SIZE` bytes) as the contents of `page_id`.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Hands out a fresh, zeroed logical page id. Reserved ids are never returned.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns `page_id` to the store for reuse.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// True when `page_id` is not currently allocated.
    fn is_page_free(&self, page_id: PageId) -> bool;
}
