use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Upper bound (exclusive) on logical page ids handed out by a page store
pub const MAX_VALID_PAGE_ID: i32 = 1 << 24;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Capacity of the disk scheduler request queue
pub const DISK_SCHEDULER_QUEUE_DEPTH: usize = 128;

/// Page holding the index root directory (`index_id -> root_page_id`)
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(0);

/// Page reserved for the catalog metadata owned by the layer above
pub const CATALOG_META_PAGE_ID: PageId = PageId(1);

/// Number of low page ids reserved for metadata. Never handed out as data pages.
pub const RESERVED_PAGE_COUNT: i32 = 2;
