use std::fmt;

use super::config::{MAX_VALID_PAGE_ID, RESERVED_PAGE_COUNT};

/// Page identifier type - uniquely identifies a page on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub i32);

impl PageId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }

    /// True for ids a page store could ever hand out or persist.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0 && self.0 < MAX_VALID_PAGE_ID
    }

    /// True for the low metadata pages (root directory, catalog meta).
    pub fn is_reserved(&self) -> bool {
        self.0 >= 0 && self.0 < RESERVED_PAGE_COUNT
    }

    /// Byte offset of this page inside a single-file store.
    pub(crate) fn file_offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Row identifier stored as the value of every leaf entry: the heap page
/// holding the row and the slot inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RowId {
    /// Serialized width inside a leaf page.
    pub const SIZE: usize = 8;

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.slot.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let page_id = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let slot = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self::new(PageId(page_id), slot)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({}, {})", self.page_id.0, self.slot)
    }
}

/// Identifier of an index inside the root directory
pub type IndexId = u32;

/// LSN (Log Sequence Number) stamped into tree page headers. Maintained by the
/// recovery layer; the index only carries it.
pub type Lsn = i32;

/// Invalid LSN constant
pub const INVALID_LSN: Lsn = -1;
