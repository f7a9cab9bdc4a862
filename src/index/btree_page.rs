use crate::common::codec::{read_i32, read_u32, write_i32, write_u32};
use crate::common::{Lsn, PageId, RowId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

// Common header, shared by leaf and internal pages.
const PAGE_TYPE_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 4;
const LSN_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const MAX_SIZE_OFFSET: usize = 16;
const PARENT_PAGE_ID_OFFSET: usize = 20;
const PAGE_ID_OFFSET: usize = 24;

/// Header size of an internal page; its pairs start here.
pub const INTERNAL_PAGE_HEADER_SIZE: usize = 28;

/// Leaf pages add the sibling pointer after the common header.
pub(crate) const NEXT_PAGE_ID_OFFSET: usize = 28;

/// Header size of a leaf page; its pairs start here.
pub const LEAF_PAGE_HEADER_SIZE: usize = 32;

/// Width of a child pointer in an internal page.
pub(crate) const CHILD_ID_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    Invalid,
    Leaf,
    Internal,
}

impl IndexPageType {
    fn from_u32(raw: u32) -> Self {
        match raw {
            1 => IndexPageType::Leaf,
            2 => IndexPageType::Internal,
            _ => IndexPageType::Invalid,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            IndexPageType::Invalid => 0,
            IndexPageType::Leaf => 1,
            IndexPageType::Internal => 2,
        }
    }
}

/// Number of `(key, row id)` pairs a leaf page can physically hold.
pub fn leaf_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / (key_size + RowId::SIZE)
}

/// Number of `(key, child)` pairs an internal page can physically hold.
pub fn internal_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - INTERNAL_PAGE_HEADER_SIZE) / (key_size + CHILD_ID_SIZE)
}

/// Fixed-layout view over the header every B+ tree page starts with.
///
/// `B` is the page buffer: `&[u8]` for read access, `&mut [u8]` to mutate.
pub struct TreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> TreePage<B> {
    pub fn new(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn page_type(&self) -> IndexPageType {
        IndexPageType::from_u32(read_u32(self.data(), PAGE_TYPE_OFFSET))
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == IndexPageType::Leaf
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }

    pub fn key_size(&self) -> usize {
        read_u32(self.data(), KEY_SIZE_OFFSET) as usize
    }

    pub fn lsn(&self) -> Lsn {
        read_i32(self.data(), LSN_OFFSET)
    }

    pub fn size(&self) -> usize {
        read_u32(self.data(), SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        read_u32(self.data(), MAX_SIZE_OFFSET) as usize
    }

    /// Smallest size a node may have once an operation completes.
    ///
    /// A root leaf may shrink to one entry and a root internal page needs two
    /// children. Other leaves keep `ceil((max - 1) / 2)` entries and other
    /// internal pages `ceil(max / 2)` children.
    pub fn min_size(&self) -> usize {
        let max = self.max_size();
        match (self.is_root(), self.is_leaf()) {
            (true, true) => 1,
            (true, false) => 2,
            (false, true) => max / 2,
            (false, false) => (max + 1) / 2,
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        PageId::new(read_i32(self.data(), PARENT_PAGE_ID_OFFSET))
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_i32(self.data(), PAGE_ID_OFFSET))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreePage<B> {
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Writes a fresh header. The pair area is left untouched.
    pub(crate) fn init_header(
        &mut self,
        page_type: IndexPageType,
        page_id: PageId,
        parent_id: PageId,
        key_size: usize,
        max_size: usize,
    ) {
        self.set_page_type(page_type);
        self.set_key_size(key_size);
        self.set_lsn(INVALID_LSN);
        self.set_size(0);
        self.set_max_size(max_size);
        self.set_parent_page_id(parent_id);
        self.set_page_id(page_id);
    }

    pub fn set_page_type(&mut self, page_type: IndexPageType) {
        write_u32(self.data_mut(), PAGE_TYPE_OFFSET, page_type.as_u32());
    }

    pub fn set_key_size(&mut self, key_size: usize) {
        write_u32(self.data_mut(), KEY_SIZE_OFFSET, key_size as u32);
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        write_i32(self.data_mut(), LSN_OFFSET, lsn);
    }

    pub fn set_size(&mut self, size: usize) {
        write_u32(self.data_mut(), SIZE_OFFSET, size as u32);
    }

    pub fn increase_size(&mut self, amount: isize) {
        let size = self.size() as isize + amount;
        debug_assert!(size >= 0);
        self.set_size(size as usize);
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        write_u32(self.data_mut(), MAX_SIZE_OFFSET, max_size as u32);
    }

    pub fn set_parent_page_id(&mut self, parent_id: PageId) {
        write_i32(self.data_mut(), PARENT_PAGE_ID_OFFSET, parent_id.as_i32());
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        write_i32(self.data_mut(), PAGE_ID_OFFSET, page_id.as_i32());
    }
}
