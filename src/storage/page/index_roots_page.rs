use crate::common::codec::{read_i32, read_u32, write_i32, write_u32};
use crate::common::{IndexId, PageId, PagodaError, Result, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x5044_4741; // "PDGA"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const COUNT_OFFSET: usize = 8;
const NEXT_INDEX_ID_OFFSET: usize = 12;
const ENTRIES_OFFSET: usize = 16;

const ENTRY_SIZE: usize = 8; // index_id (4) + root_page_id (4)

/// Maximum number of indexes one roots page can describe.
pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

/// Layout of the well-known page mapping `index_id -> root_page_id`.
///
/// It also stores the next unused index id so ids survive a reopen. A page of
/// all zeros reads as uninitialized; callers run [`IndexRootsPage::init`]
/// before the first mutation.
pub struct IndexRootsPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> IndexRootsPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn is_initialized(&self) -> bool {
        read_u32(self.data.as_ref(), MAGIC_OFFSET) == MAGIC_NUMBER
    }

    pub fn version(&self) -> u32 {
        read_u32(self.data.as_ref(), VERSION_OFFSET)
    }

    pub fn count(&self) -> usize {
        read_u32(self.data.as_ref(), COUNT_OFFSET) as usize
    }

    pub fn next_index_id(&self) -> IndexId {
        read_u32(self.data.as_ref(), NEXT_INDEX_ID_OFFSET)
    }

    fn entry_offset(index: usize) -> usize {
        ENTRIES_OFFSET + index * ENTRY_SIZE
    }

    /// Returns the `index`-th `(index_id, root_page_id)` entry.
    pub fn entry(&self, index: usize) -> Option<(IndexId, PageId)> {
        if index >= self.count() {
            return None;
        }
        let offset = Self::entry_offset(index);
        let data = self.data.as_ref();
        Some((read_u32(data, offset), PageId::new(read_i32(data, offset + 4))))
    }

    fn position(&self, index_id: IndexId) -> Option<usize> {
        (0..self.count()).find(|&i| read_u32(self.data.as_ref(), Self::entry_offset(i)) == index_id)
    }

    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        self.position(index_id)
            .and_then(|i| self.entry(i))
            .map(|(_, root)| root)
    }

    pub fn entries(&self) -> Vec<(IndexId, PageId)> {
        (0..self.count()).filter_map(|i| self.entry(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<B> {
    pub fn init(&mut self) {
        let data = self.data.as_mut();
        data.fill(0);
        write_u32(data, MAGIC_OFFSET, MAGIC_NUMBER);
        write_u32(data, VERSION_OFFSET, VERSION);
        write_u32(data, COUNT_OFFSET, 0);
        write_u32(data, NEXT_INDEX_ID_OFFSET, 0);
    }

    fn set_count(&mut self, count: usize) {
        write_u32(self.data.as_mut(), COUNT_OFFSET, count as u32);
    }

    fn set_entry(&mut self, index: usize, index_id: IndexId, root: PageId) {
        let offset = Self::entry_offset(index);
        let data = self.data.as_mut();
        write_u32(data, offset, index_id);
        write_i32(data, offset + 4, root.as_i32());
    }

    /// Adds a new entry. Returns false if `index_id` is already present.
    pub fn insert(&mut self, index_id: IndexId, root: PageId) -> Result<bool> {
        if self.position(index_id).is_some() {
            return Ok(false);
        }
        let count = self.count();
        if count >= MAX_INDEX_ROOTS {
            return Err(PagodaError::RootDirectoryFull);
        }
        self.set_entry(count, index_id, root);
        self.set_count(count + 1);
        Ok(true)
    }

    /// Rewrites the root of an existing entry. Returns false if it is missing.
    pub fn update(&mut self, index_id: IndexId, root: PageId) -> bool {
        match self.position(index_id) {
            Some(i) => {
                self.set_entry(i, index_id, root);
                true
            }
            None => false,
        }
    }

    /// Removes an entry, keeping the remaining ones in insertion order.
    pub fn delete(&mut self, index_id: IndexId) -> bool {
        let Some(pos) = self.position(index_id) else {
            return false;
        };
        let count = self.count();
        let start = Self::entry_offset(pos + 1);
        let end = Self::entry_offset(count);
        self.data
            .as_mut()
            .copy_within(start..end, Self::entry_offset(pos));
        self.set_count(count - 1);
        true
    }

    /// Hands out the next index id and advances the persisted counter.
    /// The counter is left unchanged when no id follows the next one.
    pub fn allocate_index_id(&mut self) -> Result<IndexId> {
        let id = self.next_index_id();
        let next = id.checked_add(1).ok_or(PagodaError::IndexIdsExhausted(id))?;
        write_u32(self.data.as_mut(), NEXT_INDEX_ID_OFFSET, next);
        Ok(id)
    }

    /// Makes sure ids handed out later never collide with `index_id`.
    pub fn observe_index_id(&mut self, index_id: IndexId) -> Result<()> {
        if index_id >= self.next_index_id() {
            let next = index_id
                .checked_add(1)
                .ok_or(PagodaError::IndexIdsExhausted(index_id))?;
            write_u32(self.data.as_mut(), NEXT_INDEX_ID_OFFSET, next);
        }
        Ok(())
    }
}
