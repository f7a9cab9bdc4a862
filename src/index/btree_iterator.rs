use crate::common::{PageId, PagodaError, Result, RowId, INVALID_PAGE_ID};

use super::btree_leaf_page::LeafNode;
use super::BPlusTree;

/// Forward scan over the leaf chain of a [`BPlusTree`], yielding entries in
/// ascending key order.
///
/// The iterator holds no latch or pin between steps. Each step takes the
/// tree latch shared; if the tree changed since the previous step the scan
/// re-seeks just past the last key it returned, so it never repeats a key or
/// skips one that was present for the whole scan.
pub struct IndexIterator<'a> {
    tree: &'a BPlusTree,
    page_id: PageId,
    index: usize,
    version: u64,
    /// Key of the last yielded entry
    last_key: Option<Vec<u8>>,
    /// Lower bound the scan started from
    start_key: Option<Vec<u8>>,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn new(tree: &'a BPlusTree, start_key: Option<Vec<u8>>) -> Result<Self> {
        let root = tree.read_root();
        let version = tree.version();
        let (page_id, index) = tree.seek_position(*root, start_key.as_deref(), false)?;
        drop(root);
        Ok(Self {
            tree,
            page_id,
            index,
            version,
            last_key: None,
            start_key,
        })
    }

    pub(crate) fn end(tree: &'a BPlusTree) -> Self {
        Self {
            tree,
            page_id: INVALID_PAGE_ID,
            index: 0,
            version: 0,
            last_key: None,
            start_key: None,
        }
    }

    pub fn is_end(&self) -> bool {
        !self.page_id.is_valid()
    }

    /// Current `(leaf page, slot)` position.
    pub fn position(&self) -> (PageId, usize) {
        (self.page_id, self.index)
    }

    fn set_end(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.index = 0;
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, RowId)>> {
        if self.is_end() {
            return Ok(None);
        }

        let tree = self.tree;
        let root = tree.read_root();
        let version = tree.version();
        if version != self.version {
            let (page_id, index) = match &self.last_key {
                Some(last) => tree.seek_position(*root, Some(last), true)?,
                None => tree.seek_position(*root, self.start_key.as_deref(), false)?,
            };
            self.page_id = page_id;
            self.index = index;
            self.version = version;
        }

        while self.page_id.is_valid() {
            let guard = tree.bpm().fetch_page_read(self.page_id)?;
            let leaf = LeafNode::new(guard.data());
            if !leaf.is_leaf() {
                return Err(PagodaError::IndexCorrupted(format!(
                    "page {}: scan reached a non-leaf page",
                    self.page_id
                )));
            }

            if self.index < leaf.size() {
                let (key, value) = leaf.item(self.index);
                let key = key.to_vec();
                self.index += 1;
                if self.index == leaf.size() && !leaf.next_page_id().is_valid() {
                    self.set_end();
                }
                self.last_key = Some(key.clone());
                return Ok(Some((key, value)));
            }

            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(None)
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = Result<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.set_end();
                None
            }
            Err(e) => {
                self.set_end();
                Some(Err(e))
            }
        }
    }
}

/// Iterators are equal when they point at the same leaf slot; every
/// exhausted iterator equals [`BPlusTree::end`].
impl PartialEq for IndexIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl std::fmt::Debug for IndexIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("index", &self.index)
            .finish()
    }
}
