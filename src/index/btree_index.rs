use std::cmp::Ordering as KeyOrdering;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, trace, warn};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{IndexId, PageId, PagodaError, Result, RowId, INVALID_PAGE_ID};

use super::btree_internal_page::InternalNode;
use super::btree_leaf_page::LeafNode;
use super::btree_page::{internal_page_capacity, leaf_page_capacity, IndexPageType, TreePage};
use super::{IndexIterator, KeyComparator, RootDirectory};

/// Fanout settings of a tree. Unset values use the largest fanout a page
/// holds for the index's key size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BPlusTreeOptions {
    pub leaf_max_size: Option<usize>,
    pub internal_max_size: Option<usize>,
}

impl BPlusTreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf_max_size(mut self, max_size: usize) -> Self {
        self.leaf_max_size = Some(max_size);
        self
    }

    pub fn internal_max_size(mut self, max_size: usize) -> Self {
        self.internal_max_size = Some(max_size);
        self
    }

    /// Returns `(leaf_max_size, internal_max_size)` for keys of `key_size` bytes.
    ///
    /// A leaf splits as soon as it reaches its max size, so that many pairs
    /// must fit in a page. An internal page splits only once it exceeds its
    /// max size and must hold one pair more.
    pub fn resolve(&self, key_size: usize) -> Result<(usize, usize)> {
        if key_size == 0 {
            return Err(PagodaError::InvalidConfig("key size must be positive".to_string()));
        }
        let leaf_capacity = leaf_page_capacity(key_size);
        let internal_capacity = internal_page_capacity(key_size);

        let leaf = self
            .leaf_max_size
            .unwrap_or_else(|| leaf_capacity.saturating_sub(1));
        let internal = self
            .internal_max_size
            .unwrap_or_else(|| internal_capacity.saturating_sub(1));

        if leaf < 2 || leaf > leaf_capacity {
            return Err(PagodaError::InvalidConfig(format!(
                "leaf_max_size {} must be within 2..={} for {}-byte keys",
                leaf, leaf_capacity, key_size
            )));
        }
        if internal < 3 || internal + 1 > internal_capacity {
            return Err(PagodaError::InvalidConfig(format!(
                "internal_max_size {} must be within 3..={} for {}-byte keys",
                internal,
                internal_capacity.saturating_sub(1),
                key_size
            )));
        }
        Ok((leaf, internal))
    }
}

fn corruption(page_id: PageId, what: impl std::fmt::Display) -> PagodaError {
    PagodaError::IndexCorrupted(format!("page {}: {}", page_id, what))
}

fn checked_type(page_id: PageId, data: &[u8]) -> Result<IndexPageType> {
    match TreePage::new(data).page_type() {
        IndexPageType::Invalid => Err(corruption(page_id, "not a b+ tree page")),
        page_type => Ok(page_type),
    }
}

/// A unique-key B+ tree whose nodes live in buffer pool pages.
///
/// Concurrency: the tree latch (`root`) is held shared by lookups and
/// iterator steps and exclusively by inserts, removals and destroy, so
/// structural changes never interleave. Page latches are still taken on
/// every node access. Writers hold the latches of every ancestor a split or
/// merge could reach and release them as soon as a child is known to absorb
/// the change.
pub struct BPlusTree {
    index_id: IndexId,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Tree latch guarding the cached root page id
    root: RwLock<PageId>,
    /// Bumped by every successful mutation; iterators re-seek when it moves
    version: AtomicU64,
    directory: RootDirectory,
}

impl BPlusTree {
    /// Opens the index `index_id`, reading its root from the root directory.
    /// An index with no directory entry starts out empty.
    pub fn new(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        options: BPlusTreeOptions,
    ) -> Result<Self> {
        let key_size = comparator.key_size();
        let (leaf_max_size, internal_max_size) = options.resolve(key_size)?;
        let directory = RootDirectory::new(Arc::clone(&bpm));
        let root = directory.get_root(index_id)?.unwrap_or(INVALID_PAGE_ID);

        if root.is_valid() {
            let guard = bpm.fetch_page_read(root)?;
            checked_type(root, guard.data())?;
            let stored = TreePage::new(guard.data()).key_size();
            if stored != key_size {
                return Err(PagodaError::KeySizeMismatch {
                    expected: stored,
                    actual: key_size,
                });
            }
        }

        debug!(index_id, %root, leaf_max_size, internal_max_size, "opened b+ tree");
        Ok(Self {
            index_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(root),
            version: AtomicU64::new(0),
            directory,
        })
    }

    /// Opens an index that must already have a root directory entry.
    pub fn open(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        options: BPlusTreeOptions,
    ) -> Result<Self> {
        if RootDirectory::new(Arc::clone(&bpm)).get_root(index_id)?.is_none() {
            return Err(PagodaError::IndexNotFound(index_id));
        }
        Self::new(index_id, bpm, comparator, options)
    }

    /// Creates a new, empty index under a freshly allocated index id.
    pub fn create(
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        options: BPlusTreeOptions,
    ) -> Result<Self> {
        options.resolve(comparator.key_size())?;
        let directory = RootDirectory::new(Arc::clone(&bpm));
        let index_id = directory.allocate_index_id()?;
        directory.set_root(index_id, INVALID_PAGE_ID)?;
        Self::new(index_id, bpm, comparator, options)
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub fn comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.comparator
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    pub(crate) fn read_root(&self) -> RwLockReadGuard<'_, PageId> {
        self.root.read()
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn cmp(&self) -> &dyn KeyComparator {
        self.comparator.as_ref()
    }

    fn key_size(&self) -> usize {
        self.comparator.key_size()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(PagodaError::KeySizeMismatch {
                expected: self.key_size(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.check_key(key)?;
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(None);
        }
        let guard = self.find_leaf_read(*root, Some(key))?;
        Ok(LeafNode::new(guard.data()).lookup(key, self.cmp()))
    }

    /// Descends to the leaf that may hold `key`, or the leftmost leaf for
    /// `None`, read-latching one level at a time.
    fn find_leaf_read(&self, root: PageId, key: Option<&[u8]>) -> Result<ReadPageGuard> {
        let mut guard = self.bpm.fetch_page_read(root)?;
        loop {
            let child = match checked_type(guard.page_id(), guard.data())? {
                IndexPageType::Internal => {
                    let node = InternalNode::new(guard.data());
                    match key {
                        Some(key) => node.lookup(key, self.cmp()),
                        None => node.value_at(0),
                    }
                }
                _ => return Ok(guard),
            };
            guard = self.bpm.fetch_page_read(child)?;
        }
    }

    /// Descends to the leaf for `key` with write latches. Ancestors are kept
    /// latched until a node for which `safe` holds is reached. The returned
    /// path starts at that node (or the root) and ends at the leaf's parent.
    fn descend_write(
        &self,
        root: PageId,
        key: &[u8],
        safe: impl Fn(&TreePage<&[u8]>) -> bool,
    ) -> Result<(Vec<WritePageGuard>, WritePageGuard)> {
        let mut path = Vec::new();
        let mut guard = self.bpm.fetch_page_write(root)?;
        loop {
            let child = match checked_type(guard.page_id(), guard.data())? {
                IndexPageType::Internal => {
                    let node = InternalNode::new(guard.data());
                    if safe(&*node) {
                        path.clear();
                    }
                    node.lookup(key, self.cmp())
                }
                _ => return Ok((path, guard)),
            };
            path.push(guard);
            guard = self.bpm.fetch_page_write(child)?;
        }
    }

    /// Inserts a unique key. Returns false, leaving the tree untouched, if the
    /// key is already present.
    pub fn insert(&self, key: &[u8], value: RowId) -> Result<bool> {
        self.check_key(key)?;
        let mut root = self.root.write();

        if !root.is_valid() {
            self.start_new_tree(&mut root, key, value)?;
            self.bump_version();
            return Ok(true);
        }

        let (path, mut leaf_guard) =
            self.descend_write(*root, key, |node| node.size() < node.max_size())?;

        let leaf_overflows = {
            let leaf = LeafNode::new(leaf_guard.data());
            if leaf.lookup(key, self.cmp()).is_some() {
                return Ok(false);
            }
            leaf.size() + 1 >= leaf.max_size()
        };

        if !leaf_overflows {
            drop(path);
            LeafNode::new(leaf_guard.data_mut()).insert(key, value, self.cmp());
            self.bump_version();
            return Ok(true);
        }

        // Allocate every page the split cascade needs before touching a node.
        let overflows = |guard: &WritePageGuard| {
            let node = TreePage::new(guard.data());
            node.size() >= node.max_size()
        };
        let splitting_ancestors = path.iter().filter(|g| overflows(*g)).count();
        let grows_root = path.first().map_or(true, |g| overflows(g));
        let mut fresh = self.allocate_pages(1 + splitting_ancestors + usize::from(grows_root))?;

        LeafNode::new(leaf_guard.data_mut()).insert(key, value, self.cmp());
        let mut sibling_guard = Self::take_fresh(&mut fresh)?;
        let separator = self.split_leaf(&mut leaf_guard, &mut sibling_guard);
        let (left_id, right_id) = (leaf_guard.page_id(), sibling_guard.page_id());
        drop(sibling_guard);
        drop(leaf_guard);

        let result = self.insert_into_parent(&mut root, path, &mut fresh, left_id, separator, right_id);
        self.discard_pages(fresh);
        self.bump_version();
        result.map(|()| true)
    }

    fn start_new_tree(&self, root: &mut PageId, key: &[u8], value: RowId) -> Result<()> {
        let mut guard = self.bpm.new_page_write()?;
        let page_id = guard.page_id();
        {
            let mut leaf = LeafNode::new(guard.data_mut());
            leaf.init(page_id, INVALID_PAGE_ID, self.key_size(), self.leaf_max_size);
            leaf.insert(key, value, self.cmp());
        }
        drop(guard);

        if let Err(e) = self.directory.set_root(self.index_id, page_id) {
            self.discard_pages_by_id(&[page_id]);
            return Err(e);
        }
        *root = page_id;
        debug!(index_id = self.index_id, root = %page_id, "started new tree");
        Ok(())
    }

    fn allocate_pages(&self, count: usize) -> Result<Vec<WritePageGuard>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.bpm.new_page_write() {
                Ok(guard) => pages.push(guard),
                Err(e) => {
                    self.discard_pages(pages);
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    fn take_fresh(fresh: &mut Vec<WritePageGuard>) -> Result<WritePageGuard> {
        fresh.pop().ok_or_else(|| {
            PagodaError::IndexCorrupted("split needed more pages than were reserved".to_string())
        })
    }

    /// Returns unused preallocated pages to the pool.
    fn discard_pages(&self, pages: Vec<WritePageGuard>) {
        let ids: Vec<PageId> = pages.iter().map(|g| g.page_id()).collect();
        drop(pages);
        self.discard_pages_by_id(&ids);
    }

    fn discard_pages_by_id(&self, ids: &[PageId]) {
        for &page_id in ids {
            if let Err(e) = self.delete_node_page(page_id) {
                warn!(%page_id, error = %e, "failed to release unused index page");
            }
        }
    }

    fn delete_node_page(&self, page_id: PageId) -> Result<()> {
        if !self.bpm.delete_page(page_id)? {
            return Err(PagodaError::PageStillPinned(page_id));
        }
        Ok(())
    }

    fn set_parent(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(child)?;
        TreePage::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Moves the upper half of a full leaf into the fresh sibling page and
    /// links it into the leaf chain. Returns the separator for the parent.
    fn split_leaf(&self, leaf_guard: &mut WritePageGuard, sibling_guard: &mut WritePageGuard) -> Vec<u8> {
        let sibling_id = sibling_guard.page_id();
        let mut leaf = LeafNode::new(leaf_guard.data_mut());
        let mut sibling = LeafNode::new(sibling_guard.data_mut());

        sibling.init(sibling_id, leaf.parent_page_id(), self.key_size(), self.leaf_max_size);
        leaf.move_half_to(&mut sibling);
        sibling.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(sibling_id);

        debug!(leaf = %leaf.page_id(), sibling = %sibling_id, "split leaf");
        sibling.key_at(0).to_vec()
    }

    /// Inserts `(key, right_id)` after `left_id` in the parent, splitting
    /// ancestors for as long as they overflow and growing a new root when the
    /// split reaches the top.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        mut path: Vec<WritePageGuard>,
        fresh: &mut Vec<WritePageGuard>,
        mut left_id: PageId,
        mut key: Vec<u8>,
        mut right_id: PageId,
    ) -> Result<()> {
        loop {
            let Some(mut parent_guard) = path.pop() else {
                let mut root_guard = Self::take_fresh(fresh)?;
                let new_root = root_guard.page_id();
                {
                    let mut node = InternalNode::new(root_guard.data_mut());
                    node.init(new_root, INVALID_PAGE_ID, self.key_size(), self.internal_max_size);
                    node.populate_new_root(left_id, &key, right_id);
                }
                drop(root_guard);

                self.set_parent(left_id, new_root)?;
                self.set_parent(right_id, new_root)?;
                self.directory.set_root(self.index_id, new_root)?;
                *root = new_root;
                debug!(index_id = self.index_id, root = %new_root, "grew new root");
                return Ok(());
            };

            let parent_id = parent_guard.page_id();
            let size = InternalNode::new(parent_guard.data_mut()).insert_node_after(left_id, &key, right_id)?;
            if size <= TreePage::new(parent_guard.data()).max_size() {
                return Ok(());
            }

            let mut sibling_guard = Self::take_fresh(fresh)?;
            let sibling_id = sibling_guard.page_id();
            let (separator, moved) = {
                let mut node = InternalNode::new(parent_guard.data_mut());
                let mut sibling = InternalNode::new(sibling_guard.data_mut());
                sibling.init(sibling_id, node.parent_page_id(), self.key_size(), self.internal_max_size);
                let moved = node.move_half_to(&mut sibling);
                (sibling.key_at(0).to_vec(), moved)
            };
            drop(sibling_guard);
            drop(parent_guard);

            for child in moved {
                self.set_parent(child, sibling_id)?;
            }
            debug!(page = %parent_id, sibling = %sibling_id, "split internal page");

            left_id = parent_id;
            key = separator;
            right_id = sibling_id;
        }
    }

    /// Deletes `key`. Returns false if it was not present.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let mut root = self.root.write();
        if !root.is_valid() {
            return Ok(false);
        }

        let (mut path, mut leaf_guard) =
            self.descend_write(*root, key, |node| node.size() > node.min_size())?;

        let underflows = {
            let leaf = LeafNode::new(leaf_guard.data());
            if leaf.lookup(key, self.cmp()).is_none() {
                return Ok(false);
            }
            leaf.size() - 1 < leaf.min_size()
        };
        if !underflows {
            path.clear();
        }

        LeafNode::new(leaf_guard.data_mut()).remove(key, self.cmp());
        let result = if underflows {
            self.coalesce_or_redistribute(&mut root, path, leaf_guard)
        } else {
            Ok(())
        };
        self.bump_version();
        result.map(|()| true)
    }

    /// Restores the size invariant upward from an underfull node. Pages
    /// emptied by merges are deleted once every latch has been released.
    fn coalesce_or_redistribute(
        &self,
        root: &mut PageId,
        mut path: Vec<WritePageGuard>,
        mut node_guard: WritePageGuard,
    ) -> Result<()> {
        let mut emptied = Vec::new();
        let result = loop {
            let underfull = {
                let node = TreePage::new(node_guard.data());
                node.size() < node.min_size()
            };
            if !underfull {
                break Ok(());
            }
            let Some(mut parent_guard) = path.pop() else {
                break self.adjust_root(root, node_guard, &mut emptied);
            };
            if let Err(e) = self.rebalance_with_sibling(&mut parent_guard, node_guard, &mut emptied) {
                break Err(e);
            }
            node_guard = parent_guard;
        };
        drop(path);

        for page_id in emptied {
            self.delete_node_page(page_id)?;
        }
        result
    }

    /// Fixes one underfull non-root node using its parent: merge into the left
    /// sibling if both fit one page, else merge the right sibling in, else
    /// borrow one entry (from the left when there is one).
    fn rebalance_with_sibling(
        &self,
        parent_guard: &mut WritePageGuard,
        mut node_guard: WritePageGuard,
        emptied: &mut Vec<PageId>,
    ) -> Result<()> {
        let node_id = node_guard.page_id();
        let (index, left_id, right_id) = {
            let parent = InternalNode::new(parent_guard.data());
            let index = parent
                .value_index(node_id)
                .ok_or_else(|| corruption(parent_guard.page_id(), format!("{} is not a child", node_id)))?;
            let left = (index > 0).then(|| parent.value_at(index - 1));
            let right = (index + 1 < parent.size()).then(|| parent.value_at(index + 1));
            (index, left, right)
        };
        let (is_leaf, node_size, max_size) = {
            let node = TreePage::new(node_guard.data());
            (node.is_leaf(), node.size(), node.max_size())
        };
        let fits = |guard: &WritePageGuard| {
            let total = TreePage::new(guard.data()).size() + node_size;
            if is_leaf {
                total < max_size
            } else {
                total <= max_size
            }
        };

        let mut left_guard = match left_id {
            Some(id) => Some(self.bpm.fetch_page_write(id)?),
            None => None,
        };
        if let Some(left) = left_guard.as_mut() {
            if fits(&*left) {
                self.coalesce(left, &mut node_guard, parent_guard, index)?;
                emptied.push(node_id);
                return Ok(());
            }
        }

        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            if fits(&right_guard) {
                self.coalesce(&mut node_guard, &mut right_guard, parent_guard, index + 1)?;
                emptied.push(right_id);
                return Ok(());
            }
            if left_guard.is_none() {
                return self.redistribute_from_right(&mut node_guard, &mut right_guard, parent_guard, index + 1);
            }
        }

        match left_guard.as_mut() {
            Some(left) => self.redistribute_from_left(left, &mut node_guard, parent_guard, index),
            None => Err(corruption(node_id, "non-root node without siblings")),
        }
    }

    /// Merges `right` into `left` and drops the separator at `right_index`
    /// from the parent. The emptied right page is deleted by the caller.
    fn coalesce(
        &self,
        left_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        right_index: usize,
    ) -> Result<()> {
        let left_id = left_guard.page_id();
        let moved = if TreePage::new(left_guard.data()).is_leaf() {
            let mut left = LeafNode::new(left_guard.data_mut());
            LeafNode::new(right_guard.data_mut()).move_all_to(&mut left);
            Vec::new()
        } else {
            let middle = InternalNode::new(parent_guard.data()).key_at(right_index).to_vec();
            let mut left = InternalNode::new(left_guard.data_mut());
            InternalNode::new(right_guard.data_mut()).move_all_to(&mut left, &middle)
        };
        InternalNode::new(parent_guard.data_mut()).remove(right_index);

        for child in moved {
            self.set_parent(child, left_id)?;
        }
        debug!(into = %left_id, from = %right_guard.page_id(), "coalesced pages");
        Ok(())
    }

    /// Moves the left sibling's last entry to the front of `node`.
    fn redistribute_from_left(
        &self,
        left_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        node_index: usize,
    ) -> Result<()> {
        let node_id = node_guard.page_id();
        let (moved, separator) = if TreePage::new(node_guard.data()).is_leaf() {
            let mut node = LeafNode::new(node_guard.data_mut());
            LeafNode::new(left_guard.data_mut()).move_last_to_front_of(&mut node);
            (None, node.key_at(0).to_vec())
        } else {
            let middle = InternalNode::new(parent_guard.data()).key_at(node_index).to_vec();
            let mut node = InternalNode::new(node_guard.data_mut());
            let child = InternalNode::new(left_guard.data_mut()).move_last_to_front_of(&mut node, &middle);
            (Some(child), node.key_at(0).to_vec())
        };
        InternalNode::new(parent_guard.data_mut()).set_key_at(node_index, &separator);

        if let Some(child) = moved {
            self.set_parent(child, node_id)?;
        }
        trace!(page = %node_id, "borrowed from left sibling");
        Ok(())
    }

    /// Moves the right sibling's first entry to the end of `node`.
    fn redistribute_from_right(
        &self,
        node_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        right_index: usize,
    ) -> Result<()> {
        let node_id = node_guard.page_id();
        let (moved, separator) = if TreePage::new(node_guard.data()).is_leaf() {
            let mut node = LeafNode::new(node_guard.data_mut());
            let mut right = LeafNode::new(right_guard.data_mut());
            right.move_first_to_end_of(&mut node);
            (None, right.key_at(0).to_vec())
        } else {
            let middle = InternalNode::new(parent_guard.data()).key_at(right_index).to_vec();
            let mut node = InternalNode::new(node_guard.data_mut());
            let mut right = InternalNode::new(right_guard.data_mut());
            let child = right.move_first_to_end_of(&mut node, &middle);
            (Some(child), right.key_at(0).to_vec())
        };
        InternalNode::new(parent_guard.data_mut()).set_key_at(right_index, &separator);

        if let Some(child) = moved {
            self.set_parent(child, node_id)?;
        }
        trace!(page = %node_id, "borrowed from right sibling");
        Ok(())
    }

    /// Handles an underfull root: an empty root leaf empties the tree, and an
    /// internal root with a single child hands the root over to that child.
    fn adjust_root(
        &self,
        root: &mut PageId,
        mut root_guard: WritePageGuard,
        emptied: &mut Vec<PageId>,
    ) -> Result<()> {
        let old_root = root_guard.page_id();
        let (is_leaf, size) = {
            let node = TreePage::new(root_guard.data());
            (node.is_leaf(), node.size())
        };

        if is_leaf && size == 0 {
            drop(root_guard);
            self.directory.set_root(self.index_id, INVALID_PAGE_ID)?;
            *root = INVALID_PAGE_ID;
            emptied.push(old_root);
            debug!(index_id = self.index_id, "tree is now empty");
        } else if !is_leaf && size == 1 {
            let child = InternalNode::new(root_guard.data()).value_at(0);
            self.set_parent(child, INVALID_PAGE_ID)?;
            self.directory.set_root(self.index_id, child)?;
            *root = child;
            InternalNode::new(root_guard.data_mut()).remove_and_return_only_child();
            drop(root_guard);
            emptied.push(old_root);
            debug!(index_id = self.index_id, root = %child, "collapsed root");
        }
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<'_>> {
        IndexIterator::new(self, None)
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator<'_>> {
        self.check_key(key)?;
        IndexIterator::new(self, Some(key.to_vec()))
    }

    /// The exhausted iterator every finished scan compares equal to.
    pub fn end(&self) -> IndexIterator<'_> {
        IndexIterator::end(self)
    }

    /// Leaf position of the first entry `>= key` (or `> key` when
    /// `skip_equal`), moving past exhausted leaves. `(INVALID_PAGE_ID, 0)`
    /// when no such entry exists.
    pub(crate) fn seek_position(
        &self,
        root: PageId,
        key: Option<&[u8]>,
        skip_equal: bool,
    ) -> Result<(PageId, usize)> {
        if !root.is_valid() {
            return Ok((INVALID_PAGE_ID, 0));
        }
        let mut guard = self.find_leaf_read(root, key)?;
        let mut index = match key {
            None => 0,
            Some(key) => {
                let leaf = LeafNode::new(guard.data());
                let index = leaf.key_index(key, self.cmp());
                if skip_equal
                    && index < leaf.size()
                    && self.cmp().compare(leaf.key_at(index), key) == KeyOrdering::Equal
                {
                    index + 1
                } else {
                    index
                }
            }
        };
        loop {
            let next = {
                let leaf = LeafNode::new(guard.data());
                if index < leaf.size() {
                    return Ok((guard.page_id(), index));
                }
                leaf.next_page_id()
            };
            if !next.is_valid() {
                return Ok((INVALID_PAGE_ID, 0));
            }
            guard = self.bpm.fetch_page_read(next)?;
            index = 0;
        }
    }

    /// Frees every page of the tree and removes it from the root directory.
    pub fn destroy(&self) -> Result<()> {
        let mut root = self.root.write();
        if root.is_valid() {
            let mut pending = vec![*root];
            let mut pages = Vec::new();
            while let Some(page_id) = pending.pop() {
                let guard = self.bpm.fetch_page_read(page_id)?;
                if checked_type(page_id, guard.data())? == IndexPageType::Internal {
                    pending.extend(InternalNode::new(guard.data()).children());
                }
                pages.push(page_id);
            }
            for page_id in pages {
                self.delete_node_page(page_id)?;
            }
            *root = INVALID_PAGE_ID;
        }
        self.directory.remove_root(self.index_id)?;
        self.bump_version();
        debug!(index_id = self.index_id, "destroyed b+ tree");
        Ok(())
    }

    /// Walks the whole tree and verifies the structural invariants: header
    /// ids and parent pointers, key order and separator bounds, node sizes,
    /// uniform leaf depth and the leaf sibling chain.
    pub fn check_integrity(&self) -> Result<()> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(());
        }

        let mut walk = IntegrityWalk {
            leaf_depth: None,
            leaves: Vec::new(),
        };
        self.check_subtree(*root, INVALID_PAGE_ID, None, None, 0, &mut walk)?;

        for pair in walk.leaves.windows(2) {
            let (page_id, next) = pair[0];
            if next != pair[1].0 {
                return Err(corruption(page_id, format!("next leaf is {}, expected {}", next, pair[1].0)));
            }
        }
        if let Some(&(page_id, next)) = walk.leaves.last() {
            if next.is_valid() {
                return Err(corruption(page_id, "last leaf has a successor"));
            }
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        parent_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        walk: &mut IntegrityWalk,
    ) -> Result<()> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        let page_type = checked_type(page_id, guard.data())?;
        let page = TreePage::new(guard.data());

        if page.page_id() != page_id {
            return Err(corruption(page_id, format!("header names {}", page.page_id())));
        }
        if page.parent_page_id() != parent_id {
            return Err(corruption(
                page_id,
                format!("parent is {}, expected {}", page.parent_page_id(), parent_id),
            ));
        }
        if page.key_size() != self.key_size() {
            return Err(corruption(page_id, "key size differs from the index"));
        }
        if page.size() > page.max_size() || page.size() < page.min_size() {
            return Err(corruption(
                page_id,
                format!("size {} outside {}..={}", page.size(), page.min_size(), page.max_size()),
            ));
        }

        let cmp = self.cmp();
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| cmp.compare(key, lo) != KeyOrdering::Less)
                && upper.map_or(true, |hi| cmp.compare(key, hi) == KeyOrdering::Less)
        };

        if page_type == IndexPageType::Leaf {
            let leaf = LeafNode::new(guard.data());
            for i in 0..leaf.size() {
                if !in_bounds(leaf.key_at(i)) {
                    return Err(corruption(page_id, format!("key {} outside separator bounds", i)));
                }
                if i > 0 && cmp.compare(leaf.key_at(i - 1), leaf.key_at(i)) != KeyOrdering::Less {
                    return Err(corruption(page_id, format!("keys {} and {} out of order", i - 1, i)));
                }
            }
            let expected = *walk.leaf_depth.get_or_insert(depth);
            if expected != depth {
                return Err(corruption(page_id, format!("leaf at depth {}, expected {}", depth, expected)));
            }
            walk.leaves.push((page_id, leaf.next_page_id()));
            return Ok(());
        }

        let node = InternalNode::new(guard.data());
        let children = node.children();
        let separators: Vec<Vec<u8>> = (1..node.size()).map(|i| node.key_at(i).to_vec()).collect();
        for (i, key) in separators.iter().enumerate() {
            if !in_bounds(key) {
                return Err(corruption(page_id, format!("separator {} outside parent bounds", i + 1)));
            }
            if i > 0 && cmp.compare(&separators[i - 1], key) != KeyOrdering::Less {
                return Err(corruption(page_id, format!("separators {} and {} out of order", i, i + 1)));
            }
        }
        drop(guard);

        for (i, &child) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(separators[i - 1].as_slice()) };
            let child_upper = separators.get(i).map(|k| k.as_slice()).or(upper);
            self.check_subtree(child, page_id, child_lower, child_upper, depth + 1, walk)?;
        }
        Ok(())
    }

    /// Renders the tree in Graphviz DOT format.
    pub fn to_dot(&self) -> Result<String> {
        let root = self.root.read();
        let mut out = String::from("digraph G {\n");
        if root.is_valid() {
            self.dot_subtree(*root, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn dot_subtree(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        let page_type = checked_type(page_id, guard.data())?;
        let page = TreePage::new(guard.data());
        let id = page_id.as_i32();
        let parent = page.parent_page_id();
        let summary = format!(
            "<TR><TD COLSPAN=\"{n}\">P={id},Parent={parent}</TD></TR>\n\
             <TR><TD COLSPAN=\"{n}\">max_size={max},min_size={min},size={size}</TD></TR>\n",
            n = page.size().max(1),
            size = page.size(),
            id = id,
            parent = parent.as_i32(),
            max = page.max_size(),
            min = page.min_size(),
        );
        const TABLE: &str = "<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\" CELLPADDING=\"4\">";

        if page_type == IndexPageType::Leaf {
            let leaf = LeafNode::new(guard.data());
            let _ = write!(out, "LEAF_{id}[shape=plain color=green label=<{TABLE}\n{summary}<TR>");
            for i in 0..leaf.size() {
                let _ = write!(out, "<TD>{}</TD>", self.cmp().format_key(leaf.key_at(i)));
            }
            let _ = writeln!(out, "</TR></TABLE>>];");
            let next = leaf.next_page_id();
            if next.is_valid() {
                let next = next.as_i32();
                let _ = writeln!(out, "LEAF_{id} -> LEAF_{next};");
                let _ = writeln!(out, "{{rank=same LEAF_{id} LEAF_{next}}};");
            }
            if parent.is_valid() {
                let _ = writeln!(out, "INT_{}:p{id} -> LEAF_{id};", parent.as_i32());
            }
            return Ok(());
        }

        let node = InternalNode::new(guard.data());
        let _ = write!(out, "INT_{id}[shape=plain color=pink label=<{TABLE}\n{summary}<TR>");
        for i in 0..node.size() {
            let label = if i == 0 {
                " ".to_string()
            } else {
                self.cmp().format_key(node.key_at(i))
            };
            let _ = write!(out, "<TD PORT=\"p{}\">{}</TD>", node.value_at(i).as_i32(), label);
        }
        let _ = writeln!(out, "</TR></TABLE>>];");
        if parent.is_valid() {
            let _ = writeln!(out, "INT_{}:p{id} -> INT_{id};", parent.as_i32());
        }
        let children = node.children();
        drop(guard);

        for child in children {
            self.dot_subtree(child, out)?;
        }
        Ok(())
    }
}

struct IntegrityWalk {
    leaf_depth: Option<usize>,
    /// `(leaf, next_page_id)` in key order
    leaves: Vec<(PageId, PageId)>,
}
