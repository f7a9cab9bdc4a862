use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use crate::common::codec::{read_i32, write_i32};
use crate::common::{PageId, PagodaError, Result};

use super::btree_page::{IndexPageType, TreePage, CHILD_ID_SIZE, INTERNAL_PAGE_HEADER_SIZE};
use super::KeyComparator;

/// View over an internal page: the common header, then `size` packed
/// `(key, child page id)` pairs.
///
/// The key of pair 0 is a sentinel and never compared. Child `i` covers the
/// keys in `[key_at(i), key_at(i + 1))`.
pub struct InternalNode<B> {
    page: TreePage<B>,
}

impl<B> Deref for InternalNode<B> {
    type Target = TreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for InternalNode<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<B: AsRef<[u8]>> InternalNode<B> {
    pub fn new(data: B) -> Self {
        Self {
            page: TreePage::new(data),
        }
    }

    fn pair_size(&self) -> usize {
        self.key_size() + CHILD_ID_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        INTERNAL_PAGE_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.data()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::new(read_i32(self.data(), self.pair_offset(index) + self.key_size()))
    }

    /// Position of `child` among this node's children.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// All child page ids in key order.
    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    /// Child whose subtree may contain `key`: the last child whose separator
    /// is `<= key`, or child 0 when `key` sorts before every separator.
    pub fn lookup(&self, key: &[u8], cmp: &dyn KeyComparator) -> PageId {
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }

    fn pairs(&self, from: usize, to: usize) -> &[u8] {
        &self.data()[self.pair_offset(from)..self.pair_offset(to)]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalNode<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.init_header(IndexPageType::Internal, page_id, parent_id, key_size, max_size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        self.data_mut()[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.pair_offset(index) + self.key_size();
        write_i32(self.data_mut(), offset, child.as_i32());
    }

    fn shift_right_from(&mut self, index: usize) {
        let (start, end) = (self.pair_offset(index), self.pair_offset(self.size()));
        let pair_size = self.pair_size();
        self.data_mut().copy_within(start..end, start + pair_size);
    }

    fn append_pairs(&mut self, pairs: &[u8]) -> Vec<PageId> {
        let first = self.size();
        let count = pairs.len() / self.pair_size();
        let offset = self.pair_offset(first);
        self.data_mut()[offset..offset + pairs.len()].copy_from_slice(pairs);
        self.increase_size(count as isize);
        (first..first + count).map(|i| self.value_at(i)).collect()
    }

    /// Turns an empty page into a root with exactly two children.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &[u8], new_child: PageId) {
        self.set_value_at(0, old_child);
        self.set_key_at(1, key);
        self.set_value_at(1, new_child);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` right after `old_child`. Returns the new size.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &[u8],
        new_child: PageId,
    ) -> Result<usize> {
        let index = self.value_index(old_child).ok_or_else(|| {
            PagodaError::IndexCorrupted(format!(
                "{} is not a child of internal page {}",
                old_child,
                self.page_id()
            ))
        })? + 1;
        self.shift_right_from(index);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.increase_size(1);
        Ok(self.size())
    }

    /// Removes pair `index`, shifting the following pairs down.
    pub fn remove(&mut self, index: usize) {
        let (start, end) = (self.pair_offset(index + 1), self.pair_offset(self.size()));
        let dest = self.pair_offset(index);
        self.data_mut().copy_within(start..end, dest);
        self.increase_size(-1);
    }

    /// Empties a node with a single child and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    /// Moves the upper half of the pairs into the empty `recipient`, whose
    /// sentinel key then holds the separator to push up. Returns the moved
    /// children, whose parent pointer must now name the recipient.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalNode<R>,
    ) -> Vec<PageId> {
        let size = self.size();
        let keep = size / 2;
        let moved = recipient.append_pairs(self.pairs(keep, size));
        self.set_size(keep);
        moved
    }

    /// Appends every pair to `recipient` (the left neighbour). `middle_key` is
    /// the parent's separator for this node and replaces the sentinel.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalNode<R>,
        middle_key: &[u8],
    ) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let moved = recipient.append_pairs(self.pairs(0, self.size()));
        self.set_size(0);
        moved
    }

    /// Moves the first child to the end of `recipient` (the left neighbour)
    /// under `middle_key`. Afterwards `self.key_at(0)` is the new separator.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalNode<R>,
        middle_key: &[u8],
    ) -> PageId {
        let child = self.value_at(0);
        let end = recipient.size();
        recipient.set_key_at(end, middle_key);
        recipient.set_value_at(end, child);
        recipient.increase_size(1);
        self.remove(0);
        child
    }

    /// Moves the last child to the front of `recipient` (the right neighbour).
    /// `middle_key` becomes the recipient's first real separator and
    /// `recipient.key_at(0)` then holds the new separator for the parent.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalNode<R>,
        middle_key: &[u8],
    ) -> PageId {
        let last = self.size() - 1;
        let child = self.value_at(last);
        recipient.set_key_at(0, middle_key);
        recipient.shift_right_from(0);
        recipient.set_key_at(0, self.key_at(last));
        recipient.set_value_at(0, child);
        recipient.increase_size(1);
        self.set_size(last);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{INVALID_PAGE_ID, PAGE_SIZE};
    use crate::index::KeySchema;

    fn internal(buf: &mut Vec<u8>, page_id: i32) -> InternalNode<&mut [u8]> {
        let mut node = InternalNode::new(&mut buf[..]);
        node.init(PageId::new(page_id), INVALID_PAGE_ID, 4, 6);
        node
    }

    fn key(schema: &KeySchema, k: i32) -> Vec<u8> {
        schema.integer_key(k).unwrap()
    }

    /// `children[0]` sits under the sentinel, `children[i]` under `seps[i - 1]`.
    fn build(node: &mut InternalNode<&mut [u8]>, schema: &KeySchema, children: &[i32], seps: &[i32]) {
        node.populate_new_root(PageId::new(children[0]), &key(schema, seps[0]), PageId::new(children[1]));
        for i in 2..children.len() {
            node.insert_node_after(PageId::new(children[i - 1]), &key(schema, seps[i - 1]), PageId::new(children[i]))
                .unwrap();
        }
    }

    fn separators<B: AsRef<[u8]>>(node: &InternalNode<B>) -> Vec<i32> {
        (1..node.size())
            .map(|i| i32::from_le_bytes(node.key_at(i).try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_lookup_routes_by_separator() {
        let schema = KeySchema::integer();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut node = internal(&mut buf, 3);
        build(&mut node, &schema, &[10, 11, 12], &[20, 40]);

        assert_eq!(node.size(), 3);
        assert_eq!(node.lookup(&key(&schema, 5), &schema), PageId::new(10));
        assert_eq!(node.lookup(&key(&schema, 20), &schema), PageId::new(11));
        assert_eq!(node.lookup(&key(&schema, 39), &schema), PageId::new(11));
        assert_eq!(node.lookup(&key(&schema, 40), &schema), PageId::new(12));
        assert_eq!(node.lookup(&key(&schema, 99), &schema), PageId::new(12));
        assert_eq!(node.value_index(PageId::new(12)), Some(2));
        assert_eq!(node.value_index(PageId::new(13)), None);
    }

    #[test]
    fn test_insert_after_unknown_child_is_corruption() {
        let schema = KeySchema::integer();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut node = internal(&mut buf, 3);
        build(&mut node, &schema, &[10, 11], &[20]);
        assert!(matches!(
            node.insert_node_after(PageId::new(99), &key(&schema, 30), PageId::new(12)),
            Err(PagodaError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_split_pushes_separator_into_sentinel() {
        let schema = KeySchema::integer();
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = internal(&mut left_buf, 3);
        let mut right = internal(&mut right_buf, 4);
        build(&mut left, &schema, &[10, 11, 12, 13, 14], &[20, 30, 40, 50]);

        let moved = left.move_half_to(&mut right);
        assert_eq!(moved, vec![PageId::new(12), PageId::new(13), PageId::new(14)]);
        assert_eq!(left.children(), vec![PageId::new(10), PageId::new(11)]);
        assert_eq!(right.key_at(0), &key(&schema, 30)[..]);
        assert_eq!(separators(&right), vec![40, 50]);
    }

    #[test]
    fn test_merge_and_redistribute() {
        let schema = KeySchema::integer();
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = internal(&mut left_buf, 3);
        let mut right = internal(&mut right_buf, 4);
        build(&mut left, &schema, &[10, 11], &[20]);
        build(&mut right, &schema, &[12, 13, 14], &[60, 70]);

        // Borrow the right node's first child through separator 50.
        let child = right.move_first_to_end_of(&mut left, &key(&schema, 50));
        assert_eq!(child, PageId::new(12));
        assert_eq!(separators(&left), vec![20, 50]);
        assert_eq!(right.key_at(0), &key(&schema, 60)[..]);
        assert_eq!(right.children(), vec![PageId::new(13), PageId::new(14)]);

        // Give it back from the left node's end through separator 60.
        let child = left.move_last_to_front_of(&mut right, &key(&schema, 60));
        assert_eq!(child, PageId::new(12));
        assert_eq!(right.key_at(0), &key(&schema, 50)[..]);
        assert_eq!(separators(&right), vec![60, 70]);

        let moved = right.move_all_to(&mut left, &key(&schema, 50));
        assert_eq!(moved.len(), 3);
        assert_eq!(right.size(), 0);
        assert_eq!(separators(&left), vec![20, 50, 60, 70]);

        let mut root_buf = vec![0u8; PAGE_SIZE];
        let mut root = internal(&mut root_buf, 5);
        build(&mut root, &schema, &[3, 4], &[50]);
        root.remove(1);
        assert_eq!(root.remove_and_return_only_child(), PageId::new(3));
        assert_eq!(root.size(), 0);
    }
}
