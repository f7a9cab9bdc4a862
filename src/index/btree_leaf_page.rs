use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use crate::common::codec::{read_i32, write_i32};
use crate::common::{PageId, RowId, INVALID_PAGE_ID};

use super::btree_page::{IndexPageType, TreePage, LEAF_PAGE_HEADER_SIZE, NEXT_PAGE_ID_OFFSET};
use super::KeyComparator;

/// View over a leaf page: the common header, the next-leaf pointer, then
/// `size` packed `(key, row id)` pairs sorted by key.
pub struct LeafNode<B> {
    page: TreePage<B>,
}

impl<B> Deref for LeafNode<B> {
    type Target = TreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for LeafNode<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    pub fn new(data: B) -> Self {
        Self {
            page: TreePage::new(data),
        }
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_i32(self.data(), NEXT_PAGE_ID_OFFSET))
    }

    fn pair_size(&self) -> usize {
        self.key_size() + RowId::SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        LEAF_PAGE_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.data()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RowId {
        let offset = self.pair_offset(index) + self.key_size();
        RowId::from_bytes(&self.data()[offset..offset + RowId::SIZE])
    }

    pub fn item(&self, index: usize) -> (&[u8], RowId) {
        (self.key_at(index), self.value_at(index))
    }

    /// Index of the first entry whose key is `>= key`; `size()` if none is.
    pub fn key_index(&self, key: &[u8], cmp: &dyn KeyComparator) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup(&self, key: &[u8], cmp: &dyn KeyComparator) -> Option<RowId> {
        let index = self.key_index(key, cmp);
        if index < self.size() && cmp.compare(self.key_at(index), key) == Ordering::Equal {
            Some(self.value_at(index))
        } else {
            None
        }
    }

    /// Packed bytes of pairs `[from, to)`.
    fn pairs(&self, from: usize, to: usize) -> &[u8] {
        &self.data()[self.pair_offset(from)..self.pair_offset(to)]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.init_header(IndexPageType::Leaf, page_id, parent_id, key_size, max_size);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        write_i32(self.data_mut(), NEXT_PAGE_ID_OFFSET, next_page_id.as_i32());
    }

    fn set_pair(&mut self, index: usize, key: &[u8], value: RowId) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        let data = self.data_mut();
        data[offset..offset + key_size].copy_from_slice(key);
        data[offset + key_size..offset + key_size + RowId::SIZE].copy_from_slice(&value.to_bytes());
    }

    /// Appends packed pairs after the current last entry.
    fn append_pairs(&mut self, pairs: &[u8]) {
        let count = pairs.len() / self.pair_size();
        let offset = self.pair_offset(self.size());
        self.data_mut()[offset..offset + pairs.len()].copy_from_slice(pairs);
        self.increase_size(count as isize);
    }

    /// Inserts in sorted position and returns the new size. The caller has
    /// already checked that `key` is absent.
    pub fn insert(&mut self, key: &[u8], value: RowId, cmp: &dyn KeyComparator) -> usize {
        let index = self.key_index(key, cmp);
        let size = self.size();
        let (start, end) = (self.pair_offset(index), self.pair_offset(size));
        let pair_size = self.pair_size();
        self.data_mut().copy_within(start..end, start + pair_size);
        self.set_pair(index, key, value);
        self.increase_size(1);
        size + 1
    }

    /// Deletes the entry for `key` if present. Returns whether it was found.
    pub fn remove(&mut self, key: &[u8], cmp: &dyn KeyComparator) -> bool {
        let index = self.key_index(key, cmp);
        if index >= self.size() || cmp.compare(self.key_at(index), key) != Ordering::Equal {
            return false;
        }
        self.remove_at(index);
        true
    }

    fn remove_at(&mut self, index: usize) {
        let (start, end) = (self.pair_offset(index + 1), self.pair_offset(self.size()));
        let dest = self.pair_offset(index);
        self.data_mut().copy_within(start..end, dest);
        self.increase_size(-1);
    }

    /// Moves the upper half of the entries into the empty `recipient`. With an
    /// odd count the recipient gets the extra entry.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafNode<R>) {
        let size = self.size();
        let keep = size / 2;
        recipient.append_pairs(self.pairs(keep, size));
        self.set_size(keep);
    }

    /// Appends every entry to `recipient` (the left neighbour) and hands it
    /// this leaf's place in the sibling chain.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafNode<R>) {
        recipient.append_pairs(self.pairs(0, self.size()));
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Moves the first entry to the end of `recipient` (the left neighbour).
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafNode<R>,
    ) {
        recipient.append_pairs(self.pairs(0, 1));
        self.remove_at(0);
    }

    /// Moves the last entry to the front of `recipient` (the right neighbour).
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafNode<R>,
    ) {
        let last = self.size() - 1;
        let (key, value) = self.item(last);
        recipient.copy_first_from(key, value);
        self.set_size(last);
    }

    fn copy_first_from(&mut self, key: &[u8], value: RowId) {
        let size = self.size();
        let (start, end) = (self.pair_offset(0), self.pair_offset(size));
        let pair_size = self.pair_size();
        self.data_mut().copy_within(start..end, start + pair_size);
        self.set_pair(0, key, value);
        self.increase_size(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PAGE_SIZE;
    use crate::index::KeySchema;

    fn leaf(buf: &mut Vec<u8>, page_id: i32) -> LeafNode<&mut [u8]> {
        let mut node = LeafNode::new(&mut buf[..]);
        node.init(PageId::new(page_id), PageId::new(1), 4, 8);
        node
    }

    fn rid(n: i32) -> RowId {
        RowId::new(PageId::new(n), n as u32)
    }

    fn keys_of<B: AsRef<[u8]>>(node: &LeafNode<B>, schema: &KeySchema) -> Vec<i32> {
        (0..node.size())
            .map(|i| i32::from_le_bytes(node.key_at(i).try_into().unwrap()))
            .inspect(|k| assert_eq!(node.lookup(&schema.integer_key(*k).unwrap(), schema), Some(rid(*k))))
            .collect()
    }

    #[test]
    fn test_insert_keeps_order_and_lookup() {
        let schema = KeySchema::integer();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut node = leaf(&mut buf, 5);

        for k in [5, 3, 8, 1, 4] {
            node.insert(&schema.integer_key(k).unwrap(), rid(k), &schema);
        }
        assert_eq!(keys_of(&node, &schema), vec![1, 3, 4, 5, 8]);
        assert_eq!(node.key_index(&schema.integer_key(2).unwrap(), &schema), 1);
        assert_eq!(node.key_index(&schema.integer_key(9).unwrap(), &schema), 5);
        assert_eq!(node.lookup(&schema.integer_key(2).unwrap(), &schema), None);
        assert_eq!(node.next_page_id(), INVALID_PAGE_ID);
    }

    #[test]
    fn test_remove() {
        let schema = KeySchema::integer();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut node = leaf(&mut buf, 5);
        for k in 1..=4 {
            node.insert(&schema.integer_key(k).unwrap(), rid(k), &schema);
        }

        assert!(node.remove(&schema.integer_key(2).unwrap(), &schema));
        assert!(!node.remove(&schema.integer_key(2).unwrap(), &schema));
        assert_eq!(keys_of(&node, &schema), vec![1, 3, 4]);
    }

    #[test]
    fn test_split_and_merge() {
        let schema = KeySchema::integer();
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = leaf(&mut left_buf, 5);
        let mut right = leaf(&mut right_buf, 6);

        for k in 1..=5 {
            left.insert(&schema.integer_key(k).unwrap(), rid(k), &schema);
        }
        left.set_next_page_id(PageId::new(77));
        left.move_half_to(&mut right);
        assert_eq!(keys_of(&left, &schema), vec![1, 2]);
        assert_eq!(keys_of(&right, &schema), vec![3, 4, 5]);

        right.set_next_page_id(PageId::new(77));
        right.move_all_to(&mut left);
        assert_eq!(right.size(), 0);
        assert_eq!(keys_of(&left, &schema), vec![1, 2, 3, 4, 5]);
        assert_eq!(left.next_page_id(), PageId::new(77));
    }

    #[test]
    fn test_redistribute_moves() {
        let schema = KeySchema::integer();
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = leaf(&mut left_buf, 5);
        let mut right = leaf(&mut right_buf, 6);

        for k in [1, 2, 3] {
            left.insert(&schema.integer_key(k).unwrap(), rid(k), &schema);
        }
        for k in [7, 8] {
            right.insert(&schema.integer_key(k).unwrap(), rid(k), &schema);
        }

        left.move_last_to_front_of(&mut right);
        assert_eq!(keys_of(&left, &schema), vec![1, 2]);
        assert_eq!(keys_of(&right, &schema), vec![3, 7, 8]);

        right.move_first_to_end_of(&mut left);
        right.move_first_to_end_of(&mut left);
        assert_eq!(keys_of(&left, &schema), vec![1, 2, 3, 7]);
        assert_eq!(keys_of(&right, &schema), vec![8]);
    }
}
