pub mod btree_index;
pub mod btree_internal_page;
pub mod btree_iterator;
pub mod btree_leaf_page;
pub mod btree_page;
pub mod key_comparator;
pub mod key_schema;
pub mod root_directory;

pub use btree_index::{BPlusTree, BPlusTreeOptions};
pub use btree_internal_page::InternalNode;
pub use btree_iterator::IndexIterator;
pub use btree_leaf_page::LeafNode;
pub use btree_page::{
    internal_page_capacity, leaf_page_capacity, IndexPageType, TreePage, INTERNAL_PAGE_HEADER_SIZE,
    LEAF_PAGE_HEADER_SIZE,
};
pub use key_comparator::{BytewiseComparator, KeyComparator};
pub use key_schema::{KeyColumn, KeySchema, KeyType, KeyValue};
pub use root_directory::RootDirectory;
