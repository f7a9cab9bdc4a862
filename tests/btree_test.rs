//! Integration tests for the B+ tree index

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use pagoda::buffer::BufferPoolManager;
use pagoda::common::{PageId, PagodaError, RowId, INVALID_PAGE_ID};
use pagoda::index::{
    BPlusTree, BPlusTreeOptions, KeyColumn, KeySchema, KeyType, KeyValue, RootDirectory, TreePage,
};
use pagoda::storage::disk::DiskManager;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    (bpm, temp_file)
}

fn small_options() -> BPlusTreeOptions {
    BPlusTreeOptions::new().leaf_max_size(4).internal_max_size(4)
}

fn int_tree(bpm: &Arc<BufferPoolManager>, options: BPlusTreeOptions) -> (BPlusTree, Arc<KeySchema>) {
    let schema = Arc::new(KeySchema::integer());
    let tree = BPlusTree::create(Arc::clone(bpm), schema.clone(), options).unwrap();
    (tree, schema)
}

fn key(schema: &KeySchema, value: i32) -> Vec<u8> {
    schema.integer_key(value).unwrap()
}

fn rid(value: i32) -> RowId {
    RowId::new(PageId::new(value), value as u32)
}

fn scan(tree: &BPlusTree, schema: &KeySchema) -> Vec<i32> {
    tree.begin()
        .unwrap()
        .map(|entry| {
            let (k, _) = entry.unwrap();
            match schema.deserialize(&k).unwrap()[0] {
                KeyValue::Integer(v) => v,
                ref other => panic!("unexpected key value {}", other),
            }
        })
        .collect()
}

fn root_is_leaf(bpm: &BufferPoolManager, tree: &BPlusTree) -> bool {
    let guard = bpm.fetch_page_read(tree.root_page_id()).unwrap();
    TreePage::new(guard.data()).is_leaf()
}

#[test]
fn test_btree_create_empty() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, BPlusTreeOptions::default());

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(tree.get_value(&key(&schema, 1)).unwrap(), None);
    assert!(!tree.remove(&key(&schema, 1)).unwrap());
    assert!(tree.begin().unwrap() == tree.end());
    tree.check_integrity().unwrap();

    let directory = RootDirectory::new(Arc::clone(&bpm));
    assert_eq!(directory.get_root(tree.index_id()).unwrap(), Some(INVALID_PAGE_ID));
}

#[test]
fn test_btree_insert_splits_and_scans_in_order() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, small_options());

    for k in [5, 3, 8, 1, 4] {
        assert!(tree.insert(&key(&schema, k), rid(k)).unwrap());
    }

    assert!(!root_is_leaf(&bpm, &tree));
    assert_eq!(tree.get_value(&key(&schema, 5)).unwrap(), Some(rid(5)));
    assert_eq!(tree.get_value(&key(&schema, 2)).unwrap(), None);
    assert_eq!(scan(&tree, &schema), vec![1, 3, 4, 5, 8]);
    tree.check_integrity().unwrap();
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_rejects_duplicates() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, small_options());

    assert!(tree.insert(&key(&schema, 7), rid(7)).unwrap());
    assert!(!tree.insert(&key(&schema, 7), rid(99)).unwrap());
    assert_eq!(tree.get_value(&key(&schema, 7)).unwrap(), Some(rid(7)));

    for k in 0..20 {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }
    assert!(!tree.insert(&key(&schema, 13), rid(0)).unwrap());
    assert_eq!(scan(&tree, &schema), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_btree_key_size_is_checked() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, _schema) = int_tree(&bpm, small_options());

    assert!(matches!(
        tree.insert(&[1, 2, 3], rid(1)),
        Err(PagodaError::KeySizeMismatch { expected: 4, actual: 3 })
    ));
    assert!(matches!(
        tree.get_value(&[0; 8]),
        Err(PagodaError::KeySizeMismatch { .. })
    ));
}

#[test]
fn test_btree_options_are_validated() {
    let (bpm, _temp) = create_bpm(16);
    let schema: Arc<KeySchema> = Arc::new(KeySchema::integer());

    for options in [
        BPlusTreeOptions::new().leaf_max_size(1),
        BPlusTreeOptions::new().internal_max_size(2),
        BPlusTreeOptions::new().leaf_max_size(100_000),
    ] {
        assert!(matches!(
            BPlusTree::create(Arc::clone(&bpm), schema.clone(), options),
            Err(PagodaError::InvalidConfig(_))
        ));
    }

    let tree = BPlusTree::create(Arc::clone(&bpm), schema, BPlusTreeOptions::default()).unwrap();
    assert!(tree.leaf_max_size() > 100);
    assert!(tree.internal_max_size() > 100);
}

#[test]
fn test_btree_shuffled_insert_then_remove_half() {
    let (bpm, _temp) = create_bpm(64);
    let (tree, schema) = int_tree(&bpm, small_options());
    let mut rng = StdRng::seed_from_u64(7);

    let mut keys: Vec<i32> = (0..2000).collect();
    keys.shuffle(&mut rng);
    for (i, &k) in keys.iter().enumerate() {
        assert!(tree.insert(&key(&schema, k), rid(k)).unwrap());
        if i % 250 == 0 {
            tree.check_integrity().unwrap();
        }
    }
    tree.check_integrity().unwrap();

    keys.shuffle(&mut rng);
    let (removed, kept) = keys.split_at(1000);
    for (i, &k) in removed.iter().enumerate() {
        assert!(tree.remove(&key(&schema, k)).unwrap());
        if i % 100 == 0 {
            tree.check_integrity().unwrap();
        }
    }
    tree.check_integrity().unwrap();

    for &k in kept {
        assert_eq!(tree.get_value(&key(&schema, k)).unwrap(), Some(rid(k)));
    }
    for &k in removed {
        assert_eq!(tree.get_value(&key(&schema, k)).unwrap(), None);
        assert!(!tree.remove(&key(&schema, k)).unwrap());
    }

    let expected: Vec<i32> = kept.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    assert_eq!(scan(&tree, &schema), expected);
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_remove_in_both_directions() {
    let (bpm, _temp) = create_bpm(32);

    // Ascending removal borrows from and merges with right siblings,
    // descending removal with left siblings.
    for descending in [false, true] {
        let (tree, schema) = int_tree(&bpm, small_options());
        for k in 0..200 {
            tree.insert(&key(&schema, k), rid(k)).unwrap();
        }

        let order: Vec<i32> = if descending {
            (0..200).rev().collect()
        } else {
            (0..200).collect()
        };
        for (i, &k) in order.iter().enumerate() {
            assert!(tree.remove(&key(&schema, k)).unwrap());
            tree.check_integrity().unwrap();
            assert_eq!(scan(&tree, &schema).len(), 199 - i);
        }
        assert!(tree.is_empty());
    }
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_remove_last_entry_empties_tree() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, small_options());
    let directory = RootDirectory::new(Arc::clone(&bpm));

    tree.insert(&key(&schema, 42), rid(42)).unwrap();
    let old_root = tree.root_page_id();
    assert!(root_is_leaf(&bpm, &tree));

    assert!(tree.remove(&key(&schema, 42)).unwrap());
    assert!(tree.is_empty());
    assert_eq!(directory.get_root(tree.index_id()).unwrap(), Some(INVALID_PAGE_ID));
    assert!(bpm.page_store().is_page_free(old_root));

    tree.insert(&key(&schema, 9), rid(9)).unwrap();
    assert!(tree.root_page_id().is_valid());
    assert_eq!(directory.get_root(tree.index_id()).unwrap(), Some(tree.root_page_id()));
    assert_eq!(tree.get_value(&key(&schema, 9)).unwrap(), Some(rid(9)));
}

#[test]
fn test_btree_root_changes_are_recorded() {
    let (bpm, _temp) = create_bpm(32);
    let (tree, schema) = int_tree(&bpm, small_options());
    let directory = RootDirectory::new(Arc::clone(&bpm));

    let mut roots = BTreeSet::new();
    for k in 0..100 {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
        assert_eq!(directory.get_root(tree.index_id()).unwrap(), Some(tree.root_page_id()));
        roots.insert(tree.root_page_id());
    }
    // The tree grew at least three times
    assert!(roots.len() >= 3);

    for k in 0..95 {
        tree.remove(&key(&schema, k)).unwrap();
        assert_eq!(directory.get_root(tree.index_id()).unwrap(), Some(tree.root_page_id()));
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_btree_last_index_id_cannot_store_a_root() {
    let (bpm, _temp) = create_bpm(16);
    let schema = Arc::new(KeySchema::integer());
    let tree = BPlusTree::new(u32::MAX, Arc::clone(&bpm), schema.clone(), small_options()).unwrap();

    assert!(matches!(
        tree.insert(&key(&schema, 1), rid(1)),
        Err(PagodaError::IndexIdsExhausted(u32::MAX))
    ));
    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(&schema, 1)).unwrap(), None);
    assert!(bpm.check_all_unpinned());

    let directory = RootDirectory::new(Arc::clone(&bpm));
    assert_eq!(directory.get_root(u32::MAX).unwrap(), None);
    assert_eq!(directory.allocate_index_id().unwrap(), 0);
}

#[test]
fn test_btree_begin_at() {
    let (bpm, _temp) = create_bpm(32);
    let (tree, schema) = int_tree(&bpm, small_options());

    for k in (0..100).step_by(2) {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }

    let from = |start: i32| -> Vec<RowId> {
        tree.begin_at(&key(&schema, start))
            .unwrap()
            .map(|entry| entry.unwrap().1)
            .collect()
    };

    assert_eq!(from(50).first(), Some(&rid(50)));
    assert_eq!(from(51).first(), Some(&rid(52)));
    assert_eq!(from(51).len(), 24);
    assert_eq!(from(-10).len(), 50);
    assert!(from(98).len() == 1);
    assert!(tree.begin_at(&key(&schema, 99)).unwrap() == tree.end());
}

#[test]
fn test_btree_iterator_reaches_end() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, small_options());

    for k in 0..10 {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    assert!(iter != tree.end());
    let (first_leaf, slot) = iter.position();
    assert!(first_leaf.is_valid());
    assert_eq!(slot, 0);

    assert!(iter.next().unwrap().is_ok());
    assert_eq!(iter.position(), (first_leaf, 1));
    for _ in 1..10 {
        assert!(iter.next().unwrap().is_ok());
    }
    assert!(iter == tree.end());
    assert_eq!(iter.position(), (INVALID_PAGE_ID, 0));
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
}

#[test]
fn test_btree_iterator_survives_concurrent_modification() {
    let (bpm, _temp) = create_bpm(32);
    let (tree, schema) = int_tree(&bpm, small_options());

    for k in (0..200).step_by(2) {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    let mut seen = Vec::new();
    for _ in 0..20 {
        let (k, _) = iter.next().unwrap().unwrap();
        seen.push(k);
    }
    // Last key seen is 38; reshape the tree around the cursor.
    for k in 0..40 {
        tree.remove(&key(&schema, k)).ok();
    }
    tree.remove(&key(&schema, 40)).unwrap();
    tree.insert(&key(&schema, 39), rid(39)).unwrap();
    tree.insert(&key(&schema, 41), rid(41)).unwrap();
    tree.insert(&key(&schema, 500), rid(500)).unwrap();

    let rest: Vec<i32> = iter
        .map(|entry| {
            let (k, _) = entry.unwrap();
            match schema.deserialize(&k).unwrap()[0] {
                KeyValue::Integer(v) => v,
                _ => unreachable!(),
            }
        })
        .collect();

    let mut expected = vec![39, 41];
    expected.extend((42..200).step_by(2));
    expected.push(500);
    assert_eq!(rest, expected);
}

#[test]
fn test_btree_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    let schema = Arc::new(KeySchema::integer());

    let index_id = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(64, dm));
        let tree = BPlusTree::create(Arc::clone(&bpm), schema.clone(), small_options()).unwrap();
        for k in 0..500 {
            tree.insert(&key(&schema, k), rid(k)).unwrap();
        }
        bpm.flush_all_pages().unwrap();
        tree.index_id()
    };

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(64, dm));
    let tree = BPlusTree::new(index_id, Arc::clone(&bpm), schema.clone(), small_options()).unwrap();

    assert!(!tree.is_empty());
    tree.check_integrity().unwrap();
    for k in (0..500).step_by(37) {
        assert_eq!(tree.get_value(&key(&schema, k)).unwrap(), Some(rid(k)));
    }
    assert_eq!(scan(&tree, &schema), (0..500).collect::<Vec<_>>());

    let reopened = BPlusTree::open(index_id, Arc::clone(&bpm), schema.clone(), small_options()).unwrap();
    assert_eq!(reopened.root_page_id(), tree.root_page_id());
    assert!(matches!(
        BPlusTree::open(index_id + 1, Arc::clone(&bpm), schema.clone(), small_options()),
        Err(PagodaError::IndexNotFound(_))
    ));

    // Reopening with a different key width is refused
    let wide = Arc::new(KeySchema::new(vec![KeyColumn::new("k", KeyType::BigInt)]).unwrap());
    assert!(matches!(
        BPlusTree::new(index_id, Arc::clone(&bpm), wide, BPlusTreeOptions::default()),
        Err(PagodaError::KeySizeMismatch { expected: 4, actual: 8 })
    ));
}

#[test]
fn test_btree_multiple_indexes_share_a_file() {
    let (bpm, _temp) = create_bpm(32);
    let (first, schema) = int_tree(&bpm, small_options());
    let (second, _) = int_tree(&bpm, small_options());
    assert_ne!(first.index_id(), second.index_id());

    for k in 0..50 {
        first.insert(&key(&schema, k), rid(k)).unwrap();
        second.insert(&key(&schema, -k), rid(k)).unwrap();
    }

    assert_eq!(first.get_value(&key(&schema, -5)).unwrap(), None);
    assert_eq!(second.get_value(&key(&schema, -5)).unwrap(), Some(rid(5)));
    first.check_integrity().unwrap();
    second.check_integrity().unwrap();

    let entries = RootDirectory::new(Arc::clone(&bpm)).entries().unwrap();
    assert!(entries.contains(&(first.index_id(), first.root_page_id())));
    assert!(entries.contains(&(second.index_id(), second.root_page_id())));
}

#[test]
fn test_btree_multi_column_keys() {
    let (bpm, _temp) = create_bpm(32);
    let schema = Arc::new(
        KeySchema::new(vec![
            KeyColumn::new("dept", KeyType::Integer),
            KeyColumn::new("name", KeyType::Char(8)),
        ])
        .unwrap(),
    );
    let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["dept", "name"]);
    assert_eq!(schema.columns()[1].key_type, KeyType::Char(8));
    let tree = BPlusTree::create(Arc::clone(&bpm), schema.clone(), small_options()).unwrap();

    let rows = [(2, "bob"), (1, "zed"), (2, "amy"), (1, "abe"), (3, "cat"), (2, "bo")];
    for (i, (dept, name)) in rows.iter().enumerate() {
        let k = schema
            .serialize(&[KeyValue::Integer(*dept), KeyValue::Char(name.to_string())])
            .unwrap();
        assert!(tree.insert(&k, rid(i as i32)).unwrap());
    }

    let order: Vec<String> = tree
        .begin()
        .unwrap()
        .map(|entry| schema.deserialize(&entry.unwrap().0).unwrap()[1].to_string())
        .collect();
    assert_eq!(order, vec!["'abe'", "'zed'", "'amy'", "'bo'", "'bob'", "'cat'"]);
}

#[test]
fn test_btree_concurrent_inserts() {
    let (bpm, _temp) = create_bpm(64);
    let (tree, schema) = int_tree(&bpm, small_options());
    let tree = Arc::new(tree);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            let schema = Arc::clone(&schema);
            thread::spawn(move || {
                for i in 0..250 {
                    let k = i * 4 + t;
                    assert!(tree.insert(&key(&schema, k), rid(k)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    tree.check_integrity().unwrap();
    assert_eq!(scan(&tree, &schema), (0..1000).collect::<Vec<_>>());
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_concurrent_readers_and_writers() {
    let (bpm, _temp) = create_bpm(64);
    let (tree, schema) = int_tree(&bpm, small_options());
    for k in (0..1000).step_by(2) {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }
    let tree = Arc::new(tree);

    let writer = {
        let tree = Arc::clone(&tree);
        let schema = Arc::clone(&schema);
        thread::spawn(move || {
            for k in (1..1000).step_by(2) {
                tree.insert(&key(&schema, k), rid(k)).unwrap();
            }
            for k in (0..1000).step_by(4) {
                assert!(tree.remove(&key(&schema, k)).unwrap());
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|seed| {
            let tree = Arc::clone(&tree);
            let schema = Arc::clone(&schema);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..500 {
                    // Keys 2 mod 4 are never touched by the writer
                    let k = rng.gen_range(0..250) * 4 + 2;
                    assert_eq!(tree.get_value(&key(&schema, k)).unwrap(), Some(rid(k)));
                }
                let mut previous = None;
                for entry in tree.begin().unwrap() {
                    let (k, _) = entry.unwrap();
                    if let Some(prev) = previous.replace(k.clone()) {
                        assert!(schema_less(&schema, &prev, &k));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    tree.check_integrity().unwrap();
    let keys = scan(&tree, &schema);
    assert_eq!(keys.len(), 750);
    assert!(keys.iter().all(|k| k % 4 != 0));
    assert!(bpm.check_all_unpinned());
}

fn schema_less(schema: &KeySchema, a: &[u8], b: &[u8]) -> bool {
    use pagoda::index::KeyComparator;
    schema.compare(a, b) == std::cmp::Ordering::Less
}

#[test]
fn test_btree_destroy_frees_pages() {
    let (bpm, _temp) = create_bpm(32);
    let (tree, schema) = int_tree(&bpm, small_options());
    let directory = RootDirectory::new(Arc::clone(&bpm));

    for k in 0..100 {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }
    let root = tree.root_page_id();

    tree.destroy().unwrap();
    assert!(tree.is_empty());
    assert_eq!(directory.get_root(tree.index_id()).unwrap(), None);
    assert!(bpm.page_store().is_page_free(root));
    assert!(tree.begin().unwrap() == tree.end());
}

#[test]
fn test_btree_to_dot() {
    let (bpm, _temp) = create_bpm(16);
    let (tree, schema) = int_tree(&bpm, small_options());

    assert_eq!(tree.to_dot().unwrap(), "digraph G {\n}\n");

    for k in 0..10 {
        tree.insert(&key(&schema, k), rid(k)).unwrap();
    }
    let dot = tree.to_dot().unwrap();
    assert!(dot.starts_with("digraph G {"));
    assert!(dot.contains(&format!("INT_{}", tree.root_page_id().as_i32())));
    assert!(dot.contains("LEAF_"));
    assert!(dot.contains("<TD>7</TD>"));
}
