use std::sync::Arc;

use pagoda::buffer::BufferPoolManager;
use pagoda::common::DEFAULT_BUFFER_POOL_SIZE;
use pagoda::index::{BPlusTree, BPlusTreeOptions, KeyComparator, KeySchema};
use pagoda::storage::disk::DiskManager;
use pagoda::{PageId, RowId};

fn main() -> pagoda::Result<()> {
    println!("Pagoda - a disk-resident B+ tree index");
    println!("======================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path)?);
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk_manager));
    println!("Created buffer pool manager with {} frames\n", DEFAULT_BUFFER_POOL_SIZE);

    let schema = Arc::new(KeySchema::integer());
    let options = BPlusTreeOptions::new().leaf_max_size(4).internal_max_size(4);
    let tree = BPlusTree::create(Arc::clone(&bpm), schema.clone(), options)?;
    println!("Created index {} (leaf max 4, internal max 4)", tree.index_id());

    for i in [5, 1, 9, 3, 7, 2, 8, 4, 6, 10] {
        tree.insert(&schema.integer_key(i)?, RowId::new(PageId::new(100 + i), i as u32))?;
    }
    tree.check_integrity()?;
    println!("Inserted 10 keys, root is now {}", tree.root_page_id());

    let found = tree.get_value(&schema.integer_key(7)?)?;
    println!("Lookup 7 -> {:?}", found);

    tree.remove(&schema.integer_key(3)?)?;
    println!("Removed 3\n");

    println!("Scan from 5:");
    for entry in tree.begin_at(&schema.integer_key(5)?)? {
        let (key, rid) = entry?;
        println!("  - {} -> {}", schema.format_key(&key), rid);
    }

    println!("\nTree in DOT format:\n{}", tree.to_dot()?);

    bpm.flush_all_pages()?;
    println!("Flushed all pages to disk");

    drop(tree);
    drop(bpm);
    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
    Ok(())
}
