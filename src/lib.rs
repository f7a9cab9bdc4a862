//! Pagoda - a disk-resident B+ tree index over an LRU buffer pool
//!
//! Index pages live in a single database file and are cached in a fixed set
//! of in-memory frames. Every page access goes through the buffer pool, which
//! pins pages while they are in use and evicts the least recently unpinned
//! page when it needs a frame.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): page-granular disk I/O
//!   - `DiskManager`: reads, writes and allocates pages of the database file
//!   - `DiskScheduler`: background worker serving page I/O requests
//!   - `IndexRootsPage`: the reserved page mapping index ids to root pages
//!
//! - **Buffer Pool** (`buffer`): caching of database pages
//!   - `BufferPoolManager`: pins pages into frames, tracks dirtiness, flushes
//!   - `LruReplacer`: least-recently-unpinned eviction policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that latch and unpin
//!
//! - **Index** (`index`): the B+ tree
//!   - `BPlusTree`: unique-key insert, remove, point lookup and scans
//!   - `LeafNode`/`InternalNode`: typed views over index page bytes
//!   - `KeySchema`: encodes typed column values into fixed-width keys
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagoda::buffer::BufferPoolManager;
//! use pagoda::index::{BPlusTree, BPlusTreeOptions, KeySchema};
//! use pagoda::storage::disk::DiskManager;
//! use pagoda::{PageId, RowId};
//!
//! # fn main() -> pagoda::Result<()> {
//! let disk_manager = Arc::new(DiskManager::new("test.db")?);
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let schema = Arc::new(KeySchema::integer());
//! let tree = BPlusTree::create(Arc::clone(&bpm), schema.clone(), BPlusTreeOptions::default())?;
//!
//! tree.insert(&schema.integer_key(42)?, RowId::new(PageId::new(7), 3))?;
//! assert_eq!(tree.get_value(&schema.integer_key(42)?)?, Some(RowId::new(PageId::new(7), 3)));
//!
//! bpm.flush_all_pages()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{IndexId, PageId, PagodaError, Result, RowId};
