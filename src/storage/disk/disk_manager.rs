use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{
    PageId, PagodaError, Result, MAX_VALID_PAGE_ID, PAGE_SIZE, RESERVED_PAGE_COUNT,
};

use super::PageStore;

/// Page allocation bookkeeping. Pages `[0, num_pages)` exist in the file;
/// `free_pages` holds the deallocated ones waiting for reuse.
struct Allocation {
    num_pages: i32,
    free_pages: BTreeSet<PageId>,
}

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It manages a single database file where page `n` lives at byte offset
/// `n * PAGE_SIZE`, and implements [`PageStore`] for the buffer pool.
///
/// The first `RESERVED_PAGE_COUNT` pages are metadata pages. They can be read
/// and written but are never allocated or deallocated. Deallocated pages are
/// remembered in memory only and reused lowest-first.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: String,
    /// Allocation state
    allocation: Mutex<Allocation>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Creates a new DiskManager for the given database file path.
    /// Creates the file if it doesn't exist and zero-fills the reserved pages
    /// of a fresh file.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as i32;

        let dm = Self {
            db_file: Mutex::new(file),
            db_path: path_str,
            allocation: Mutex::new(Allocation {
                num_pages: num_pages.max(RESERVED_PAGE_COUNT),
                free_pages: BTreeSet::new(),
            }),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if num_pages < RESERVED_PAGE_COUNT {
            let zeros = [0u8; PAGE_SIZE];
            for id in num_pages..RESERVED_PAGE_COUNT {
                dm.write_raw(PageId::new(id), &zeros)?;
            }
        }

        debug!(path = %dm.db_path, num_pages, "opened database file");
        Ok(dm)
    }

    fn check_page_id(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(PagodaError::InvalidPageId(page_id));
        }
        Ok(())
    }

    fn write_raw(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a page from disk into the provided buffer.
    /// Bytes past the end of the file read as zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        self.check_page_id(page_id)?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        trace!(%page_id, "read page");
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        self.check_page_id(page_id)?;

        self.write_raw(page_id, data)?;
        trace!(%page_id, "wrote page");
        Ok(())
    }

    /// Allocates a zero-initialized page, reusing the lowest deallocated id
    /// before growing the file.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut allocation = self.allocation.lock();

        let page_id = match allocation.free_pages.pop_first() {
            Some(page_id) => page_id,
            None => {
                let page_id = PageId::new(allocation.num_pages);
                if !page_id.is_valid() {
                    return Err(PagodaError::InvalidPageId(page_id));
                }
                allocation.num_pages += 1;
                page_id
            }
        };

        let zeros = [0u8; PAGE_SIZE];
        if let Err(e) = self.write_raw(page_id, &zeros) {
            allocation.free_pages.insert(page_id);
            return Err(e);
        }

        trace!(%page_id, "allocated page");
        Ok(page_id)
    }

    /// Marks a page as free for reuse. Reserved and never-allocated ids are rejected.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut allocation = self.allocation.lock();
        if !page_id.is_valid() || page_id.is_reserved() || page_id.0 >= allocation.num_pages {
            return Err(PagodaError::InvalidPageId(page_id));
        }
        allocation.free_pages.insert(page_id);
        trace!(%page_id, "deallocated page");
        Ok(())
    }

    /// True for allocatable ids that are not currently in use.
    pub fn is_page_free(&self, page_id: PageId) -> bool {
        if !page_id.is_valid() || page_id.is_reserved() {
            return false;
        }
        let allocation = self.allocation.lock();
        page_id.0 >= allocation.num_pages || allocation.free_pages.contains(&page_id)
    }

    /// Returns the number of pages the file holds, reserved pages included.
    pub fn get_num_pages(&self) -> u32 {
        self.allocation.lock().num_pages as u32
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        DiskManager::read_page(self, page_id, data)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        DiskManager::write_page(self, page_id, data)
    }

    fn allocate_page(&self) -> Result<PageId> {
        DiskManager::allocate_page(self)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        DiskManager::deallocate_page(self, page_id)
    }

    fn is_page_free(&self, page_id: PageId) -> bool {
        DiskManager::is_page_free(self, page_id)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}
