use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{trace, warn};

use crate::common::{PageId, PagodaError, Result, DISK_SCHEDULER_QUEUE_DEPTH, PAGE_SIZE};

use super::PageStore;

/// Owned page buffer moved between the pool and the worker thread.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Represents a disk I/O request. Buffers are owned by the request, so the
/// worker never touches memory the caller might free.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler manages a background worker thread that processes disk I/O
/// requests against a [`PageStore`]. Every request carries a reply channel
/// with the outcome of the I/O, so failures reach the caller unmodified.
pub struct DiskScheduler {
    /// The page store for actual I/O operations
    page_store: Arc<dyn PageStore>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler over the given page store.
    /// Spawns a background worker thread to process requests.
    pub fn new(page_store: Arc<dyn PageStore>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DISK_SCHEDULER_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));

        let store = Arc::clone(&page_store);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(store, receiver, shutdown_clone);
        });

        Self {
            page_store,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Schedules a disk request for processing by the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| PagodaError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, reply: tx })?;

        let buf = rx.recv().map_err(|e| {
            PagodaError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })??;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: buf,
            reply: tx,
        })?;

        rx.recv().map_err(|e| {
            PagodaError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// The background worker thread function.
    /// Processes requests from the queue until shutdown is signaled.
    fn start_worker_thread(
        page_store: Arc<dyn PageStore>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(page_store.as_ref(), request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(page_store.as_ref(), request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(page_store: &dyn PageStore, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let result = page_store.read_page(page_id, &mut buf[..]).map(|()| buf);
                if let Err(e) = &result {
                    warn!(%page_id, error = %e, "disk read failed");
                }
                trace!(%page_id, "completed read request");
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let result = page_store.write_page(page_id, &data[..]);
                if let Err(e) = &result {
                    warn!(%page_id, error = %e, "disk write failed");
                }
                trace!(%page_id, "completed write request");
                let _ = reply.send(result);
            }
        }
    }

    /// Returns a reference to the underlying page store.
    pub fn page_store(&self) -> &Arc<dyn PageStore> {
        &self.page_store
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
