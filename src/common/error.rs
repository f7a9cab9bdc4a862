use thiserror::Error;

use super::types::{IndexId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum PagodaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is out of frames: every frame is pinned")]
    OutOfFrames,

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index root directory page is full")]
    RootDirectoryFull,

    #[error("No index id is left after {0}")]
    IndexIdsExhausted(IndexId),

    #[error("Index {0} not found")]
    IndexNotFound(IndexId),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, PagodaError>;
