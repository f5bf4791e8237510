//! Durable storage for the pending-message queue.
//!
//! This crate provides:
//! - [`QueueEntry`]: one message awaiting delivery, in its persisted shape
//! - [`DurableMedium`]: key/value medium the queue snapshot is written to
//!   ([`FileMedium`] on disk, [`MemoryMedium`] in process)
//! - [`DurableQueueStore`]: whole-queue read/write that degrades permanently to
//!   an in-process mirror when the medium stops accepting writes

mod entry;
mod file;
mod memory;
mod store;
mod traits;

pub use entry::{EntryStatus, QueueEntry};
pub use file::FileMedium;
pub use memory::MemoryMedium;
pub use store::{DurableQueueStore, StoreMode, WriteOutcome, QUEUE_FORMAT_VERSION, QUEUE_KEY};
pub use traits::DurableMedium;

use thiserror::Error;

/// Error type for medium operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The medium refused a value over its size limit
    #[error("Quota exceeded: {needed} bytes requested, {quota} bytes available")]
    QuotaExceeded {
        /// Bytes the write needed.
        needed: usize,
        /// Bytes the medium allows.
        quota: usize,
    },

    /// Key cannot be mapped onto the medium
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for medium operations.
pub type StorageResult<T> = Result<T, StorageError>;
