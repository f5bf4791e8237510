use thiserror::Error;

/// Errors returned synchronously to callers of the queue.
///
/// Everything that happens after `enqueue` returns (delivery failures,
/// storage fallback, callback timeouts) is handled inside the queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message already queued: {0}")]
    DuplicateId(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
