//! # Pending message queue
//!
//! At-least-once delivery of chat messages across network interruptions.
//!
//! ```text
//! enqueue ──▶ DurableQueueStore ──▶ debounced flush ──▶ MessageDeliverer
//!                  ▲                      │
//!                  └── attempts/backoff ◀─┤ failure
//!                                         │ success
//!                                         ▼
//!                          save callbacks + QueueFlushed
//! ```
//!
//! - Entries are persisted before `enqueue` returns and survive restarts.
//! - One flush runs at a time; entries are attempted in insertion order.
//! - Failed attempts back off exponentially (`base * 2^attempts`, capped,
//!   plus jitter) until `max_retries`, after which the entry is marked failed
//!   and waits for [`PendingMessageQueue::retry_failed`] or
//!   [`PendingMessageQueue::clear_failed`].
//! - When durable storage is unavailable the queue keeps working from memory
//!   and tries a one-shot direct delivery of each new message.

mod backoff;
mod callbacks;
mod config;
mod error;
mod events;
mod queue;

#[cfg(test)]
mod testing;

pub use backoff::{check_eligibility, BackoffPolicy, Eligibility};
pub use callbacks::{SaveCallback, SaveCallbackRegistry};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use events::QueueFlushed;
pub use queue::{FlushReport, NewMessage, PendingMessageQueue, QueueStats};
