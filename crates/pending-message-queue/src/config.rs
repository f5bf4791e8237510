use crate::BackoffPolicy;
use std::time::Duration;

/// Queue behavior knobs.
///
/// # Backoff
///
/// An entry with `n` failed attempts becomes due again
/// `min(base_delay * 2^n, max_delay) + jitter` after its last attempt, with
/// jitter drawn uniformly from `[0, jitter)` on every check. With defaults:
///
/// | Attempts | Delay (before jitter) |
/// |----------|-----------------------|
/// | 1        | 2s                    |
/// | 2        | 4s                    |
/// | 3        | 8s                    |
/// | 4        | 16s                   |
/// | 5+       | 30s                   |
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Failed attempts after which an entry is marked failed.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Delay between an enqueue (or nudge) and the flush it schedules.
    pub flush_debounce: Duration,
    /// Delay before the next pass when a pass leaves entries pending.
    pub retry_window: Duration,
    /// Per-attempt delivery timeout.
    pub attempt_timeout: Duration,
    /// Default lifetime of a save-callback registration.
    pub callback_timeout: Duration,
    /// Delay of the first flush after [`start`](crate::PendingMessageQueue::start).
    pub initial_flush_delay: Duration,
    /// Failed entries whose last attempt is older than this are evicted at the
    /// start of each flush. `None` keeps them until cleared.
    pub failed_ttl: Option<Duration>,
    /// Attempt a one-shot direct delivery of new messages while storage is volatile.
    pub direct_delivery_fallback: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::from_millis(500),
            flush_debounce: Duration::from_millis(100),
            retry_window: Duration::from_millis(5_000),
            attempt_timeout: Duration::from_millis(15_000),
            callback_timeout: Duration::from_millis(60_000),
            initial_flush_delay: Duration::from_millis(1_000),
            failed_ttl: None,
            direct_delivery_fallback: true,
        }
    }
}

impl QueueConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay, self.jitter)
    }
}
