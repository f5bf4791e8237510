//! The pending-message queue and its flush loop.

use crate::{
    check_eligibility, BackoffPolicy, Eligibility, QueueConfig, QueueError, QueueFlushed,
    QueueResult, SaveCallback, SaveCallbackRegistry,
};
use chrono::{DateTime, Utc};
use message_delivery::{MessageDeliverer, OutgoingMessage};
use parking_lot::Mutex;
use queue_storage::{DurableQueueStore, QueueEntry, WriteOutcome};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the flush notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A message handed to [`PendingMessageQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Client-generated id; reused for every delivery attempt.
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
}

impl NewMessage {
    /// Message with a fresh random id.
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            role: role.into(),
            content: content.into(),
        }
    }

    /// Use a caller-chosen id instead.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn validate(&self) -> QueueResult<()> {
        for (field, value) in [
            ("id", &self.id),
            ("conversation_id", &self.conversation_id),
            ("user_id", &self.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(QueueError::InvalidMessage(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    fn into_entry(self, now: DateTime<Utc>) -> QueueEntry {
        QueueEntry::new(
            self.id,
            self.conversation_id,
            self.user_id,
            self.role,
            self.content,
            now,
        )
    }
}

/// Outcome of one [`PendingMessageQueue::flush`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReport {
    /// Nothing pending. Nothing was rescheduled.
    Idle,
    /// Another flush was in flight; this call did nothing.
    AlreadyRunning,
    /// A pass ran over the pending entries.
    Completed {
        delivered: usize,
        failed: usize,
        not_due: usize,
        skipped: usize,
    },
}

/// Counts over the persisted queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub failed: usize,
}

struct Inner {
    store: Mutex<DurableQueueStore>,
    deliverer: Arc<dyn MessageDeliverer>,
    config: QueueConfig,
    backoff: BackoffPolicy,
    callbacks: SaveCallbackRegistry,
    events: broadcast::Sender<QueueFlushed>,
    flushing: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<HashSet<String>>,
}

impl Inner {
    fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }
}

/// Marks one entry id as being delivered until dropped.
struct InFlightClaim {
    inner: Arc<Inner>,
    id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.id);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Holds the single-flight flag for the duration of a flush, even if the
/// flush future is dropped midway.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// At-least-once delivery queue for chat messages.
///
/// Cloning yields another handle to the same queue. Methods that schedule
/// work (`enqueue`, `start`, `nudge`, `retry_failed`, `schedule_flush`,
/// `register_save_callback`) must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct PendingMessageQueue {
    inner: Arc<Inner>,
}

impl PendingMessageQueue {
    pub fn new(
        store: DurableQueueStore,
        deliverer: Arc<dyn MessageDeliverer>,
        config: QueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backoff = config.backoff_policy();

        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                deliverer,
                config,
                backoff,
                callbacks: SaveCallbackRegistry::new(),
                events,
                flushing: AtomicBool::new(false),
                timer: Mutex::new(None),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Resume delivery of whatever survived the last run.
    pub fn start(&self) {
        let stats = self.stats();
        info!(
            total = stats.total,
            pending = stats.pending,
            failed = stats.failed,
            volatile = self.is_storage_volatile(),
            "Pending message queue started"
        );
        self.schedule_flush(self.inner.config.initial_flush_delay);
    }

    /// Connectivity or visibility changed; try again soon.
    pub fn nudge(&self) {
        debug!("Queue nudged");
        self.schedule_flush(self.inner.config.flush_debounce);
    }

    /// Persist `message` for delivery and return its id.
    ///
    /// Delivery happens in the background; observe it through
    /// [`subscribe`](Self::subscribe), save callbacks, or [`stats`](Self::stats).
    pub fn enqueue(&self, message: NewMessage) -> QueueResult<String> {
        message.validate()?;

        let entry = message.into_entry(Utc::now());
        let id = entry.id.clone();

        let (outcome, queue_len) = {
            let mut store = self.inner.store.lock();
            let mut entries = store.read();
            if entries.iter().any(|e| e.id == id) {
                return Err(QueueError::DuplicateId(id));
            }
            entries.push(entry.clone());
            (store.write(&entries), entries.len())
        };

        info!(
            message_id = %id,
            conversation_id = %entry.conversation_id,
            queue_len,
            durable = outcome.is_durable(),
            "Message queued"
        );

        self.schedule_flush(self.inner.config.flush_debounce);

        if outcome == WriteOutcome::Volatile && self.inner.config.direct_delivery_fallback {
            if let Some(claim) = self.claim(&id) {
                let queue = self.clone();
                tokio::spawn(async move { queue.direct_deliver(entry, claim).await });
            }
        }

        Ok(id)
    }

    /// Run one delivery pass over the pending entries.
    pub async fn flush(&self) -> FlushReport {
        let Some(_guard) = FlushGuard::acquire(&self.inner.flushing) else {
            debug!("Flush already in progress");
            return FlushReport::AlreadyRunning;
        };

        if self.inner.config.failed_ttl.is_some() {
            self.evict_stale_failed(Utc::now());
        }

        let max_retries = self.inner.config.max_retries;
        let candidates: Vec<QueueEntry> = self
            .read_entries()
            .into_iter()
            .filter(|e| e.is_pending(max_retries))
            .collect();

        if candidates.is_empty() {
            debug!("No pending messages to flush");
            return FlushReport::Idle;
        }

        info!(count = candidates.len(), "Flushing pending messages");

        let (mut delivered, mut failed, mut not_due, mut skipped) = (0, 0, 0, 0);

        for entry in candidates {
            if self.inner.is_in_flight(&entry.id) {
                skipped += 1;
                continue;
            }

            match check_eligibility(&entry, Utc::now(), max_retries, &self.inner.backoff) {
                Eligibility::Skip => skipped += 1,
                Eligibility::NotDue { remaining } => {
                    debug!(
                        message_id = %entry.id,
                        attempts = entry.attempts,
                        remaining_ms = remaining.as_millis() as u64,
                        "Message not due for retry yet"
                    );
                    not_due += 1;
                }
                Eligibility::Due => {
                    let Some(_claim) = self.claim(&entry.id) else {
                        skipped += 1;
                        continue;
                    };

                    // The pass works from a snapshot; a direct delivery may
                    // have removed the entry since.
                    let Some(entry) = self.current_pending(&entry.id) else {
                        debug!(message_id = %entry.id, "Message no longer pending, skipping");
                        skipped += 1;
                        continue;
                    };

                    match self.attempt(&entry).await {
                        Ok(()) => {
                            self.on_delivered(&entry);
                            delivered += 1;
                        }
                        Err(reason) => {
                            self.on_failed(&entry.id, &reason);
                            failed += 1;
                        }
                    }
                }
            }
        }

        let remaining = self.stats().pending;
        if remaining > 0 {
            debug!(
                remaining,
                retry_in_ms = self.inner.config.retry_window.as_millis() as u64,
                "Messages still pending, scheduling retry"
            );
            self.schedule_flush(self.inner.config.retry_window);
        }

        info!(delivered, failed, not_due, skipped, remaining, "Flush complete");

        FlushReport::Completed {
            delivered,
            failed,
            not_due,
            skipped,
        }
    }

    /// Run [`flush`](Self::flush) after `delay`, replacing any flush already
    /// scheduled. A flush that has already started is never cancelled.
    pub fn schedule_flush(&self, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let queue = PendingMessageQueue { inner };
            // Detach so aborting this timer cannot interrupt the flush.
            tokio::spawn(async move {
                queue.flush().await;
            });
        });

        if let Some(previous) = self.inner.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Whether a scheduled flush is still waiting to fire.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Drop the scheduled flush, if any.
    pub fn cancel_scheduled_flush(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }

    /// Whether a flush pass is currently running.
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    /// Put every failed entry back in rotation and flush right away.
    pub fn retry_failed(&self) -> usize {
        let max_retries = self.inner.config.max_retries;
        let reset = {
            let mut store = self.inner.store.lock();
            let mut entries = store.read();
            let mut reset = 0;
            for entry in entries.iter_mut().filter(|e| e.is_failed(max_retries)) {
                entry.reset_for_retry();
                reset += 1;
            }
            if reset > 0 {
                store.write(&entries);
            }
            reset
        };

        info!(count = reset, "Retrying failed messages");
        self.schedule_flush(Duration::ZERO);
        reset
    }

    /// Drop every failed entry without delivering it.
    pub fn clear_failed(&self) -> usize {
        let max_retries = self.inner.config.max_retries;
        let cleared = self.remove_where(|e| e.is_failed(max_retries));
        if cleared > 0 {
            info!(count = cleared, "Cleared failed messages");
        }
        cleared
    }

    /// Drop failed entries whose last attempt is older than the configured
    /// TTL, relative to `now`. No-op without a TTL.
    pub fn evict_stale_failed(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.inner.config.failed_ttl else {
            return 0;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };

        let max_retries = self.inner.config.max_retries;
        let evicted = self.remove_where(|e| {
            let reference = e.last_attempt.unwrap_or(e.created_at);
            e.is_failed(max_retries) && now.signed_duration_since(reference) > ttl
        });
        if evicted > 0 {
            warn!(count = evicted, "Evicted stale failed messages");
        }
        evicted
    }

    pub fn stats(&self) -> QueueStats {
        let max_retries = self.inner.config.max_retries;
        let entries = self.read_entries();
        let failed = entries.iter().filter(|e| e.is_failed(max_retries)).count();
        QueueStats {
            total: entries.len(),
            pending: entries.len() - failed,
            failed,
        }
    }

    /// The persisted queue, in delivery order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.read_entries()
    }

    /// Whether storage has fallen back to memory for this process.
    pub fn is_storage_volatile(&self) -> bool {
        self.inner.store.lock().is_volatile()
    }

    /// Run `callback` once `required_count` messages of `conversation_id` have
    /// been delivered, within the configured callback timeout.
    pub fn register_save_callback<F>(&self, conversation_id: &str, required_count: usize, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register_save_callback_with_timeout(
            conversation_id,
            required_count,
            callback,
            self.inner.config.callback_timeout,
        );
    }

    pub fn register_save_callback_with_timeout<F>(
        &self,
        conversation_id: &str,
        required_count: usize,
        callback: F,
        timeout: Duration,
    ) where
        F: FnOnce() + Send + 'static,
    {
        let callback: SaveCallback = Box::new(callback);
        self.inner
            .callbacks
            .register(conversation_id, required_count, callback, timeout);
    }

    pub fn callbacks(&self) -> &SaveCallbackRegistry {
        &self.inner.callbacks
    }

    /// Receive a [`QueueFlushed`] for every delivered message from now on.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueFlushed> {
        self.inner.events.subscribe()
    }

    /// One delivery attempt outside the flush loop, used while storage is
    /// volatile. No attempt bookkeeping: on failure the entry is left as it
    /// was for the flush loop.
    async fn direct_deliver(&self, entry: QueueEntry, _claim: InFlightClaim) {
        debug!(message_id = %entry.id, "Attempting direct delivery");

        match self.attempt(&entry).await {
            Ok(()) => {
                info!(message_id = %entry.id, "Message delivered directly");
                self.on_delivered(&entry);
            }
            Err(reason) => {
                warn!(
                    message_id = %entry.id,
                    error = %reason,
                    "Direct delivery failed, leaving message for the flush loop"
                );
                if !self.is_flush_scheduled() {
                    self.schedule_flush(self.inner.config.retry_window);
                }
            }
        }
    }

    /// Returns `None` if `id` is already being delivered.
    fn claim(&self, id: &str) -> Option<InFlightClaim> {
        if !self.inner.in_flight.lock().insert(id.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            inner: self.inner.clone(),
            id: id.to_string(),
        })
    }

    async fn attempt(&self, entry: &QueueEntry) -> Result<(), String> {
        let message = OutgoingMessage {
            id: entry.id.clone(),
            conversation_id: entry.conversation_id.clone(),
            user_id: entry.user_id.clone(),
            role: entry.role.clone(),
            content: entry.content.clone(),
        };
        let timeout = self.inner.config.attempt_timeout;

        debug!(
            message_id = %entry.id,
            attempt = entry.attempts + 1,
            "Delivering message"
        );

        match tokio::time::timeout(timeout, self.inner.deliverer.deliver(&message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("Save timed out after {}ms", timeout.as_millis())),
        }
    }

    fn on_delivered(&self, entry: &QueueEntry) {
        let removed = self.remove_where(|e| e.id == entry.id);
        info!(
            message_id = %entry.id,
            conversation_id = %entry.conversation_id,
            attempts = entry.attempts + 1,
            removed = removed > 0,
            "Message saved"
        );

        self.inner.callbacks.trigger(&entry.conversation_id);

        // No receivers is fine.
        let _ = self.inner.events.send(QueueFlushed {
            conversation_id: entry.conversation_id.clone(),
            message_id: entry.id.clone(),
        });
    }

    fn on_failed(&self, id: &str, reason: &str) {
        let max_retries = self.inner.config.max_retries;
        let updated = {
            let mut store = self.inner.store.lock();
            let mut entries = store.read();
            let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
                return;
            };
            let terminal = entry.record_failure(reason, Utc::now(), max_retries);
            let attempts = entry.attempts;
            store.write(&entries);
            (terminal, attempts)
        };

        match updated {
            (true, attempts) => error!(
                message_id = %id,
                attempts,
                error = %reason,
                "Message permanently failed after max retries"
            ),
            (false, attempts) => warn!(
                message_id = %id,
                attempts,
                max_retries,
                error = %reason,
                "Message delivery failed, will retry"
            ),
        }
    }

    /// Fresh copy of entry `id` if it is still queued and not failed.
    fn current_pending(&self, id: &str) -> Option<QueueEntry> {
        let max_retries = self.inner.config.max_retries;
        self.read_entries()
            .into_iter()
            .find(|e| e.id == id && e.is_pending(max_retries))
    }

    fn read_entries(&self) -> Vec<QueueEntry> {
        self.inner.store.lock().read()
    }

    /// Remove matching entries in one read-modify-write. Returns how many.
    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let mut store = self.inner.store.lock();
        let mut entries = store.read();
        let before = entries.len();
        entries.retain(|e| !predicate(e));
        let removed = before - entries.len();
        if removed > 0 {
            store.write(&entries);
        }
        removed
    }
}

impl std::fmt::Debug for PendingMessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMessageQueue")
            .field("config", &self.inner.config)
            .field("flushing", &self.is_flushing())
            .finish_non_exhaustive()
    }
}
