//! Whole-queue persistence with permanent volatile fallback.

use crate::{DurableMedium, QueueEntry, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Well-known key the queue snapshot lives under.
pub const QUEUE_KEY: &str = "pending_messages_queue";

/// Current persisted layout version.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// Key written and removed once at startup to check the medium works.
const PROBE_KEY: &str = "__storage_probe__";

/// Where reads and writes currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Backed by the durable medium.
    Durable,
    /// In-process mirror only; lost on restart. Never switches back.
    Volatile,
}

/// Result of persisting a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The durable medium accepted the snapshot.
    Durable,
    /// Only the in-process mirror holds the snapshot.
    Volatile,
}

impl WriteOutcome {
    /// Whether the snapshot will survive a restart.
    pub fn is_durable(self) -> bool {
        matches!(self, WriteOutcome::Durable)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    entries: &'a [QueueEntry],
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    entries: Vec<QueueEntry>,
}

/// Either the versioned envelope or the bare array older clients wrote.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredQueue {
    Versioned(Envelope),
    Legacy(Vec<QueueEntry>),
}

/// Reads and writes the full queue snapshot.
///
/// Any failed durable write moves the store into [`StoreMode::Volatile`] for
/// the rest of the process lifetime; the snapshot that failed is kept in the
/// mirror so nothing enqueued is lost while the process runs.
pub struct DurableQueueStore {
    medium: Option<Box<dyn DurableMedium>>,
    key: String,
    mode: StoreMode,
    mirror: Vec<QueueEntry>,
}

impl DurableQueueStore {
    /// Open a store on `medium`, probing it first. A medium that fails the
    /// probe yields a store that starts volatile.
    pub fn open(medium: Box<dyn DurableMedium>) -> Self {
        Self::open_with_key(medium, QUEUE_KEY)
    }

    /// Same as [`open`](Self::open) with a custom key.
    pub fn open_with_key(medium: Box<dyn DurableMedium>, key: &str) -> Self {
        let mode = match probe(medium.as_ref()) {
            Ok(()) => StoreMode::Durable,
            Err(err) => {
                warn!(error = %err, "Durable storage unavailable, using in-memory queue");
                StoreMode::Volatile
            }
        };

        Self {
            medium: Some(medium),
            key: key.to_string(),
            mode,
            mirror: Vec::new(),
        }
    }

    /// A store with no durable medium at all.
    pub fn volatile() -> Self {
        Self {
            medium: None,
            key: QUEUE_KEY.to_string(),
            mode: StoreMode::Volatile,
            mirror: Vec::new(),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn is_volatile(&self) -> bool {
        self.mode == StoreMode::Volatile
    }

    /// Current queue snapshot. Missing, unreadable or corrupt data reads as empty.
    pub fn read(&self) -> Vec<QueueEntry> {
        let medium = match (self.mode, &self.medium) {
            (StoreMode::Durable, Some(medium)) => medium,
            _ => return self.mirror.clone(),
        };

        let raw = match medium.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "Failed to read queue");
                return Vec::new();
            }
        };

        match serde_json::from_str::<StoredQueue>(&raw) {
            Ok(StoredQueue::Versioned(envelope)) if envelope.version == QUEUE_FORMAT_VERSION => {
                envelope.entries
            }
            Ok(StoredQueue::Versioned(envelope)) => {
                warn!(
                    version = envelope.version,
                    supported = QUEUE_FORMAT_VERSION,
                    "Unsupported queue format version, ignoring stored queue"
                );
                Vec::new()
            }
            Ok(StoredQueue::Legacy(entries)) => {
                debug!(count = entries.len(), "Loaded unversioned queue snapshot");
                entries
            }
            Err(err) => {
                warn!(error = %err, "Stored queue is corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Persist `entries` as the whole queue.
    pub fn write(&mut self, entries: &[QueueEntry]) -> WriteOutcome {
        if self.mode == StoreMode::Durable {
            if let Some(medium) = &self.medium {
                match write_snapshot(medium.as_ref(), &self.key, entries) {
                    Ok(()) => return WriteOutcome::Durable,
                    Err(err) => {
                        warn!(
                            error = %err,
                            entries = entries.len(),
                            "Failed to save queue, switching to in-memory storage"
                        );
                        self.mode = StoreMode::Volatile;
                    }
                }
            }
        }

        self.mirror = entries.to_vec();
        WriteOutcome::Volatile
    }
}

impl std::fmt::Debug for DurableQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueueStore")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("mirror_len", &self.mirror.len())
            .finish_non_exhaustive()
    }
}

fn probe(medium: &dyn DurableMedium) -> StorageResult<()> {
    medium.set(PROBE_KEY, "1")?;
    medium.delete(PROBE_KEY)?;
    info!("Durable queue storage available");
    Ok(())
}

fn write_snapshot(
    medium: &dyn DurableMedium,
    key: &str,
    entries: &[QueueEntry],
) -> Result<(), StorageError> {
    let body = serde_json::to_string(&EnvelopeRef {
        version: QUEUE_FORMAT_VERSION,
        entries,
    })?;
    medium.set(key, &body)
}
