//! Persisted queue entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal marker on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Explicitly back in rotation (written by older clients after a manual retry).
    Pending,
    /// Permanently abandoned; never retried automatically.
    Failed,
}

/// One chat message awaiting durable delivery.
///
/// Field names and millisecond timestamps match the layout the web client
/// has always written, so existing queues load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Client-generated id, stable across retries.
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
}

impl QueueEntry {
    /// Create a fresh entry with no attempts.
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            role: role.into(),
            content: content.into(),
            attempts: 0,
            created_at,
            last_attempt: None,
            last_error: None,
            status: None,
        }
    }

    /// Failed entries are marked `failed` or have used up every attempt.
    pub fn is_failed(&self, max_retries: u32) -> bool {
        self.status == Some(EntryStatus::Failed) || self.attempts >= max_retries
    }

    /// Still eligible for automatic delivery.
    pub fn is_pending(&self, max_retries: u32) -> bool {
        !self.is_failed(max_retries)
    }

    /// Record one failed attempt. Returns `true` when this failure made the
    /// entry terminal.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
        self.last_error = Some(error.into());

        if self.attempts >= max_retries && self.status != Some(EntryStatus::Failed) {
            self.status = Some(EntryStatus::Failed);
            return true;
        }
        false
    }

    /// Put a failed entry back in rotation, due immediately.
    pub fn reset_for_retry(&mut self) {
        self.attempts = 0;
        self.status = None;
        self.last_attempt = None;
    }
}
