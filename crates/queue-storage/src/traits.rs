//! Storage trait definitions.

use crate::StorageResult;

/// Key/value medium that survives process restarts (or pretends to).
///
/// Writes are synchronous and may be refused at any time (quota, disabled
/// medium, I/O failure).
pub trait DurableMedium: Send + Sync {
    /// Store a value under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve the value under `key`.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
