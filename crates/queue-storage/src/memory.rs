//! In-process medium.

use crate::{DurableMedium, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Map-backed medium, optionally limited to a byte quota across all values
/// (the way browser storage is).
#[derive(Debug, Default)]
pub struct MemoryMedium {
    data: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryMedium {
    /// Unlimited medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium that refuses writes once the stored keys and values would exceed
    /// `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Total bytes currently stored.
    pub fn used_bytes(&self) -> usize {
        self.data
            .lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl DurableMedium for MemoryMedium {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.lock();
        if let Some(quota) = self.quota {
            let others: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }
}
