// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{KvError, Result};
use crate::kv::{PersistentKv, footprint};

/// An in-process persistent tier with an optional byte quota.
///
/// Clones share the same storage, so a test can hand one clone to the store and inspect the
/// other. The quota counts key and value bytes; a write that would exceed it fails with
/// [`KvError::QuotaExceeded`] and leaves the storage untouched.
///
/// # Examples
///
/// ```
/// use syncwell_store::{KvError, MemoryKv, PersistentKv};
///
/// let kv = MemoryKv::with_quota(8);
/// kv.set("a", "1234").unwrap();
/// assert!(matches!(kv.set("b", "12345678"), Err(KvError::QuotaExceeded)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<Mutex<HashMap<String, String>>>,
    quota: Option<usize>,
}

impl MemoryKv {
    /// Creates an unbounded in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory backend that holds at most `quota` bytes.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: Arc::default(),
            quota: Some(quota),
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Returns the bytes currently charged against the quota.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        footprint(self.data.lock().iter())
    }
}

impl PersistentKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock();
        if let Some(quota) = self.quota {
            let others = footprint(data.iter().filter(|(existing, _)| existing.as_str() != key));
            if others + key.len() + value.len() > quota {
                return Err(KvError::QuotaExceeded);
            }
        }
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }
}
