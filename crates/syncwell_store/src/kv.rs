// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The persistent-tier capability.
//!
//! [`PersistentKv`] is deliberately small: string keys, string values and a key listing. The
//! store owns the key prefix and the value encoding; a backend only has to move strings.

use std::fmt::Debug;

use crate::error::Result;

/// A string key/value backend used as the store's persistent tier.
///
/// Operations are synchronous so the store can run a whole tiered read-then-write-back under
/// a single lock. Implementations may fail freely; the store swallows every error.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
///
/// use parking_lot::Mutex;
/// use syncwell_store::{KvError, PersistentKv};
///
/// #[derive(Debug, Default)]
/// struct MapKv(Mutex<HashMap<String, String>>);
///
/// impl PersistentKv for MapKv {
///     fn get(&self, key: &str) -> Result<Option<String>, KvError> {
///         Ok(self.0.lock().get(key).cloned())
///     }
///
///     fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
///         self.0.lock().insert(key.to_owned(), value.to_owned());
///         Ok(())
///     }
///
///     fn remove(&self, key: &str) -> Result<(), KvError> {
///         self.0.lock().remove(key);
///         Ok(())
///     }
///
///     fn keys(&self) -> Result<Vec<String>, KvError> {
///         Ok(self.0.lock().keys().cloned().collect())
///     }
/// }
/// ```
pub trait PersistentKv: Send + Sync + Debug {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Lists every key currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

/// A persistent tier that stores nothing.
///
/// Used when persistence is disabled: reads always miss and writes are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKv;

impl PersistentKv for NoopKv {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Bytes charged against a quota for a set of stored pairs.
pub(crate) fn footprint<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> usize {
    pairs.map(|(key, value)| key.len() + value.len()).sum()
}
