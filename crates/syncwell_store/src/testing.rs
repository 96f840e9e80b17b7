// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock persistent tier for testing.
//!
//! [`MockKv`] is an in-memory [`PersistentKv`] that records every operation and fails the
//! operations a caller-supplied predicate selects, which makes degradation paths easy to
//! exercise.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{KvError, PersistentKv};

/// Recorded persistent-tier operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// A read of the given key.
    Get(String),
    /// A write of the given key and value.
    Set {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: String,
    },
    /// A removal of the given key.
    Remove(String),
    /// A key listing.
    Keys,
}

type FailPredicate = Box<dyn Fn(&KvOp) -> Option<KvError> + Send + Sync>;

/// A configurable mock persistent tier.
///
/// # Examples
///
/// ```
/// use syncwell_store::testing::{KvOp, MockKv};
/// use syncwell_store::{KvError, PersistentKv};
///
/// let kv = MockKv::new();
/// kv.fail_when(|op| matches!(op, KvOp::Set { .. }).then_some(KvError::QuotaExceeded));
///
/// assert!(kv.set("key", "value").is_err());
/// assert_eq!(kv.get("key").unwrap(), None);
/// ```
#[derive(Clone, Default)]
pub struct MockKv {
    data: Arc<Mutex<HashMap<String, String>>>,
    operations: Arc<Mutex<Vec<KvOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKv")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockKv {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes operations fail with the error returned by `predicate`.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&KvOp) -> Option<KvError> + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Makes every operation fail as if storage were disabled.
    pub fn disable(&self) {
        self.fail_when(|_| Some(KvError::Unavailable("storage disabled".into())));
    }

    /// Lets all operations succeed again.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a copy of every recorded operation.
    #[must_use]
    pub fn operations(&self) -> Vec<KvOp> {
        self.operations.lock().clone()
    }

    /// Forgets recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Returns `true` if `key` is stored, without recording an operation.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    fn check(&self, op: KvOp) -> Result<(), KvError> {
        let failure = self.fail_when.lock().as_ref().and_then(|predicate| predicate(&op));
        self.operations.lock().push(op);
        failure.map_or(Ok(()), Err)
    }
}

impl PersistentKv for MockKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check(KvOp::Get(key.to_owned()))?;
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.check(KvOp::Set {
            key: key.to_owned(),
            value: value.to_owned(),
        })?;
        self.data.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.check(KvOp::Remove(key.to_owned()))?;
        self.data.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        self.check(KvOp::Keys)?;
        Ok(self.data.lock().keys().cloned().collect())
    }
}
