// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A cached value with the metadata the store needs for expiry and eviction.
///
/// The persistent tier holds entries as JSON in the shape
/// `{"data": .., "timestamp": <unix millis>, "accessCount": n}`.
///
/// # Examples
///
/// ```
/// use syncwell_store::CacheEntry;
///
/// let entry = CacheEntry::new("payload", 1_000);
/// assert_eq!(*entry.data(), "payload");
/// assert_eq!(entry.access_count(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    data: V,
    timestamp: u64,
    access_count: u64,
}

impl<V> CacheEntry<V> {
    /// Creates a fresh entry stamped at `timestamp` (unix millis) with one recorded access.
    pub fn new(data: V, timestamp: u64) -> Self {
        Self {
            data,
            timestamp,
            access_count: 1,
        }
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn data(&self) -> &V {
        &self.data
    }

    /// Consumes the entry and returns the cached value.
    #[must_use]
    pub fn into_data(self) -> V {
        self.data
    }

    /// Returns the creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns how many times the entry has been written or hit.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Returns the age of the entry at `now` (unix millis).
    ///
    /// A timestamp in the future yields a zero age.
    #[must_use]
    pub fn age(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.timestamp))
    }

    /// Returns `true` if the entry is older than `max_age` at `now`.
    ///
    /// Without a `max_age` an entry never expires.
    #[must_use]
    pub fn is_expired(&self, now: u64, max_age: Option<Duration>) -> bool {
        max_age.is_some_and(|max_age| self.age(now) > max_age)
    }

    pub(crate) fn record_hit(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_with_camel_case_fields() {
        let entry = CacheEntry::new(json!({"id": 7}), 42);
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded, json!({"data": {"id": 7}, "timestamp": 42, "accessCount": 1}));
    }

    #[test]
    fn expiry_is_inclusive_of_max_age() {
        let entry = CacheEntry::new((), 1_000);
        let max_age = Some(Duration::from_millis(500));

        assert!(!entry.is_expired(1_500, max_age));
        assert!(entry.is_expired(1_501, max_age));
        assert!(!entry.is_expired(u64::MAX, None));
    }

    #[test]
    fn future_timestamp_has_zero_age() {
        let entry = CacheEntry::new((), 2_000);
        assert_eq!(entry.age(1_000), Duration::ZERO);
    }

    #[test]
    fn hits_increment_access_count() {
        let mut entry = CacheEntry::new((), 0);
        entry.record_hit();
        entry.record_hit();
        assert_eq!(entry.access_count(), 3);
    }
}
