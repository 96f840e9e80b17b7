// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A two-tier key/value cache for client-side API data.
//!
//! [`TieredStore`] keeps a bounded volatile tier in memory and mirrors every write into a
//! persistent tier behind the [`PersistentKv`] capability. Reads are TTL-aware: the caller
//! decides how old an entry may be, and expired entries are dropped from both tiers.
//!
//! The persistent tier is an optimization, never a guarantee. Quota errors trigger pruning of
//! the oldest persisted entries and every other persistent failure degrades silently to
//! volatile-only operation, so no store operation ever fails.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use syncwell_store::{MemoryKv, TieredStore};
//!
//! let store = TieredStore::builder()
//!     .capacity(50)
//!     .persistent(MemoryKv::new())
//!     .build();
//!
//! store.set("users", json!([1, 2, 3]));
//! assert_eq!(store.get("users", Some(Duration::from_secs(60))), Some(json!([1, 2, 3])));
//! ```
//!
//! # Eviction
//!
//! When the volatile tier grows past its capacity, the entry with the lowest access count is
//! evicted (oldest first among equals). Evicted entries stay in the persistent tier and are
//! rehydrated on the next hit.

mod entry;
pub mod error;
mod file;
mod kv;
mod memory;
mod store;
mod telemetry;
mod timestamp;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use error::KvError;
#[doc(inline)]
pub use file::FileKv;
#[doc(inline)]
pub use kv::{NoopKv, PersistentKv};
#[doc(inline)]
pub use memory::MemoryKv;
#[doc(inline)]
pub use store::{DEFAULT_CAPACITY, DEFAULT_PREFIX, StoreBuilder, TieredStore};
#[doc(inline)]
pub use timestamp::{system_clock, unix_millis};
