// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Client-side data synchronization over a tiered cache.
//!
//! A [`SyncClient`] combines three collaborators:
//!
//! - a [`TieredStore`] that keeps responses in a bounded volatile tier and a best-effort
//!   persistent tier,
//! - a [`TokenBroker`] that supplies bearer credentials and refreshes them single-flight,
//! - a [`Transport`] that actually sends requests.
//!
//! On top of them it offers two orchestrators.
//!
//! [`ReadSession`] implements stale-while-revalidate reads for one resource key. Cached data is
//! served immediately when fresh; otherwise a request is issued and its result written back.
//! Requests are numbered by generation and only the most recently issued one may change the
//! session's [`ReadState`], so out-of-order completions are harmless. Sessions revalidate on a
//! timer and when the [`Lifecycle`] reports that the application became visible or came back
//! online, with a guard against revalidation storms.
//!
//! [`Mutation`] sends one state-changing request per call: it applies an optional optimistic
//! update, retries exactly once after refreshing the credential on `401 Unauthorized`, rolls
//! back on failure, and evicts configured keys from the store on success.
//!
//! Nothing below the orchestrators fails across its public API. Errors reach consumers only
//! through [`ReadState::error`] and the result of [`Mutation::mutate`]; cancellation is never
//! an error.
//!
//! # Features
//!
//! - `reqwest`: [`HttpTransport`] and [`HttpRefresher`] over `reqwest`.
//! - `test-util`: scripted transport in [`testing`], plus the test utilities of the store
//!   and auth crates.

mod client;
mod config;
mod error;
#[cfg(feature = "reqwest")]
mod http_client;
mod lifecycle;
mod read;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod transport;
mod write;

#[doc(inline)]
pub use client::{SyncClient, SyncClientBuilder};
#[doc(inline)]
pub use config::{ConfigError, SyncConfig};
#[doc(inline)]
pub use error::{FetchError, MutationError, TransportError};
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
#[doc(inline)]
pub use http_client::{HttpRefresher, HttpTransport};
#[doc(inline)]
pub use lifecycle::{Lifecycle, LifecycleEvent};
#[doc(inline)]
pub use read::{ReadOptions, ReadSession, ReadState, ReadStatus};
#[doc(no_inline)]
pub use syncwell_auth::{MemoryTokenStore, RefreshError, Token, TokenBroker, TokenRefresher, TokenStore};
#[doc(no_inline)]
pub use syncwell_store::{FileKv, MemoryKv, NoopKv, PersistentKv, TieredStore};
#[doc(no_inline)]
pub use tick::Clock;
#[doc(inline)]
pub use transport::{Transport, TransportRequest, TransportResponse};
#[doc(inline)]
pub use write::{Mutation, MutationOptions, MutationState};
