// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bearer credentials on demand, without duplicated refresh work.
//!
//! [`TokenBroker`] answers one question for request orchestrators: "which credential should
//! this request carry?" It reads the current [`Token`] from a [`TokenStore`], refreshes it
//! through a [`TokenRefresher`] when it is missing or about to expire, and guarantees that at
//! most one refresh is in flight at any instant. Concurrent callers that need a refresh all
//! await the same operation and receive the same outcome.
//!
//! Nothing in this crate fails across its public API: a refresh that cannot produce a token
//! simply yields `None`.
//!
//! # Examples
//!
//! ```
//! use futures::FutureExt;
//! use futures::future::BoxFuture;
//! use syncwell_auth::{MemoryTokenStore, RefreshError, Token, TokenBroker, TokenRefresher};
//!
//! struct StaticRefresher;
//!
//! impl TokenRefresher for StaticRefresher {
//!     fn refresh(&self) -> BoxFuture<'static, Result<Token, RefreshError>> {
//!         async { Ok(Token::new("fresh")) }.boxed()
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let broker = TokenBroker::builder(StaticRefresher)
//!     .store(MemoryTokenStore::new())
//!     .build();
//!
//! let token = broker.effective_token().await.expect("refresh succeeds");
//! assert_eq!(token.bearer(), "Bearer fresh");
//! # });
//! ```

mod broker;
mod refresher;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod token;

#[doc(inline)]
pub use broker::{BrokerBuilder, DEFAULT_REFRESH_LEEWAY, TokenBroker};
#[doc(inline)]
pub use refresher::{RefreshError, TokenRefresher};
#[doc(inline)]
pub use store::{MemoryTokenStore, TokenStore};
#[doc(inline)]
pub use token::Token;
