// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scripted refresher for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::{RefreshError, Token, TokenRefresher};

/// A [`TokenRefresher`] that issues numbered tokens, or always fails.
///
/// Issued tokens are named `<prefix>-<n>`, where `n` counts refresh calls starting at 1.
/// Clones share the call counter.
///
/// # Examples
///
/// ```
/// use syncwell_auth::testing::FakeRefresher;
/// use syncwell_auth::TokenRefresher;
///
/// # futures::executor::block_on(async {
/// let refresher = FakeRefresher::issuing("t");
/// assert_eq!(refresher.refresh().await.unwrap().value(), "t-1");
/// assert_eq!(refresher.calls(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct FakeRefresher {
    prefix: Option<Arc<str>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeRefresher {
    /// Creates a refresher that succeeds.
    #[must_use]
    pub fn issuing(prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.into()),
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    /// Creates a refresher whose every attempt is rejected.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            prefix: None,
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    /// Makes each refresh wait `delay` on the Tokio timer before resolving.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns how many refreshes were started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl TokenRefresher for FakeRefresher {
    fn refresh(&self) -> BoxFuture<'static, Result<Token, RefreshError>> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        let prefix = self.prefix.clone();
        let delay = self.delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            prefix
                .map(|prefix| Token::new(format!("{prefix}-{call}")))
                .ok_or_else(|| RefreshError::Rejected("refresh disabled".into()))
        }
        .boxed()
    }
}
