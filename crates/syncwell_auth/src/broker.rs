// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use syncwell_store::system_clock;
use tick::Clock;
use uniflight::UniFlight;

use crate::{MemoryTokenStore, Token, TokenRefresher, TokenStore};

/// How long before its expiry a token is proactively refreshed.
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(30);

/// Supplies the credential to attach to outgoing requests.
///
/// At most one refresh runs at a time. Callers that ask for a refresh while one is pending
/// join it and observe its outcome. Once it resolves, or once every caller waiting on it has
/// gone away, the next request for a refresh starts a new one.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct TokenBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Clock,
    leeway: Duration,
    // Keyed by session so callers after a sign-out never join an earlier refresh.
    flights: UniFlight<u64, Option<Token>>,
    running: Arc<AtomicUsize>,
    // Bumped on sign-out so refreshes started earlier cannot store their result.
    session: Arc<AtomicU64>,
}

/// Counts a refresh as running for as long as its future is alive.
struct RunningRefresh(Arc<AtomicUsize>);

impl RunningRefresh {
    fn enter(running: &Arc<AtomicUsize>) -> Self {
        running.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(running))
    }
}

impl Drop for RunningRefresh {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("store", &self.inner.store)
            .field("leeway", &self.inner.leeway)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl TokenBroker {
    /// Creates a builder around `refresher`.
    #[must_use]
    pub fn builder(refresher: impl TokenRefresher + 'static) -> BrokerBuilder {
        BrokerBuilder::new(Arc::new(refresher))
    }

    /// Returns the stored token without validating or refreshing it.
    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.inner.store.load()
    }

    /// Returns `true` while a refresh is pending.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) > 0
    }

    /// Returns a token suitable for the next request, refreshing it if needed.
    ///
    /// A stored token that stays valid beyond the refresh leeway is returned as is. A missing
    /// token, or one inside the leeway, triggers (or joins) a refresh. If that refresh fails,
    /// the stored token is still returned while it has not actually expired; otherwise the
    /// result is `None`.
    pub async fn effective_token(&self) -> Option<Token> {
        let Some(current) = self.inner.store.load() else {
            return self.refresh().await;
        };

        if !current.expires_within(self.inner.clock.system_time(), self.inner.leeway) {
            return Some(current);
        }

        match self.refresh().await {
            Some(token) => Some(token),
            None if !current.is_expired_at(self.inner.clock.system_time()) => {
                tracing::debug!(auth.activity = "auth.reused", "refresh failed, reusing unexpired token");
                Some(current)
            }
            None => None,
        }
    }

    /// Refreshes the token, joining a refresh that is already pending.
    ///
    /// A successful refresh stores the new token before it is returned. Failures are logged
    /// and reported as `None`.
    ///
    /// Dropping the returned future detaches this caller. The refresh itself is cancelled only
    /// when no caller is left waiting on it.
    pub async fn refresh(&self) -> Option<Token> {
        if self.is_refreshing() {
            tracing::debug!(auth.activity = "auth.refresh_joined", "joining pending token refresh");
        }

        let session = self.inner.session.load(Ordering::Acquire);
        self.inner.flights.work(session, || self.start_refresh(session)).await
    }

    /// Forgets the stored token.
    ///
    /// A refresh that is pending at this point still completes for its callers, but its
    /// token is not stored.
    pub fn sign_out(&self) {
        self.inner.session.fetch_add(1, Ordering::AcqRel);
        self.inner.store.clear();
        tracing::info!(auth.activity = "auth.signed_out", "signed out");
    }

    async fn start_refresh(&self, started_in: u64) -> Option<Token> {
        let _running = RunningRefresh::enter(&self.inner.running);
        let pending = self.inner.refresher.refresh();
        tracing::debug!(auth.activity = "auth.refresh_started", "token refresh started");

        match pending.await {
            Ok(token) => {
                if self.inner.session.load(Ordering::Acquire) == started_in {
                    self.inner.store.save(&token);
                }
                tracing::info!(auth.activity = "auth.refreshed", "token refreshed");
                Some(token)
            }
            Err(error) => {
                tracing::warn!(auth.activity = "auth.refresh_failed", error = %error, "token refresh failed");
                None
            }
        }
    }
}

/// Builder for [`TokenBroker`].
pub struct BrokerBuilder {
    refresher: Arc<dyn TokenRefresher>,
    store: Option<Arc<dyn TokenStore>>,
    clock: Option<Clock>,
    leeway: Duration,
}

impl Debug for BrokerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("store", &self.store)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl BrokerBuilder {
    /// Creates a builder around a shared refresher.
    #[must_use]
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            store: None,
            clock: None,
            leeway: DEFAULT_REFRESH_LEEWAY,
        }
    }

    /// Sets where the token is kept. Defaults to a fresh [`MemoryTokenStore`].
    #[must_use]
    pub fn store(self, store: impl TokenStore + 'static) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Sets a shared token store.
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the clock used to judge expiry. Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets how long before expiry a token is refreshed.
    #[must_use]
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Builds the broker.
    #[must_use]
    pub fn build(self) -> TokenBroker {
        TokenBroker {
            inner: Arc::new(BrokerInner {
                store: self.store.unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
                refresher: self.refresher,
                clock: self.clock.unwrap_or_else(system_clock),
                leeway: self.leeway,
                flights: UniFlight::new(),
                running: Arc::new(AtomicUsize::new(0)),
                session: Arc::new(AtomicU64::new(0)),
            }),
        }
    }
}
