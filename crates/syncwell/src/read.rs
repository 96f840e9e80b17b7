// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stale-while-revalidate read sessions.

use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use futures::future::{AbortHandle, AbortRegistration, Abortable, Aborted};
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::ClientInner;
use crate::error::generic_failure;
use crate::transport::server_message;
use crate::{FetchError, LifecycleEvent, TransportRequest};

type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Primary state of a read session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadStatus {
    /// Nothing has been requested yet.
    Idle,
    /// A request is in flight.
    Loading,
    /// The last attempt produced data.
    Success,
    /// The last attempt failed.
    Error,
}

/// Observable state of a read session.
///
/// Freshness is tracked separately from [`status`](Self::status): data can be present and
/// stale at the same time, meaning "show it, but it may be outdated".
#[derive(Debug, Clone)]
pub struct ReadState<T> {
    /// The most recent data, kept when a later refresh fails.
    pub data: Option<T>,
    /// Whether a request is in flight.
    pub loading: bool,
    /// The error of the last attempt, if it failed.
    pub error: Option<FetchError>,
    /// Whether `data` is known or suspected to be outdated.
    pub is_stale: bool,
    /// When `data` was last confirmed.
    pub last_updated: Option<SystemTime>,
}

impl<T> Default for ReadState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_stale: false,
            last_updated: None,
        }
    }
}

impl<T> ReadState<T> {
    /// Derives the primary state.
    #[must_use]
    pub fn status(&self) -> ReadStatus {
        if self.loading {
            ReadStatus::Loading
        } else if self.error.is_some() {
            ReadStatus::Error
        } else if self.last_updated.is_some() {
            ReadStatus::Success
        } else {
            ReadStatus::Idle
        }
    }
}

/// Per-session read configuration.
///
/// Unset values fall back to the client's [`SyncConfig`](crate::SyncConfig).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use syncwell::ReadOptions;
///
/// let options: ReadOptions<Vec<u32>> = ReadOptions::new()
///     .revalidate_interval(Duration::from_secs(30))
///     .cache_max_age(Duration::from_secs(60))
///     .on_error(|error| eprintln!("refresh failed: {error}"));
/// ```
pub struct ReadOptions<T> {
    revalidate_interval: Duration,
    use_cache: bool,
    immediate: bool,
    cache_max_age: Option<Duration>,
    timeout: Option<Duration>,
    headers: HeaderMap,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T> Default for ReadOptions<T> {
    fn default() -> Self {
        Self {
            revalidate_interval: Duration::ZERO,
            use_cache: true,
            immediate: true,
            cache_max_age: None,
            timeout: None,
            headers: HeaderMap::new(),
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> Clone for ReadOptions<T> {
    fn clone(&self) -> Self {
        Self {
            revalidate_interval: self.revalidate_interval,
            use_cache: self.use_cache,
            immediate: self.immediate,
            cache_max_age: self.cache_max_age,
            timeout: self.timeout,
            headers: self.headers.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> Debug for ReadOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("revalidate_interval", &self.revalidate_interval)
            .field("use_cache", &self.use_cache)
            .field("immediate", &self.immediate)
            .field("cache_max_age", &self.cache_max_age)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl<T> ReadOptions<T> {
    /// Creates the default options: cached, immediate, no periodic revalidation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revalidates periodically; zero disables the timer.
    #[must_use]
    pub fn revalidate_interval(mut self, interval: Duration) -> Self {
        self.revalidate_interval = interval;
        self
    }

    /// Whether to read from and write to the store.
    #[must_use]
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Whether to fetch as soon as the session begins.
    #[must_use]
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Maximum age of cached data that is served without a request.
    #[must_use]
    pub fn cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = Some(max_age);
        self
    }

    /// Abandons requests that take longer than `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends `headers` with every request.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Called with the data of every successful request.
    #[must_use]
    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called with the error of every failed request. Cancellations are not reported.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// A consumer's view of one resource key.
///
/// The session fetches through the client's store, broker and transport, and publishes every
/// state change to its [`subscribe`](Self::subscribe) receivers. Each request belongs to a generation;
/// starting a request cancels the previous one and only the current generation may change
/// state, so the observable state always reflects the most recently issued request.
///
/// While open, the session revalidates on its interval and whenever the client's
/// [`Lifecycle`](crate::Lifecycle) reports the application visible or back online, at most
/// once per revalidation guard. [`close`](Self::close), which also runs on drop, cancels the
/// in-flight request and stops every trigger; nothing changes state afterwards.
pub struct ReadSession<T> {
    session: Arc<Session<T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> Debug for ReadSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSession")
            .field("key", &self.session.key)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl<T> ReadSession<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Starts observing `key`.
    ///
    /// A valid cached value seeds the state without a request. Otherwise, when `immediate` is
    /// set, a request is started in the background.
    pub(crate) fn begin(client: Arc<ClientInner>, key: String, options: ReadOptions<T>) -> Self {
        let cache_max_age = options.cache_max_age.unwrap_or_else(|| client.config.default_cache_max_age());
        let timeout = options.timeout.or_else(|| client.config.request_timeout());
        let guard = client.config.revalidate_guard();
        let events = client.lifecycle.subscribe();
        let (state, _) = watch::channel(ReadState::default());

        let session = Arc::new(Session {
            key,
            client,
            use_cache: options.use_cache,
            cache_max_age,
            timeout,
            guard,
            headers: options.headers,
            on_success: options.on_success,
            on_error: options.on_error,
            state,
            flight: Mutex::new(Flight {
                generation: 0,
                abort: None,
                active: true,
            }),
            last_revalidation: Mutex::new(None),
        });
        tracing::debug!(read.key = %session.key, "read session started");

        let mut tasks = Vec::with_capacity(3);
        let seeded = session.use_cache && session.serve_cached();
        if !seeded && options.immediate {
            session.state.send_modify(|state| state.loading = true);
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move { session.fetch_data(true).await }));
        }

        if !options.revalidate_interval.is_zero() {
            tasks.push(tokio::spawn(revalidate_on_interval(
                Arc::downgrade(&session),
                options.revalidate_interval,
            )));
        }
        tasks.push(tokio::spawn(revalidate_on_lifecycle(Arc::downgrade(&session), events)));

        Self {
            session,
            tasks: Mutex::new(tasks),
        }
    }

    /// Fetches the resource.
    ///
    /// Without `force`, a valid cached value is served instead of a request. Resolves once
    /// the request has completed, been superseded, or been cancelled.
    pub async fn fetch_data(&self, force: bool) {
        self.session.fetch_data(force).await;
    }

    /// Fetches the resource from the network, bypassing the cache.
    pub async fn refetch(&self) {
        self.session.fetch_data(true).await;
    }
}

impl<T> ReadSession<T> {
    /// Returns the resource key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.session.key
    }

    /// Returns `true` until the session is closed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.flight.lock().active
    }

    /// Removes the key from the store and marks the data stale, without fetching.
    pub fn clear_cache(&self) {
        self.session.client.store.clear(Some(&self.session.key));
        if self.session.flight.lock().active {
            self.session.state.send_modify(|state| state.is_stale = true);
        }
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        if !self.session.retire() {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(read.key = %self.session.key, "read session closed");
    }
}

impl<T: Clone> ReadSession<T> {
    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ReadState<T> {
        self.session.state.borrow().clone()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadState<T>> {
        self.session.state.subscribe()
    }
}

impl<T> Drop for ReadSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Flight {
    generation: u64,
    abort: Option<AbortHandle>,
    active: bool,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Interval,
    Visible,
    Online,
}

enum Notify<T> {
    Success(T),
    Failure(FetchError),
}

struct Session<T> {
    key: String,
    client: Arc<ClientInner>,
    use_cache: bool,
    cache_max_age: Duration,
    timeout: Option<Duration>,
    guard: Duration,
    headers: HeaderMap,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback>,
    state: watch::Sender<ReadState<T>>,
    flight: Mutex<Flight>,
    last_revalidation: Mutex<Option<Instant>>,
}

impl<T> Session<T> {
    /// Deactivates the session and cancels its request. Returns `false` if already retired.
    fn retire(&self) -> bool {
        let mut flight = self.flight.lock();
        if !flight.active {
            return false;
        }
        flight.active = false;
        flight.generation += 1;
        if let Some(abort) = flight.abort.take() {
            abort.abort();
        }
        true
    }

    /// Starts a new generation, cancelling the previous request.
    fn start_flight(&self) -> Option<(u64, AbortRegistration)> {
        let mut flight = self.flight.lock();
        if !flight.active {
            return None;
        }
        if let Some(previous) = flight.abort.take() {
            previous.abort();
        }
        flight.generation += 1;
        let (abort, registration) = AbortHandle::new_pair();
        flight.abort = Some(abort);

        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        Some((flight.generation, registration))
    }

    /// Claims the passive revalidation slot unless one was claimed within the guard.
    fn claim_revalidation(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_revalidation.lock();
        if last.is_some_and(|last| now.duration_since(last) < self.guard) {
            return false;
        }
        *last = Some(now);
        true
    }
}

impl<T> Session<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn fetch_data(&self, force: bool) {
        if !force && self.use_cache && self.serve_cached() {
            return;
        }

        let Some((generation, registration)) = self.start_flight() else {
            return;
        };
        tracing::debug!(read.key = %self.key, read.generation = generation, "fetching");

        match Abortable::new(self.request(), registration).await {
            Ok(outcome) => self.complete(generation, outcome),
            Err(Aborted) => {
                tracing::debug!(read.key = %self.key, read.generation = generation, "request cancelled");
            }
        }
    }

    async fn revalidate(&self, trigger: Trigger) {
        if !self.claim_revalidation() {
            tracing::debug!(read.key = %self.key, read.trigger = ?trigger, "revalidation suppressed");
            return;
        }
        tracing::debug!(read.key = %self.key, read.trigger = ?trigger, "revalidating");
        self.fetch_data(true).await;
    }

    /// Applies a valid cached value as a success. Returns `true` if the cache answered.
    fn serve_cached(&self) -> bool {
        let Some(value) = self.client.store.get(&self.key, Some(self.cache_max_age)) else {
            return false;
        };
        let data: T = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(read.key = %self.key, error = %error, "cached value has an unexpected shape");
                return false;
            }
        };

        let mut flight = self.flight.lock();
        if !flight.active {
            return true;
        }
        if let Some(previous) = flight.abort.take() {
            previous.abort();
        }
        flight.generation += 1;

        let now = self.client.clock.system_time();
        self.state.send_modify(|state| {
            state.data = Some(data);
            state.loading = false;
            state.error = None;
            state.is_stale = false;
            state.last_updated = Some(now);
        });
        tracing::debug!(read.key = %self.key, "served from cache");
        true
    }

    async fn request(&self) -> Result<(Value, T), FetchError> {
        let token = self.client.broker.effective_token().await;
        let request = TransportRequest::new(Method::GET, self.key.clone())
            .with_headers(&self.headers)
            .with_bearer(token.as_ref());

        let pending = self.client.transport.send(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_elapsed| FetchError::Timeout(limit))??,
            None => pending.await?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = server_message(response.parse_permissive().as_ref()).unwrap_or_else(|| generic_failure(&Method::GET, status));
            return Err(FetchError::Status { status, message });
        }

        let value: Value = serde_json::from_slice(response.body()).map_err(|error| FetchError::Decode(Arc::new(error)))?;
        let data = serde_json::from_value(value.clone()).map_err(|error| FetchError::Decode(Arc::new(error)))?;
        Ok((value, data))
    }

    /// Applies the outcome of `generation` if it is still current.
    fn complete(&self, generation: u64, outcome: Result<(Value, T), FetchError>) {
        let notify = {
            let mut flight = self.flight.lock();
            if !flight.active || flight.generation != generation {
                tracing::debug!(read.key = %self.key, read.generation = generation, "discarding superseded response");
                return;
            }
            flight.abort = None;

            match outcome {
                Ok((value, data)) => {
                    if self.use_cache {
                        self.client.store.set(&self.key, value);
                    }
                    let now = self.client.clock.system_time();
                    self.state.send_modify(|state| {
                        state.data = Some(data.clone());
                        state.loading = false;
                        state.error = None;
                        state.is_stale = false;
                        state.last_updated = Some(now);
                    });
                    Notify::Success(data)
                }
                Err(error) => {
                    tracing::warn!(read.key = %self.key, read.generation = generation, error = %error, "fetch failed");
                    self.state.send_modify(|state| {
                        state.loading = false;
                        state.error = Some(error.clone());
                        state.is_stale = true;
                    });
                    Notify::Failure(error)
                }
            }
        };

        match notify {
            Notify::Success(data) => {
                if let Some(callback) = &self.on_success {
                    callback(&data);
                }
            }
            Notify::Failure(error) => {
                if let Some(callback) = &self.on_error {
                    callback(&error);
                }
            }
        }
    }
}

async fn revalidate_on_interval<T>(session: Weak<Session<T>>, period: Duration)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    // A period past the end of representable time never elapses.
    let Some(first) = Instant::now().checked_add(period) else {
        return;
    };
    let mut ticks = tokio::time::interval_at(first, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let Some(session) = session.upgrade() else {
            return;
        };
        session.revalidate(Trigger::Interval).await;
    }
}

async fn revalidate_on_lifecycle<T>(session: Weak<Session<T>>, mut events: tokio::sync::broadcast::Receiver<LifecycleEvent>)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    loop {
        let trigger = match events.recv().await {
            Ok(LifecycleEvent::Visible) => Trigger::Visible,
            Ok(LifecycleEvent::Online) => Trigger::Online,
            Ok(LifecycleEvent::Hidden | LifecycleEvent::Offline) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        };
        let Some(session) = session.upgrade() else {
            return;
        };
        session.revalidate(trigger).await;
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::SyncClient;
    use crate::testing::{MockReply, MockTransport};

    fn client(transport: MockTransport) -> SyncClient {
        SyncClient::builder(transport).build().unwrap()
    }

    #[tokio::test]
    async fn superseded_generation_cannot_change_state() {
        let client = client(MockTransport::replying(MockReply::json(StatusCode::OK, json!([1]))));
        let session = client.read::<Vec<u32>>("/numbers", ReadOptions::new().immediate(false));
        let inner = &session.session;

        let (first, _) = inner.start_flight().unwrap();
        let (second, _) = inner.start_flight().unwrap();

        inner.complete(second, Ok((json!([2]), vec![2])));
        inner.complete(first, Ok((json!([1]), vec![1])));

        assert_eq!(session.state().data, Some(vec![2]));
        assert_eq!(client.store().get("/numbers", None), Some(json!([2])));
    }

    #[tokio::test]
    async fn retired_session_ignores_late_results() {
        let client = client(MockTransport::replying(MockReply::json(StatusCode::OK, json!([1]))));
        let session = client.read::<Vec<u32>>("/numbers", ReadOptions::new().immediate(false));

        let (generation, _) = session.session.start_flight().unwrap();
        session.close();
        session.session.complete(generation, Ok((json!([1]), vec![1])));

        assert_eq!(session.state().data, None);
        assert!(session.session.start_flight().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_guard_suppresses_bursts() {
        let client = client(MockTransport::replying(MockReply::json(StatusCode::OK, json!([]))));
        let session = client.read::<Vec<u32>>("/numbers", ReadOptions::new().immediate(false));

        assert!(session.session.claim_revalidation());
        assert!(!session.session.claim_revalidation());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(session.session.claim_revalidation());
    }

    #[test]
    fn status_is_derived_from_flags() {
        let mut state = ReadState::<u8>::default();
        assert_eq!(state.status(), ReadStatus::Idle);

        state.loading = true;
        assert_eq!(state.status(), ReadStatus::Loading);

        state.loading = false;
        state.data = Some(1);
        state.last_updated = Some(SystemTime::now());
        assert_eq!(state.status(), ReadStatus::Success);

        state.error = Some(FetchError::Timeout(Duration::from_secs(1)));
        state.is_stale = true;
        assert_eq!(state.status(), ReadStatus::Error);
    }
}
