// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Optimistic mutations with one-shot re-authentication.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use syncwell_auth::Token;
use tokio::sync::watch;

use crate::client::ClientInner;
use crate::error::generic_failure;
use crate::transport::server_message;
use crate::{MutationError, TransportRequest, TransportResponse};

type OptimisticUpdate<B> = Arc<dyn Fn(&B) + Send + Sync>;
type Rollback = Arc<dyn Fn() + Send + Sync>;

/// Per-call-site mutation configuration.
///
/// # Examples
///
/// ```
/// use syncwell::MutationOptions;
///
/// let options: MutationOptions<serde_json::Value> = MutationOptions::new()
///     .optimistic_update(|body| println!("showing {body} before the server confirms"))
///     .rollback(|| println!("reverting"))
///     .invalidate_keys(["/users", "/users/count"]);
/// ```
pub struct MutationOptions<B> {
    headers: HeaderMap,
    optimistic_update: Option<OptimisticUpdate<B>>,
    rollback: Option<Rollback>,
    invalidate_keys: Vec<String>,
    clear_on_start: bool,
    timeout: Option<Duration>,
}

impl<B> Default for MutationOptions<B> {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            optimistic_update: None,
            rollback: None,
            invalidate_keys: Vec::new(),
            clear_on_start: false,
            timeout: None,
        }
    }
}

impl<B> Debug for MutationOptions<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("headers", &self.headers)
            .field("optimistic_update", &self.optimistic_update.is_some())
            .field("rollback", &self.rollback.is_some())
            .field("invalidate_keys", &self.invalidate_keys)
            .field("clear_on_start", &self.clear_on_start)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<B> MutationOptions<B> {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `headers` with every request.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Applied to the body before the request is sent.
    #[must_use]
    pub fn optimistic_update(mut self, update: impl Fn(&B) + Send + Sync + 'static) -> Self {
        self.optimistic_update = Some(Arc::new(update));
        self
    }

    /// Undoes the optimistic update when the mutation fails.
    #[must_use]
    pub fn rollback(mut self, rollback: impl Fn() + Send + Sync + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    /// Store keys to evict after a successful mutation.
    #[must_use]
    pub fn invalidate_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.invalidate_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Clears the previous result and error when a mutation starts.
    #[must_use]
    pub fn clear_on_start(mut self, clear: bool) -> Self {
        self.clear_on_start = clear;
        self
    }

    /// Abandons requests that take longer than `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Observable state of a [`Mutation`].
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    /// The parsed result of the last successful mutation.
    pub data: Option<Value>,
    /// Whether a mutation is in flight.
    pub loading: bool,
    /// The error of the last failed mutation.
    pub error: Option<MutationError>,
}

struct MutationFlight {
    generation: u64,
    abort: Option<AbortHandle>,
}

/// One state-changing endpoint, as used from one call site.
///
/// A mutation owns a single cancellation handle: starting a new call, or calling
/// [`cancel`](Self::cancel), aborts the one in flight. An aborted call resolves to `Ok(None)`
/// without touching state, without an error, and without rolling back.
pub struct Mutation<B> {
    method: Method,
    endpoint: String,
    client: Arc<ClientInner>,
    options: MutationOptions<B>,
    timeout: Option<Duration>,
    flight: Mutex<MutationFlight>,
    state: watch::Sender<MutationState>,
}

impl<B> Debug for Mutation<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<B> Mutation<B> {
    pub(crate) fn new(client: Arc<ClientInner>, method: Method, endpoint: String, options: MutationOptions<B>) -> Self {
        let timeout = options.timeout.or_else(|| client.config.request_timeout());
        let (state, _) = watch::channel(MutationState::default());
        Self {
            method,
            endpoint,
            client,
            options,
            timeout,
            flight: Mutex::new(MutationFlight {
                generation: 0,
                abort: None,
            }),
            state,
        }
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    /// Aborts the mutation in flight, if any.
    pub fn cancel(&self) {
        let mut flight = self.flight.lock();
        if let Some(abort) = flight.abort.take() {
            abort.abort();
            flight.generation += 1;
            self.state.send_modify(|state| state.loading = false);
            tracing::info!(mutation.method = %self.method, mutation.endpoint = %self.endpoint, "mutation cancelled");
        }
    }

    fn start(&self) -> (u64, AbortRegistration) {
        let mut flight = self.flight.lock();
        if let Some(previous) = flight.abort.take() {
            previous.abort();
        }
        flight.generation += 1;
        let (abort, registration) = AbortHandle::new_pair();
        flight.abort = Some(abort);

        let clear = self.options.clear_on_start;
        self.state.send_modify(|state| {
            state.loading = true;
            if clear {
                state.data = None;
                state.error = None;
            }
        });
        (flight.generation, registration)
    }

    /// Records the outcome of `generation`. Returns `false` if it was superseded.
    fn finish(&self, generation: u64, outcome: &Result<Option<Value>, MutationError>) -> bool {
        let mut flight = self.flight.lock();
        if flight.generation != generation {
            return false;
        }
        flight.abort = None;

        self.state.send_modify(|state| {
            state.loading = false;
            match outcome {
                Ok(data) => {
                    state.data.clone_from(data);
                    state.error = None;
                }
                Err(error) => state.error = Some(error.clone()),
            }
        });
        true
    }

    fn invalidate(&self) {
        for key in &self.options.invalidate_keys {
            self.client.store.clear(Some(key));
        }
        if !self.options.invalidate_keys.is_empty() {
            tracing::info!(
                mutation.endpoint = %self.endpoint,
                mutation.invalidated = ?self.options.invalidate_keys,
                "invalidated cached keys"
            );
        }
    }

    async fn send(&self, body: Bytes, token: Option<&Token>) -> Result<TransportResponse, MutationError> {
        let request = TransportRequest::new(self.method.clone(), self.endpoint.clone())
            .with_headers(&self.options.headers)
            .with_json_body(body)
            .with_bearer(token);

        let pending = self.client.transport.send(request);
        match self.timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, pending)
                .await
                .map_err(|_elapsed| MutationError::Timeout(limit))??),
            None => Ok(pending.await?),
        }
    }

    async fn execute(&self, body: Bytes, token: Option<Token>) -> Result<Option<Value>, MutationError> {
        let mut response = self.send(body.clone(), token.as_ref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            match self.client.broker.refresh().await {
                Some(fresh) => {
                    tracing::info!(mutation.method = %self.method, mutation.endpoint = %self.endpoint, "retrying with refreshed credential");
                    response = self.send(body, Some(&fresh)).await?;
                }
                None => {
                    tracing::warn!(mutation.method = %self.method, mutation.endpoint = %self.endpoint, "credential refresh failed, not retrying");
                }
            }
        }

        let status = response.status();
        let parsed = response.parse_permissive();
        if !status.is_success() {
            let message = server_message(parsed.as_ref()).unwrap_or_else(|| generic_failure(&self.method, status));
            return Err(MutationError::Status {
                method: self.method.clone(),
                status,
                message,
            });
        }
        Ok(parsed)
    }
}

impl<B: Serialize> Mutation<B> {
    /// Sends `body` and returns the parsed response.
    ///
    /// The optimistic update runs before the request. On failure the rollback runs once and
    /// the error is returned. A `401 Unauthorized` answer triggers one credential refresh and,
    /// if that yields a token, one retry. On success the configured keys are evicted from the
    /// store.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the body cannot be encoded, the request cannot be sent or
    /// times out, or the server answers with a non-success status.
    pub async fn mutate(&self, body: &B) -> Result<Option<Value>, MutationError> {
        let encoded = serde_json::to_vec(body).map_err(|error| MutationError::Encode(Arc::new(error)))?;

        if let Some(update) = &self.options.optimistic_update {
            update(body);
        }

        let token = self.client.broker.effective_token().await;
        let (generation, registration) = self.start();
        tracing::debug!(mutation.method = %self.method, mutation.endpoint = %self.endpoint, mutation.generation = generation, "mutating");

        let Ok(outcome) = Abortable::new(self.execute(Bytes::from(encoded), token), registration).await else {
            tracing::debug!(mutation.endpoint = %self.endpoint, mutation.generation = generation, "mutation aborted");
            return Ok(None);
        };

        if !self.finish(generation, &outcome) {
            tracing::debug!(mutation.endpoint = %self.endpoint, mutation.generation = generation, "discarding superseded mutation");
            return Ok(None);
        }

        match outcome {
            Ok(data) => {
                self.invalidate();
                Ok(data)
            }
            Err(error) => {
                tracing::warn!(mutation.method = %self.method, mutation.endpoint = %self.endpoint, error = %error, "mutation failed");
                if let Some(rollback) = &self.options.rollback {
                    rollback();
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::SyncClient;
    use crate::testing::{MockReply, MockTransport};

    #[tokio::test]
    async fn superseded_outcome_is_not_recorded() {
        let client = SyncClient::builder(MockTransport::replying(MockReply::empty(StatusCode::OK)))
            .build()
            .unwrap();
        let mutation = client.mutation::<Value>(Method::POST, "/items", MutationOptions::new());

        let (first, _) = mutation.start();
        let (second, _) = mutation.start();

        assert!(!mutation.finish(first, &Ok(Some(json!({"id": 1})))));
        assert!(mutation.finish(second, &Ok(Some(json!({"id": 2})))));
        assert_eq!(mutation.state().data, Some(json!({"id": 2})));
        assert!(!mutation.state().loading);
    }

    #[tokio::test]
    async fn clear_on_start_resets_previous_outcome() {
        let client = SyncClient::builder(MockTransport::replying(MockReply::empty(StatusCode::OK)))
            .build()
            .unwrap();
        let mutation = client.mutation::<Value>(Method::PUT, "/items/1", MutationOptions::new().clear_on_start(true));

        let (generation, _) = mutation.start();
        mutation.finish(generation, &Ok(Some(json!({"id": 1}))));
        mutation.start();

        let state = mutation.state();
        assert!(state.loading);
        assert_eq!(state.data, None);
    }
}
