// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scripted transport for testing.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{Transport, TransportError, TransportRequest, TransportResponse};

/// The outcome [`MockTransport`] produces for one request.
#[derive(Debug, Clone)]
pub struct MockReply {
    result: Result<TransportResponse, TransportError>,
    delay: Duration,
}

impl MockReply {
    /// Answers with `response`.
    #[must_use]
    pub fn response(response: TransportResponse) -> Self {
        Self {
            result: Ok(response),
            delay: Duration::ZERO,
        }
    }

    /// Answers with a JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self::response(TransportResponse::json(status, &body))
    }

    /// Answers with a plain-text body.
    #[must_use]
    pub fn text(status: StatusCode, body: &str) -> Self {
        Self::response(TransportResponse::text(status, body))
    }

    /// Answers with no body.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::response(TransportResponse::empty(status))
    }

    /// Fails to send.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self {
            result: Err(TransportError::new(message)),
            delay: Duration::ZERO,
        }
    }

    /// Resolves only after `delay` has passed on the Tokio timer.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = Arc<dyn Fn(usize, &TransportRequest) -> MockReply + Send + Sync>;

/// A [`Transport`] whose replies come from a closure.
///
/// The closure receives the zero-based index of the call and the request. Every request is
/// recorded. Clones share the handler and the record.
///
/// # Examples
///
/// ```
/// use http::{Method, StatusCode};
/// use serde_json::json;
/// use syncwell::testing::{MockReply, MockTransport};
/// use syncwell::{Transport, TransportRequest};
///
/// # futures::executor::block_on(async {
/// let transport = MockTransport::sequence(vec![
///     MockReply::empty(StatusCode::UNAUTHORIZED),
///     MockReply::json(StatusCode::OK, json!({"ok": true})),
/// ]);
///
/// let first = transport.send(TransportRequest::new(Method::GET, "/a")).await.unwrap();
/// let second = transport.send(TransportRequest::new(Method::GET, "/a")).await.unwrap();
///
/// assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
/// assert_eq!(second.status(), StatusCode::OK);
/// assert_eq!(transport.calls(), 2);
/// # });
/// ```
#[derive(Clone)]
pub struct MockTransport {
    handler: Handler,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Creates a transport that asks `handler` for each reply.
    #[must_use]
    pub fn new(handler: impl Fn(usize, &TransportRequest) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            requests: Arc::default(),
        }
    }

    /// Creates a transport that always gives `reply`.
    #[must_use]
    pub fn replying(reply: MockReply) -> Self {
        Self::new(move |_, _| reply.clone())
    }

    /// Creates a transport that gives `replies` in order, repeating the last one.
    #[must_use]
    pub fn sequence(replies: Vec<MockReply>) -> Self {
        Self::new(move |index, _| {
            replies
                .get(index)
                .or_else(|| replies.last())
                .cloned()
                .unwrap_or_else(|| MockReply::error("no scripted reply"))
        })
    }

    /// Returns how many requests were sent.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse, TransportError>> {
        let index = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };
        let MockReply { result, delay } = (self.handler)(index, &request);

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}
