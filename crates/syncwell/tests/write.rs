// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for mutations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use syncwell::testing::{MockReply, MockTransport};
use syncwell::{MemoryTokenStore, MutationError, MutationOptions, SyncClient, Token, TransportResponse};
use syncwell_auth::testing::FakeRefresher;

#[derive(Clone, Default)]
struct Calls {
    optimistic: Arc<AtomicUsize>,
    rollback: Arc<AtomicUsize>,
}

impl Calls {
    fn options(&self) -> MutationOptions<Value> {
        let optimistic = Arc::clone(&self.optimistic);
        let rollback = Arc::clone(&self.rollback);
        MutationOptions::new()
            .optimistic_update(move |_| {
                optimistic.fetch_add(1, Ordering::SeqCst);
            })
            .rollback(move || {
                rollback.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn optimistic(&self) -> usize {
        self.optimistic.load(Ordering::SeqCst)
    }

    fn rollbacks(&self) -> usize {
        self.rollback.load(Ordering::SeqCst)
    }
}

fn signed_in(transport: &MockTransport, refresher: FakeRefresher) -> SyncClient {
    SyncClient::builder(transport.clone())
        .token_store(MemoryTokenStore::with_token(Token::new("old")))
        .refresher(refresher)
        .build()
        .unwrap()
}

fn bearer(transport: &MockTransport, index: usize) -> String {
    transport.requests()[index]
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

#[tokio::test]
async fn unauthorized_response_refreshes_and_retries_once() {
    let transport = MockTransport::sequence(vec![
        MockReply::empty(StatusCode::UNAUTHORIZED),
        MockReply::json(StatusCode::OK, json!({"id": 1})),
    ]);
    let refresher = FakeRefresher::issuing("new");
    let client = signed_in(&transport, refresher.clone());
    let mutation = client.mutation(Method::POST, "/users", MutationOptions::new());

    let result = mutation.mutate(&json!({"name": "Ada"})).await;

    assert_eq!(result.unwrap(), Some(json!({"id": 1})));
    assert_eq!(transport.calls(), 2);
    assert_eq!(refresher.calls(), 1);
    assert_eq!(bearer(&transport, 0), "Bearer old");
    assert_eq!(bearer(&transport, 1), "Bearer new-1");
    assert!(mutation.state().error.is_none());
    assert_eq!(client.broker().current_token(), Some(Token::new("new-1")));
}

#[tokio::test]
async fn repeated_unauthorized_is_not_retried_again() {
    let transport = MockTransport::replying(MockReply::json(StatusCode::UNAUTHORIZED, json!({"message": "session expired"})));
    let refresher = FakeRefresher::issuing("new");
    let client = signed_in(&transport, refresher.clone());
    let mutation = client.mutation(Method::PUT, "/users/1", MutationOptions::new());

    let error = mutation.mutate(&json!({"name": "Ada"})).await.unwrap_err();

    assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(error.to_string(), "session expired");
    assert_eq!(transport.calls(), 2);
    assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn failed_credential_refresh_surfaces_unauthorized() {
    let transport = MockTransport::replying(MockReply::empty(StatusCode::UNAUTHORIZED));
    let client = signed_in(&transport, FakeRefresher::failing());
    let mutation = client.mutation(Method::DELETE, "/users/1", MutationOptions::new());

    let error = mutation.mutate(&json!(null)).await.unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert_eq!(error.to_string(), "DELETE request failed (401)");
    assert!(matches!(mutation.state().error, Some(MutationError::Status { .. })));
}

#[tokio::test]
async fn failure_rolls_back_optimistic_update_once() {
    let transport = MockTransport::replying(MockReply::text(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let calls = Calls::default();
    let mutation = client.mutation(Method::POST, "/tickets", calls.options());

    let error = mutation.mutate(&json!({"title": "broken"})).await.unwrap_err();

    assert_eq!(error.to_string(), "boom");
    assert_eq!(calls.optimistic(), 1);
    assert_eq!(calls.rollbacks(), 1);
    assert!(!mutation.state().loading);
}

#[tokio::test]
async fn transport_failure_rolls_back() {
    let transport = MockTransport::replying(MockReply::error("connection refused"));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let calls = Calls::default();
    let mutation = client.mutation(Method::POST, "/tickets", calls.options());

    let error = mutation.mutate(&json!({})).await.unwrap_err();

    assert!(matches!(error, MutationError::Transport(_)));
    assert_eq!(calls.rollbacks(), 1);
}

#[tokio::test]
async fn success_does_not_roll_back() {
    let transport = MockTransport::replying(MockReply::json(StatusCode::CREATED, json!({"id": 5})));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let calls = Calls::default();
    let mutation = client.mutation(Method::POST, "/tickets", calls.options());

    mutation.mutate(&json!({})).await.unwrap();

    assert_eq!(calls.optimistic(), 1);
    assert_eq!(calls.rollbacks(), 0);
    assert_eq!(mutation.state().data, Some(json!({"id": 5})));
}

#[tokio::test(start_paused = true)]
async fn external_cancel_is_silent_and_skips_rollback() {
    let transport = MockTransport::replying(MockReply::json(StatusCode::OK, json!({})).after(Duration::from_secs(1)));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let calls = Calls::default();
    let mutation = Arc::new(client.mutation(Method::PATCH, "/tickets/1", calls.options()));

    let pending = tokio::spawn({
        let mutation = Arc::clone(&mutation);
        async move { mutation.mutate(&json!({"status": "closed"})).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.state().loading);

    mutation.cancel();

    assert_eq!(pending.await.unwrap().unwrap(), None);
    assert_eq!(calls.optimistic(), 1);
    assert_eq!(calls.rollbacks(), 0);
    let state = mutation.state();
    assert!(!state.loading);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn new_mutation_supersedes_previous_one() {
    let transport = MockTransport::new(|index, _| match index {
        0 => MockReply::text(StatusCode::INTERNAL_SERVER_ERROR, "late failure").after(Duration::from_millis(300)),
        _ => MockReply::json(StatusCode::OK, json!({"saved": 2})).after(Duration::from_millis(50)),
    });
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let calls = Calls::default();
    let mutation = client.mutation(Method::PUT, "/draft", calls.options());

    let (v1, v2) = (json!({"v": 1}), json!({"v": 2}));
    let (first, second) = tokio::join!(mutation.mutate(&v1), mutation.mutate(&v2));

    assert_eq!(first.unwrap(), None);
    assert_eq!(second.unwrap(), Some(json!({"saved": 2})));
    assert_eq!(calls.rollbacks(), 0);
    assert_eq!(mutation.state().data, Some(json!({"saved": 2})));
}

#[tokio::test]
async fn success_invalidates_configured_keys_only() {
    let transport = MockTransport::replying(MockReply::empty(StatusCode::NO_CONTENT));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    client.store().set("/users", json!([1, 2]));
    client.store().set("/users/1", json!({"id": 1}));
    client.store().set("/roles", json!([]));
    let mutation = client.mutation(Method::DELETE, "/users/2", MutationOptions::<Value>::new().invalidate_keys(["/users", "/roles"]));

    assert_eq!(mutation.mutate(&json!(null)).await.unwrap(), None);

    assert!(!client.store().has("/users"));
    assert!(!client.store().has("/roles"));
    assert!(client.store().has("/users/1"));
}

#[tokio::test]
async fn failure_leaves_cache_untouched() {
    let transport = MockTransport::replying(MockReply::empty(StatusCode::BAD_REQUEST));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    client.store().set("/users", json!([1, 2]));
    let mutation = client.mutation(Method::POST, "/users", MutationOptions::<Value>::new().invalidate_keys(["/users"]));

    mutation.mutate(&json!({})).await.unwrap_err();

    assert!(client.store().has("/users"));
}

#[tokio::test]
async fn plain_text_success_is_message_shaped() {
    let transport = MockTransport::replying(MockReply::text(StatusCode::OK, "created"));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let mutation = client.mutation(Method::POST, "/notes", MutationOptions::new());

    assert_eq!(mutation.mutate(&json!({})).await.unwrap(), Some(json!({"message": "created"})));
}

#[tokio::test]
async fn undecodable_json_success_is_none() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let response = TransportResponse::new(StatusCode::OK, headers, Bytes::from_static(b"<html>oops</html>"));
    let transport = MockTransport::replying(MockReply::response(response));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let mutation = client.mutation(Method::POST, "/notes", MutationOptions::new());

    assert_eq!(mutation.mutate(&json!({})).await.unwrap(), None);
    assert_eq!(mutation.state().data, None);
    assert!(mutation.state().error.is_none());
}

#[derive(Serialize)]
struct Rename {
    name: &'static str,
}

#[tokio::test]
async fn request_carries_json_body_and_headers() {
    let transport = MockTransport::replying(MockReply::empty(StatusCode::OK));
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let mut headers = HeaderMap::new();
    headers.insert("x-request-source", HeaderValue::from_static("admin"));
    let mutation = client.mutation(Method::PATCH, "/departments/4", MutationOptions::new().headers(headers));

    mutation.mutate(&Rename { name: "Research" }).await.unwrap();

    let request = &transport.requests()[0];
    assert_eq!(*request.method(), Method::PATCH);
    assert_eq!(request.url(), "/departments/4");
    assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(request.headers().get("x-request-source").unwrap(), "admin");
    assert_eq!(request.body().unwrap().as_ref(), br#"{"name":"Research"}"#);
}

#[tokio::test]
async fn clear_on_start_drops_previous_error() {
    let transport = MockTransport::sequence(vec![MockReply::empty(StatusCode::CONFLICT), MockReply::empty(StatusCode::OK)]);
    let client = signed_in(&transport, FakeRefresher::issuing("new"));
    let mutation = client.mutation(Method::POST, "/items", MutationOptions::new().clear_on_start(true));

    mutation.mutate(&json!({})).await.unwrap_err();
    assert!(mutation.state().error.is_some());

    mutation.mutate(&json!({})).await.unwrap();
    assert!(mutation.state().error.is_none());
}
