// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end tests wiring every collaborator together.

use std::time::Duration;

use futures::future::join_all;
use http::StatusCode;
use serde_json::json;
use syncwell::testing::{MockReply, MockTransport};
use syncwell::{FileKv, ReadOptions, SyncClient, SyncConfig};
use syncwell_auth::testing::FakeRefresher;

#[tokio::test(start_paused = true)]
async fn concurrent_sessions_share_one_token_refresh() {
    let transport = MockTransport::replying(MockReply::json(StatusCode::OK, json!([])));
    let refresher = FakeRefresher::issuing("t").with_delay(Duration::from_millis(100));
    let client = SyncClient::builder(transport.clone())
        .refresher(refresher.clone())
        .build()
        .unwrap();

    let sessions: Vec<_> = (0..5)
        .map(|index| client.read::<Vec<u32>>(format!("/resource/{index}"), ReadOptions::new().immediate(false)))
        .collect();
    join_all(sessions.iter().map(|session| session.fetch_data(true))).await;

    assert_eq!(refresher.calls(), 1);
    assert_eq!(transport.calls(), 5);
    for request in transport.requests() {
        assert_eq!(request.headers().get(http::header::AUTHORIZATION).unwrap(), "Bearer t-1");
    }
}

#[tokio::test(start_paused = true)]
async fn persisted_cache_survives_client_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let config = SyncConfig::from_toml_str(
        r#"
        store_capacity = 10
        store_prefix = "admin_"
        default_cache_max_age_ms = 60000
        "#,
    )
    .unwrap();

    let first = MockTransport::replying(MockReply::json(StatusCode::OK, json!(["ada", "grace"])));
    {
        let client = SyncClient::builder(first.clone())
            .config(config.clone())
            .persistent(FileKv::open(&path).unwrap())
            .build()
            .unwrap();
        let session = client.read::<Vec<String>>("/users", ReadOptions::new().immediate(false));
        session.fetch_data(false).await;
        assert_eq!(first.calls(), 1);
    }

    let second = MockTransport::replying(MockReply::error("offline"));
    let client = SyncClient::builder(second.clone())
        .config(config)
        .persistent(FileKv::open(&path).unwrap())
        .build()
        .unwrap();
    let session = client.read::<Vec<String>>("/users", ReadOptions::new());

    assert_eq!(session.state().data, Some(vec!["ada".to_owned(), "grace".to_owned()]));
    assert_eq!(second.calls(), 0);
    assert!(std::fs::read_to_string(&path).unwrap().contains("admin_/users"));
}

#[tokio::test(start_paused = true)]
async fn request_timeout_from_config_applies_to_sessions() {
    let transport = MockTransport::replying(MockReply::json(StatusCode::OK, json!([])).after(Duration::from_secs(30)));
    let config = SyncConfig {
        request_timeout_ms: 2_000,
        ..SyncConfig::default()
    };
    let client = SyncClient::builder(transport).config(config).build().unwrap();
    let session = client.read::<Vec<u32>>("/slow", ReadOptions::new().immediate(false));

    session.fetch_data(true).await;

    assert!(session.state().error.unwrap().to_string().contains("timed out"));
}
