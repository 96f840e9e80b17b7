// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drives a read session and a mutation against a scripted backend.
//!
//! Run with `cargo run -p syncwell --example dashboard --features test-util`.

use std::time::Duration;

use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use syncwell::testing::{MockReply, MockTransport};
use syncwell::{MemoryKv, MutationOptions, ReadOptions, SyncClient, SyncConfig};
use syncwell_auth::testing::FakeRefresher;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
struct Ticket {
    id: u32,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let transport = MockTransport::new(|index, request| match (request.method().clone(), index) {
        (Method::GET, _) => MockReply::json(StatusCode::OK, json!([{"id": 1, "title": "Printer on fire"}])),
        (_, 1) => MockReply::empty(StatusCode::UNAUTHORIZED),
        _ => MockReply::json(StatusCode::CREATED, json!({"id": 2})),
    });

    let config = SyncConfig::from_toml_str("revalidate_guard_ms = 1000")?;
    let client = SyncClient::builder(transport)
        .config(config)
        .persistent(MemoryKv::new())
        .refresher(FakeRefresher::issuing("session"))
        .build()?;

    let tickets = client.read::<Vec<Ticket>>(
        "/tickets",
        ReadOptions::new()
            .revalidate_interval(Duration::from_secs(30))
            .on_success(|tickets: &Vec<Ticket>| println!("loaded {} ticket(s)", tickets.len())),
    );
    let mut changes = tickets.subscribe();
    changes.wait_for(|state| !state.loading).await?;
    for ticket in tickets.state().data.unwrap_or_default() {
        println!("#{} {}", ticket.id, ticket.title);
    }

    let create = client.mutation(
        Method::POST,
        "/tickets",
        MutationOptions::new()
            .optimistic_update(|body: &serde_json::Value| println!("optimistically showing {body}"))
            .rollback(|| println!("rolled back"))
            .invalidate_keys(["/tickets"]),
    );
    let created = create.mutate(&json!({"title": "Coffee machine"})).await?;
    println!("created: {created:?}, cache still holds tickets: {}", client.store().has("/tickets"));

    client.lifecycle().set_visible(false);
    client.lifecycle().set_visible(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tickets.close();
    Ok(())
}
