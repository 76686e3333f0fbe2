//! Integration tests for the WebSocket gateway against a live server.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{
    connect, connect_authenticated, eventually, expect_close, get_auth, next_json, send_json,
    token, try_next_json,
};
use eventgate_api::registry::CloseReason;
use eventgate_events::PublishOptions;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

// ---------------------------------------------------------------------------
// Test: an authenticated client receives connection.established
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_established_frame() {
    let (addr, state) = common::spawn_server(common::test_config()).await;

    let mut client = connect(addr, &format!("token={}&company_id=acme", token("u1", "acme"))).await;
    let frame = next_json(&mut client).await;

    assert_eq!(frame["type"], "connection.established");
    assert_eq!(frame["user_id"], "u1");
    assert_eq!(frame["company_id"], "acme");
    assert!(frame["connection_id"].is_string());
    assert!(frame["server_time"].is_string());
    assert_eq!(state.registry.connection_count(), 1);
}

// ---------------------------------------------------------------------------
// Test: missing token is rejected with an error frame and close code 4001
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_token_closes_with_4001() {
    let (addr, state) = common::spawn_server(common::test_config()).await;

    let mut client = connect(addr, "").await;
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["category"], "authentication_error");

    let (code, _reason) = expect_close(&mut client).await;
    assert_eq!(code, 4001);
    assert_eq!(state.registry.connection_count(), 0);
}

#[tokio::test]
async fn invalid_token_closes_with_4001() {
    let (addr, _state) = common::spawn_server(common::test_config()).await;

    let mut client = connect(addr, "token=garbage").await;
    let (code, _reason) = expect_close(&mut client).await;
    assert_eq!(code, 4001);
}

// ---------------------------------------------------------------------------
// Test: a token for another tenant closes with 4003
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_company_closes_with_4003() {
    let (addr, _state) = common::spawn_server(common::test_config()).await;

    let mut client =
        connect(addr, &format!("token={}&company_id=globex", token("u1", "acme"))).await;
    let (code, _reason) = expect_close(&mut client).await;
    assert_eq!(code, 4003);
}

// ---------------------------------------------------------------------------
// Test: subscribe is confirmed; an invalid pattern changes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_is_all_or_nothing() {
    let (addr, state) = common::spawn_server(common::test_config()).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    send_json(&mut client, json!({"type": "subscribe", "topics": ["deal.*", "billing.*"]})).await;
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["category"], "validation_error");
    assert_eq!(state.registry.entry_count(), 0);

    send_json(&mut client, json!({"type": "subscribe", "topics": ["deal.*", "lead.created"]})).await;
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "subscription.confirmed");
    assert_eq!(frame["action"], "subscribe");
    assert_eq!(frame["topics"], json!(["deal.*", "lead.created"]));
    assert_eq!(state.registry.entry_count(), 2);

    send_json(&mut client, json!({"type": "unsubscribe", "topics": ["lead.created"]})).await;
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "subscription.confirmed");
    assert_eq!(frame["action"], "unsubscribe");
    assert_eq!(state.registry.entry_count(), 1);
}

// ---------------------------------------------------------------------------
// Test: deal.stage.updated reaches a WebSocket subscriber and a parked poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deal_stage_update_reaches_websocket_and_poll() {
    let (addr, state) = common::spawn_server(common::test_config()).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    send_json(&mut client, json!({"type": "subscribe", "topics": ["deal.stage.*"]})).await;
    assert_eq!(next_json(&mut client).await["type"], "subscription.confirmed");

    let app = eventgate_api::router::build_app_router(state.clone(), &state.config);
    let poll_token = token("u2", "acme");
    let poll = tokio::spawn(async move {
        get_auth(app, "/poll?topics=deal.stage.*&timeout=5", &poll_token).await
    });
    let registry = state.registry.clone();
    assert!(eventually(|| registry.waiter_count() == 1).await);

    assert!(
        state
            .event_bus
            .publish_event(
                "deal.stage.updated",
                json!({"deal_id": 42}),
                PublishOptions::default().region("us-east-1"),
            )
            .await
    );

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["event_type"], "deal.stage.updated");
    assert_eq!(frame["data"]["deal_id"], 42);
    assert_eq!(frame["metadata"]["region"], "us-east-1");
    assert!(frame["event_id"].is_string());
    assert!(frame["metadata"]["idempotency_key"].is_string());
    assert!(
        try_next_json(&mut client, Duration::from_millis(200)).await.is_none(),
        "exactly one event frame"
    );

    let response = poll.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = common::body_json(response).await;
    assert_eq!(json["events"][0]["event_id"], frame["event_id"]);
}

// ---------------------------------------------------------------------------
// Test: two publishes with one idempotency key are both delivered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_idempotency_key_is_delivered_twice() {
    let (addr, state) = common::spawn_server(common::test_config()).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    send_json(&mut client, json!({"type": "subscribe", "topics": ["contact.*"]})).await;
    next_json(&mut client).await;

    for _ in 0..2 {
        assert!(
            state
                .event_bus
                .publish_event(
                    "contact.updated",
                    json!({"contact_id": 3}),
                    PublishOptions::default().idempotency_key("contact-3-v2"),
                )
                .await
        );
    }

    let first = next_json(&mut client).await;
    let second = next_json(&mut client).await;
    assert_eq!(first["metadata"]["idempotency_key"], "contact-3-v2");
    assert_eq!(second["metadata"]["idempotency_key"], "contact-3-v2");
}

// ---------------------------------------------------------------------------
// Test: ping, cursor.update and malformed frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_and_malformed_frames_keep_connection_open() {
    let (addr, _state) = common::spawn_server(common::test_config()).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    client
        .send(tokio_tungstenite::tungstenite::Message::Text("{not json".into()))
        .await
        .unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["category"], "validation_error");

    send_json(&mut client, json!({"type": "teleport"})).await;
    assert_eq!(next_json(&mut client).await["type"], "error");

    send_json(&mut client, json!({"type": "cursor.update", "cursor": "abc"})).await;
    send_json(&mut client, json!({"type": "ping"})).await;
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "pong");
    assert!(frame["timestamp"].is_string());
}

// ---------------------------------------------------------------------------
// Test: an idle connection is closed with 1000
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_connection_is_closed() {
    let mut config = common::test_config();
    config.gateway.idle_timeout_secs = 1;
    let (addr, state) = common::spawn_server(config).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    let (code, reason) = expect_close(&mut client).await;
    assert_eq!(code, 1000);
    assert_eq!(reason, "idle timeout");

    let registry = state.registry.clone();
    assert!(eventually(|| registry.connection_count() == 0).await);
}

// ---------------------------------------------------------------------------
// Test: registry entries return to zero after every client disconnects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnects_clear_registry_entries() {
    let (addr, state) = common::spawn_server(common::test_config()).await;

    let mut clients = Vec::new();
    for i in 0..5 {
        let mut client = connect_authenticated(addr, &format!("u{i}"), "acme").await;
        send_json(&mut client, json!({"type": "subscribe", "topics": ["deal.*", "note.*"]})).await;
        next_json(&mut client).await;
        clients.push(client);
    }
    assert_eq!(state.registry.entry_count(), 10);

    for mut client in clients {
        client.close(None).await.unwrap();
    }

    let registry = state.registry.clone();
    assert!(eventually(|| registry.connection_count() == 0).await);
    assert_eq!(state.registry.entry_count(), 0);
    assert_eq!(state.metrics.connections_active(), 0);
}

// ---------------------------------------------------------------------------
// Test: a client that stops reading gets slow_consumer and close code 4008
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stalled_client_receives_slow_consumer_close() {
    let mut config = common::test_config();
    config.gateway.outbound_queue_size = 4;
    let (addr, state) = common::spawn_server(config).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    send_json(&mut client, json!({"type": "subscribe", "topics": ["deal.*"]})).await;
    assert_eq!(next_json(&mut client).await["type"], "subscription.confirmed");

    // Stop reading and publish until socket buffers and the queue overflow.
    let blob = "x".repeat(256 * 1024);
    let mut published = 0;
    while state.registry.connection_count() > 0 && published < 400 {
        state
            .event_bus
            .publish_event("deal.updated", json!({"blob": blob}), PublishOptions::default())
            .await;
        published += 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(state.registry.connection_count(), 0, "evicted after {published} publishes");
    assert_eq!(state.registry.entry_count(), 0);
    assert_eq!(state.metrics.slow_consumer_disconnects(), 1);

    // Frames already on the wire arrive first, then the error and the close.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let error = loop {
        let frame = tokio::time::timeout_at(deadline, client.next())
            .await
            .expect("timed out waiting for the slow_consumer frame")
            .expect("stream ended early")
            .expect("websocket error");
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "error" {
                    break value;
                }
                assert_eq!(value["type"], "event");
            }
            Message::Close(frame) => panic!("closed before the error frame: {frame:?}"),
            _ => {}
        }
    };
    assert_eq!(error["category"], "slow_consumer");

    let (code, _reason) = expect_close(&mut client).await;
    assert_eq!(code, 4008);
}

// ---------------------------------------------------------------------------
// Test: server shutdown closes connections with 1001
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_with_1001() {
    let (addr, state) = common::spawn_server(common::test_config()).await;
    let mut client = connect_authenticated(addr, "u1", "acme").await;

    assert_eq!(state.registry.close_all(CloseReason::Shutdown), 1);

    let (code, _reason) = expect_close(&mut client).await;
    assert_eq!(code, 1001);
}
