#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use eventgate_api::auth::jwt::{generate_access_token, JwtConfig};
use eventgate_api::config::{GatewayConfig, ServerConfig};
use eventgate_api::dispatch;
use eventgate_api::registry::SubscriptionRegistry;
use eventgate_api::router::build_app_router;
use eventgate_api::state::AppState;
use eventgate_events::{EventBus, EventBusConfig, GatewayMetrics};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// the in-memory event bus and short long-poll limits.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "integration-test-secret-that-is-long-enough".to_string(),
        },
        gateway: GatewayConfig {
            poll_default_timeout_secs: 2,
            poll_max_timeout_secs: 10,
            ..GatewayConfig::default()
        },
        event_bus: EventBusConfig::default(),
    }
}

/// Wire a bus, registry and dispatch path the same way `main.rs` does.
pub async fn build_test_state(config: ServerConfig) -> AppState {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let event_bus = EventBus::init(&config.event_bus, Arc::clone(&metrics)).unwrap();
    let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&metrics)));
    dispatch::attach(&event_bus, Arc::clone(&registry))
        .await
        .unwrap();

    AppState {
        config: Arc::new(config),
        event_bus,
        registry,
        metrics,
    }
}

/// Build the full application router with all middleware layers.
///
/// Returns the state as well so tests can publish and inspect the registry.
pub async fn build_test_app() -> (Router, AppState) {
    build_test_app_with(test_config()).await
}

pub async fn build_test_app_with(config: ServerConfig) -> (Router, AppState) {
    let state = build_test_state(config.clone()).await;
    (build_app_router(state.clone(), &config), state)
}

/// Serve the app on an ephemeral port for WebSocket tests.
pub async fn spawn_server(config: ServerConfig) -> (SocketAddr, AppState) {
    let (app, state) = build_test_app_with(config).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Mint an access token accepted by [`test_config`].
pub fn token(user_id: &str, company_id: &str) -> String {
    generate_access_token(user_id, company_id, &test_config().jwt).unwrap()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Send a GET request and return the response.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a GET request with a Bearer token.
pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect the response body and parse as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// WebSocket helpers
// ---------------------------------------------------------------------------

/// Open a WebSocket with the given query string (without the leading `?`).
pub async fn connect(addr: SocketAddr, query: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?{query}");
    let (client, _response) = connect_async(url).await.unwrap();
    client
}

/// Connect and consume the `connection.established` frame.
pub async fn connect_authenticated(addr: SocketAddr, user_id: &str, company_id: &str) -> WsClient {
    let mut client = connect(addr, &format!("token={}", token(user_id, company_id))).await;
    let established = next_json(&mut client).await;
    assert_eq!(established["type"], "connection.established");
    client
}

pub async fn send_json(client: &mut WsClient, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping transport pings. Panics on timeout.
pub async fn next_json(client: &mut WsClient) -> Value {
    try_next_json(client, Duration::from_secs(2))
        .await
        .expect("expected a JSON frame")
}

/// Next text frame as JSON, or `None` if nothing arrives within `wait`.
pub async fn try_next_json(client: &mut WsClient, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, client.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read until the server's close frame and return its code and reason.
pub async fn expect_close(client: &mut WsClient) -> (u16, String) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout_at(deadline, client.next())
            .await
            .expect("timed out waiting for close frame")
            .expect("stream ended without close frame")
            .expect("websocket error before close frame");
        if let Message::Close(Some(close)) = frame {
            return (u16::from(close.code), close.reason.to_string());
        }
    }
}
