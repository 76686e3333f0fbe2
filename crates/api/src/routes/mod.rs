pub mod health;
pub mod metrics;
pub mod realtime;

use axum::Router;

use crate::state::AppState;

/// Build the gateway route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                                          component health
/// /metrics                                         Prometheus scrape
/// /ws                                              WebSocket
/// /poll                                            long-poll
/// ```
pub fn gateway_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(realtime::router())
}
