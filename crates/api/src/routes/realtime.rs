//! Route definitions for the real-time delivery transports.

use axum::routing::get;
use axum::Router;

use crate::handlers::poll;
use crate::state::AppState;
use crate::ws;

/// Delivery routes.
///
/// ```text
/// GET /ws      -> ws_handler   (WebSocket upgrade, ?token=&company_id=)
/// GET /poll    -> poll         (long-poll, Authorization: Bearer)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/poll", get(poll::poll))
}
