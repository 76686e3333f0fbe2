//! WebSocket gateway.
//!
//! Provides the wire protocol, the per-connection lifecycle, heartbeat
//! pings, and the HTTP upgrade handler used by Axum routes.

pub mod connection;
mod handler;
mod heartbeat;
pub mod protocol;

pub use handler::{ws_handler, WsParams};
pub use heartbeat::start_heartbeat;
