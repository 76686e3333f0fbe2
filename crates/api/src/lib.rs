//! Real-time event delivery gateway.
//!
//! - [`registry`] -- topic subscriptions of every connection and poll waiter.
//! - [`ws`] -- the WebSocket gateway.
//! - [`handlers::poll`] -- the long-poll endpoint.
//! - [`dispatch`] -- feeds bus events into the registry.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
