use std::sync::Arc;

use eventgate_events::{EventBus, GatewayMetrics};

use crate::config::ServerConfig;
use crate::registry::SubscriptionRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, loaded once at startup.
    pub config: Arc<ServerConfig>,
    /// Process-wide event bus.
    pub event_bus: Arc<EventBus>,
    /// Subscriptions of every WebSocket connection and poll waiter.
    pub registry: Arc<SubscriptionRegistry>,
    /// Prometheus metrics shared with the bus and the registry.
    pub metrics: Arc<GatewayMetrics>,
}
