use axum::extract::State;
use axum::{routing::get, Json, Router};
use eventgate_events::{BusHealth, BusStatus};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` when every component is healthy, otherwise `degraded`.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub components: Components,
}

#[derive(Serialize)]
pub struct Components {
    pub event_bus: BusHealth,
    pub registry: RegistryHealth,
}

#[derive(Serialize)]
pub struct RegistryHealth {
    pub status: &'static str,
    pub connections: usize,
    pub waiters: usize,
    pub entries: usize,
}

/// GET /health -- returns gateway, event bus and registry health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let event_bus = state.event_bus.health();
    let status = if event_bus.status == BusStatus::Ok {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        components: Components {
            event_bus,
            registry: RegistryHealth {
                status: "ok",
                connections: state.registry.connection_count(),
                waiters: state.registry.waiter_count(),
                entries: state.registry.entry_count(),
            },
        },
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
