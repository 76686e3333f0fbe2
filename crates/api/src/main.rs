use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventgate_api::config::ServerConfig;
use eventgate_api::registry::{CloseReason, SubscriptionRegistry};
use eventgate_api::router::build_app_router;
use eventgate_api::state::AppState;
use eventgate_api::{dispatch, ws};
use eventgate_events::{EventBus, GatewayMetrics};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "eventgate_api=debug,eventgate_events=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Metrics ---
    let metrics = Arc::new(GatewayMetrics::new().expect("Failed to register gateway metrics"));

    // --- Event bus ---
    let event_bus = EventBus::init(&config.event_bus, Arc::clone(&metrics))
        .expect("Failed to initialise event bus");

    // --- Subscription registry ---
    let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&metrics)));
    dispatch::attach(&event_bus, Arc::clone(&registry))
        .await
        .expect("Failed to subscribe registry to event bus");

    // --- Heartbeat ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&registry),
        config.gateway.heartbeat_interval(),
        heartbeat_cancel.clone(),
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        event_bus: Arc::clone(&event_bus),
        registry: Arc::clone(&registry),
        metrics,
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, backend = %config.event_bus.backend, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Upgraded sockets and parked polls are released as soon as the signal
    // arrives so the server can finish draining HTTP requests.
    let shutdown_registry = Arc::clone(&registry);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_registry.close_all(CloseReason::Shutdown);
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    heartbeat_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    tracing::info!("Heartbeat task stopped");

    let remaining = registry.close_all(CloseReason::Shutdown);
    tracing::info!(remaining, "Closed remaining WebSocket connections");

    if tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        event_bus.shutdown(),
    )
    .await
    .is_err()
    {
        tracing::warn!("Event bus did not shut down in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
