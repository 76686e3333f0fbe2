use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{routing::get, Router};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /metrics -- Prometheus text exposition of the gateway metrics.
async fn render_metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::InternalError(format!("Failed to encode metrics: {e}")))?;
    Ok(([(CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Mount the metrics scrape endpoint.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(render_metrics))
}
