//! Long-poll delivery for clients that cannot hold a WebSocket open.
//!
//! Each request registers an ephemeral waiter with the subscription registry
//! and parks until the first matching event arrives or the timeout elapses.
//! Nothing is buffered between requests: events published while no request is
//! parked are not delivered to poll clients.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use eventgate_core::error::CoreError;
use eventgate_core::types::{CompanyId, Timestamp};
use eventgate_events::Event;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Query parameters for `GET /poll`.
#[derive(Debug, Deserialize)]
pub struct PollParams {
    /// Comma-separated topic patterns.
    pub topics: Option<String>,
    /// Opaque cursor echoed back when no events arrive.
    pub cursor: Option<String>,
    /// Seconds to wait; defaults to `POLL_DEFAULT_TIMEOUT_SECS`.
    pub timeout: Option<u64>,
    pub company_id: Option<CompanyId>,
}

/// Response body for `GET /poll`.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub events: Vec<Arc<Event>>,
    /// `event_id` of the last returned event, else the request cursor.
    pub cursor: Option<String>,
    pub timestamp: Timestamp,
    /// Events were dropped because the per-request buffer was full.
    pub has_more: bool,
}

/// GET /poll
///
/// Wait for events matching `topics`. Returns `200` with an empty `events`
/// array when the timeout elapses.
pub async fn poll(
    user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> AppResult<Json<PollResponse>> {
    user.ensure_company(params.company_id.as_deref())?;

    let gateway = &state.config.gateway;
    let timeout_secs = resolve_timeout(
        params.timeout,
        gateway.poll_default_timeout_secs,
        gateway.poll_max_timeout_secs,
    )?;

    let patterns = params
        .topics
        .as_deref()
        .ok_or_else(|| CoreError::Validation("topics is required".into()))
        .and_then(|csv| gateway.topics.validate_csv(csv))
        .map_err(|e| {
            state.metrics.record_validation_error();
            e
        })?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let waiter = state.registry.register_waiter(
        patterns,
        user.company_id.clone(),
        gateway.poll_max_events,
    );
    let batch = waiter.wait_until(deadline).await;
    drop(waiter);

    tracing::debug!(
        user_id = %user.user_id,
        company_id = %user.company_id,
        events = batch.events.len(),
        has_more = batch.has_more,
        "Long-poll completed"
    );

    let cursor = batch
        .events
        .last()
        .map(|event| event.event_id().to_string())
        .or(params.cursor);

    Ok(Json(PollResponse {
        events: batch.events,
        cursor,
        timestamp: chrono::Utc::now(),
        has_more: batch.has_more,
    }))
}

/// Resolve the requested wait, rejecting values above the configured maximum.
fn resolve_timeout(requested: Option<u64>, default: u64, max: u64) -> Result<u64, AppError> {
    match requested {
        None => Ok(default),
        Some(secs) if secs > max => Err(AppError::Core(CoreError::Validation(format!(
            "timeout must be at most {max} seconds"
        )))),
        Some(secs) => Ok(secs),
    }
}
