use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use eventgate_core::error::CoreError;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::jwt::authenticate;
use crate::registry::{CloseReason, ConnectionHandle};
use crate::state::AppState;
use crate::ws::connection::{ConnectionContext, ConnectionState};
use crate::ws::protocol::{Outbound, ServerMessage};

/// How long cleanup waits for the write task to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
    pub company_id: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// Authentication happens after the upgrade so a rejection can be reported
/// with an `error` frame and a close code instead of a bare HTTP status.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Manage a single WebSocket connection after upgrade.
///
///   1. Authenticates from the query parameters, or rejects and closes.
///   2. Registers the connection and queues `connection.established`.
///   3. Spawns a write task draining the bounded outbound queue.
///   4. Processes inbound frames on the current task until close or idle timeout.
///   5. Removes the connection from the registry and waits for the write task.
async fn handle_socket(mut socket: WebSocket, params: WsParams, state: AppState) {
    let mut lifecycle = ConnectionState::Connecting;
    advance(&mut lifecycle, ConnectionState::Authenticating);

    let identity = match authenticate(
        params.token.as_deref(),
        params.company_id.as_deref(),
        &state.config.jwt,
    ) {
        Ok(identity) => identity,
        Err(err) => {
            advance(&mut lifecycle, ConnectionState::Rejected);
            state.metrics.record_auth_rejection();
            let reason = CloseReason::for_auth_error(&err);
            tracing::info!(error = %err, code = reason.code(), "WebSocket authentication rejected");

            if let Ok(frame) = ServerMessage::error(&err).to_message() {
                let _ = socket.send(frame).await;
            }
            let _ = socket.send(Message::Close(Some(reason.frame()))).await;
            return;
        }
    };
    advance(&mut lifecycle, ConnectionState::Active);

    let gateway = &state.config.gateway;
    let (handle, rx) = state.registry.register_connection(
        identity.user_id.clone(),
        identity.company_id.clone(),
        gateway.outbound_queue_size,
    );
    let mut conn = ConnectionContext::new(Arc::clone(&handle), identity, lifecycle);
    tracing::info!(
        conn_id = %conn.id(),
        user_id = %conn.identity().user_id,
        company_id = %conn.identity().company_id,
        "WebSocket connected"
    );

    state.registry.reply(&handle, conn.established_frame());

    let (sink, mut stream) = socket.split();
    let send_task = tokio::spawn(write_loop(sink, rx, Arc::clone(&handle)));

    // Receiver loop: process inbound frames until closed or idle.
    let idle_timeout = gateway.idle_timeout();
    loop {
        let next = tokio::select! {
            () = handle.closed() => break,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::info!(conn_id = %conn.id(), "WebSocket idle timeout");
                handle.close(CloseReason::IdleTimeout);
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Some(reply) =
                    conn.handle_text(text.as_str(), &gateway.topics, &state.registry)
                {
                    state.registry.reply(&handle, reply);
                }
            }
            Ok(Some(Ok(Message::Binary(_)))) => {
                let err = CoreError::Validation("Binary frames are not supported".into());
                state.registry.reply(&handle, ServerMessage::error(&err));
            }
            Ok(Some(Ok(_))) => {
                tracing::trace!(conn_id = %conn.id(), "Control frame received");
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: deregister, signal the writer, wait for the close frame to go out.
    conn.transition(ConnectionState::Closing);
    state.registry.remove_connection(conn.id());
    handle.close(CloseReason::Normal);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, send_task).await.is_err() {
        tracing::debug!(conn_id = %conn.id(), "WebSocket writer did not finish in time");
    }
    conn.transition(ConnectionState::Closed);

    let reason = handle.close_reason().unwrap_or(CloseReason::Normal);
    tracing::info!(
        conn_id = %conn.id(),
        reason = reason.reason(),
        last_cursor = conn.last_cursor().unwrap_or(""),
        "WebSocket disconnected"
    );
}

/// Forward queued items to the socket until the connection is closed, then
/// send the close frame for the recorded reason.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    handle: Arc<ConnectionHandle>,
) {
    loop {
        tokio::select! {
            biased;
            () = handle.closed() => break,
            next = rx.recv() => {
                let Some(item) = next else { break };
                let message = match item.into_message() {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(conn_id = %handle.id(), error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if sink.send(message).await.is_err() {
                    tracing::debug!(conn_id = %handle.id(), "WebSocket sink closed");
                    handle.close(CloseReason::Normal);
                    return;
                }
            }
        }
    }

    let reason = handle.close_reason().unwrap_or(CloseReason::Normal);
    if reason == CloseReason::SlowConsumer {
        let err = CoreError::SlowConsumer("Outbound queue overflowed".into());
        if let Ok(frame) = ServerMessage::error(&err).to_message() {
            let _ = sink.send(frame).await;
        }
    }
    let _ = sink.send(Message::Close(Some(reason.frame()))).await;
    let _ = sink.close().await;
}

fn advance(lifecycle: &mut ConnectionState, next: ConnectionState) {
    if let Err(e) = lifecycle.transition(next) {
        tracing::warn!(error = %e, "Refused state change");
    }
}
