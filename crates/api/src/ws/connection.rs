//! Connection lifecycle and inbound message handling.

use std::fmt;
use std::sync::Arc;

use eventgate_core::error::CoreError;
use eventgate_core::topic::TopicAllowList;

use crate::auth::jwt::Identity;
use crate::registry::{ConnectionHandle, ConnectionId, SubscriptionRegistry};
use crate::ws::protocol::{parse_client_message, ClientMessage, ServerMessage, SubscriptionAction};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle of a WebSocket connection.
///
/// `Connecting -> Authenticating -> Active -> Closing -> Closed`, with
/// `Rejected` reachable only from `Authenticating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal connection transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Active)
                | (Authenticating, Rejected)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), IllegalTransition> {
        if !self.can_transition_to(next) {
            return Err(IllegalTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Rejected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Active connection
// ---------------------------------------------------------------------------

/// Read-side state of an authenticated connection.
pub struct ConnectionContext {
    handle: Arc<ConnectionHandle>,
    identity: Identity,
    state: ConnectionState,
    last_cursor: Option<String>,
}

impl ConnectionContext {
    /// Wrap a freshly registered connection; `state` must already be `Active`.
    pub fn new(handle: Arc<ConnectionHandle>, identity: Identity, state: ConnectionState) -> Self {
        Self {
            handle,
            identity,
            state,
            last_cursor: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_cursor(&self) -> Option<&str> {
        self.last_cursor.as_deref()
    }

    pub fn transition(&mut self, next: ConnectionState) {
        if let Err(e) = self.state.transition(next) {
            tracing::warn!(conn_id = %self.handle.id(), error = %e, "Refused state change");
        }
    }

    pub fn established_frame(&self) -> ServerMessage {
        ServerMessage::ConnectionEstablished {
            connection_id: self.handle.id(),
            user_id: self.identity.user_id.clone(),
            company_id: self.identity.company_id.clone(),
            server_time: chrono::Utc::now(),
        }
    }

    /// Apply one inbound text frame, returning the reply to queue, if any.
    pub fn handle_text(
        &mut self,
        text: &str,
        topics: &TopicAllowList,
        registry: &SubscriptionRegistry,
    ) -> Option<ServerMessage> {
        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                registry.metrics().record_validation_error();
                tracing::debug!(conn_id = %self.id(), error = %e, "Rejected client frame");
                return Some(ServerMessage::error(&e));
            }
        };

        match message {
            ClientMessage::Subscribe { topics: raw } => {
                self.change_subscriptions(SubscriptionAction::Subscribe, &raw, topics, registry)
            }
            ClientMessage::Unsubscribe { topics: raw } => {
                self.change_subscriptions(SubscriptionAction::Unsubscribe, &raw, topics, registry)
            }
            ClientMessage::CursorUpdate { cursor } => {
                tracing::debug!(conn_id = %self.id(), cursor = %cursor, "Cursor updated");
                self.last_cursor = Some(cursor);
                None
            }
            ClientMessage::Ping => Some(ServerMessage::pong()),
        }
    }

    /// Validate every pattern before touching the registry so a message is
    /// applied all-or-nothing.
    fn change_subscriptions(
        &mut self,
        action: SubscriptionAction,
        raw: &[String],
        allow_list: &TopicAllowList,
        registry: &SubscriptionRegistry,
    ) -> Option<ServerMessage> {
        let patterns = match allow_list.validate_all(raw) {
            Ok(patterns) => patterns,
            Err(e) => {
                registry.metrics().record_validation_error();
                return Some(ServerMessage::error(&e));
            }
        };

        let applied = match action {
            SubscriptionAction::Subscribe => registry.subscribe(self.id(), &patterns),
            SubscriptionAction::Unsubscribe => registry.unsubscribe(self.id(), &patterns),
        };
        if !applied {
            return Some(ServerMessage::error(&CoreError::Internal(
                "Connection is no longer registered".into(),
            )));
        }

        let names: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
        tracing::info!(
            conn_id = %self.id(),
            user_id = %self.identity.user_id,
            action = ?action,
            topics = ?names,
            "Subscriptions changed"
        );
        Some(ServerMessage::SubscriptionConfirmed {
            action,
            topics: patterns,
        })
    }
}
