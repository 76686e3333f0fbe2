//! JSON frames exchanged with WebSocket clients.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! decode into [`ClientMessage`]; outbound traffic is queued per connection as
//! [`Outbound`] and encoded by the connection's write task.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::Message;
use eventgate_core::error::CoreError;
use eventgate_core::topic::TopicPattern;
use eventgate_core::types::{CompanyId, Timestamp, UserId};
use eventgate_events::Event;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },
    /// Advisory resume position; recorded but never used to gate delivery.
    #[serde(rename = "cursor.update")]
    CursorUpdate { cursor: String },
    #[serde(rename = "ping")]
    Ping,
}

/// Decode an inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, CoreError> {
    serde_json::from_str(text)
        .map_err(|e| CoreError::Validation(format!("Malformed message: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Control frames sent by the server. Events use [`EventFrame`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        connection_id: Uuid,
        user_id: UserId,
        company_id: CompanyId,
        server_time: Timestamp,
    },
    #[serde(rename = "subscription.confirmed")]
    SubscriptionConfirmed {
        action: SubscriptionAction,
        topics: Vec<TopicPattern>,
    },
    #[serde(rename = "error")]
    Error {
        category: &'static str,
        message: String,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: Timestamp },
}

impl ServerMessage {
    pub fn error(err: &CoreError) -> Self {
        ServerMessage::Error {
            category: err.category(),
            message: err.message().to_string(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// An event as delivered on the wire: the envelope fields plus `"type": "event"`.
#[derive(Debug, Serialize)]
pub struct EventFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    event: &'a Event,
}

impl<'a> EventFrame<'a> {
    pub fn new(event: &'a Event) -> Self {
        Self {
            kind: "event",
            event,
        }
    }
}

/// An item on a connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<Event>),
    Frame(ServerMessage),
    /// Transport-level heartbeat ping.
    Ping,
}

impl Outbound {
    /// Encode into a WebSocket message.
    pub fn into_message(self) -> Result<Message, serde_json::Error> {
        match self {
            Outbound::Event(event) => {
                let text = serde_json::to_string(&EventFrame::new(&event))?;
                Ok(Message::Text(text.into()))
            }
            Outbound::Frame(frame) => frame.to_message(),
            Outbound::Ping => Ok(Message::Ping(Bytes::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use eventgate_events::{DeliveryTracker, EventDraft, PublishOptions, TrackerDefaults};
    use serde_json::{json, Value};

    use super::*;

    fn text_of(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_client_frame() {
        assert_eq!(
            parse_client_message(r#"{"type":"subscribe","topics":["deal.*"]}"#).unwrap(),
            ClientMessage::Subscribe {
                topics: vec!["deal.*".into()]
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"unsubscribe","topics":["deal.*","lead.created"]}"#)
                .unwrap(),
            ClientMessage::Unsubscribe {
                topics: vec!["deal.*".into(), "lead.created".into()]
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"cursor.update","cursor":"abc"}"#).unwrap(),
            ClientMessage::CursorUpdate {
                cursor: "abc".into()
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn malformed_and_unknown_frames_are_validation_errors() {
        assert_matches!(parse_client_message("not json"), Err(CoreError::Validation(_)));
        assert_matches!(
            parse_client_message(r#"{"type":"teleport"}"#),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            parse_client_message(r#"{"type":"subscribe"}"#),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn event_frame_flattens_the_envelope() {
        let tracker = DeliveryTracker::new(TrackerDefaults::default());
        let event = tracker
            .stamp(
                EventDraft::new("deal.stage.updated")
                    .with_data(json!({"deal_id": 42}))
                    .with_options(PublishOptions::default().region("eu-west-1")),
            )
            .unwrap();

        let json = text_of(Outbound::Event(Arc::new(event.clone())).into_message().unwrap());
        assert_eq!(json["type"], "event");
        assert_eq!(json["event_id"], event.event_id().to_string());
        assert_eq!(json["event_type"], "deal.stage.updated");
        assert_eq!(json["data"]["deal_id"], 42);
        assert_eq!(json["metadata"]["region"], "eu-west-1");
        assert_eq!(
            json["metadata"]["idempotency_key"],
            event.idempotency_key()
        );
    }

    #[test]
    fn control_frames_carry_type_tags() {
        let error = text_of(
            ServerMessage::error(&CoreError::Validation("bad topic".into()))
                .to_message()
                .unwrap(),
        );
        assert_eq!(error["type"], "error");
        assert_eq!(error["category"], "validation_error");
        assert_eq!(error["message"], "bad topic");

        let confirmed = text_of(
            ServerMessage::SubscriptionConfirmed {
                action: SubscriptionAction::Subscribe,
                topics: vec![TopicPattern::parse("deal.*").unwrap()],
            }
            .to_message()
            .unwrap(),
        );
        assert_eq!(confirmed["type"], "subscription.confirmed");
        assert_eq!(confirmed["action"], "subscribe");
        assert_eq!(confirmed["topics"], json!(["deal.*"]));

        let pong = text_of(ServerMessage::pong().to_message().unwrap());
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());
    }

    #[test]
    fn heartbeat_encodes_as_ping() {
        assert_matches!(Outbound::Ping.into_message(), Ok(Message::Ping(_)));
    }
}
