//! The canonical event envelope.
//!
//! Publishers describe an event with an [`EventDraft`]; the
//! [`DeliveryTracker`](crate::tracker::DeliveryTracker) validates the draft and
//! turns it into an [`Event`]. Events have no mutating methods and are shared
//! between connections as `Arc<Event>`.

use eventgate_core::types::{CompanyId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// GdprContext
// ---------------------------------------------------------------------------

/// Data-protection context attached by the publisher.
///
/// The gateway propagates it untouched; retention and consent are enforced by
/// downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdprContext {
    pub consent: bool,
    #[serde(default)]
    pub purpose: Option<String>,
    pub retention_days: u32,
    #[serde(default)]
    pub data_subject_id: Option<String>,
}

impl GdprContext {
    /// Context used when a publisher supplies none.
    pub fn with_retention(retention_days: u32) -> Self {
        Self {
            consent: false,
            purpose: None,
            retention_days,
            data_subject_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Delivery metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Data-residency region, e.g. `"us-east-1"`.
    pub region: String,
    /// Key consumers use to recognise retried publishes of one logical event.
    pub idempotency_key: String,
    pub gdpr_context: GdprContext,
    /// Tenant scope. `None` means the event is visible to every tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<CompanyId>,
    /// Name of the publishing collaborator, for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A published domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub(crate) event_id: Uuid,
    pub(crate) event_type: String,
    pub(crate) timestamp: Timestamp,
    pub(crate) data: serde_json::Value,
    pub(crate) metadata: EventMetadata,
}

impl Event {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Dot-separated event name, e.g. `"deal.stage.updated"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn idempotency_key(&self) -> &str {
        &self.metadata.idempotency_key
    }

    pub fn company_id(&self) -> Option<&str> {
        self.metadata.company_id.as_deref()
    }

    /// Whether a subscriber scoped to `company_id` may see this event.
    pub fn is_visible_to(&self, company_id: &str) -> bool {
        self.metadata
            .company_id
            .as_deref()
            .map_or(true, |scope| scope == company_id)
    }
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

/// Optional publish-time metadata. Anything left `None` is defaulted by the
/// tracker (or, for the idempotency key, derived from the event id).
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub region: Option<String>,
    pub gdpr_context: Option<GdprContext>,
    pub idempotency_key: Option<String>,
    pub company_id: Option<CompanyId>,
    pub source: Option<String>,
}

impl PublishOptions {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn gdpr_context(mut self, context: GdprContext) -> Self {
        self.gdpr_context = Some(context);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn company(mut self, company_id: impl Into<CompanyId>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// An event as described by a publisher, before validation.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: String,
    pub data: serde_json::Value,
    /// Creation instant; the tracker uses "now" when absent.
    pub timestamp: Option<Timestamp>,
    pub options: PublishOptions,
}

impl EventDraft {
    /// Create a draft with an empty object payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: serde_json::Value::Object(Default::default()),
            timestamp: None,
            options: PublishOptions::default(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }
}
