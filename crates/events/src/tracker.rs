//! Delivery and idempotency tracking.
//!
//! The tracker is stateless about history: it never remembers which keys it
//! has seen, so two publishes with the same idempotency key are both
//! delivered. Consumers deduplicate (at-least-once, not exactly-once).

use chrono::{Duration, Utc};
use eventgate_core::error::CoreError;
use eventgate_core::topic::validate_event_type;
use uuid::Uuid;

use crate::envelope::{Event, EventDraft, EventMetadata, GdprContext};

/// Maximum accepted length of a caller-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// How far into the future a publisher-supplied timestamp may lie.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Process-wide defaults stamped onto events that omit them.
#[derive(Debug, Clone)]
pub struct TrackerDefaults {
    pub region: String,
    pub retention_days: u32,
}

impl Default for TrackerDefaults {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            retention_days: 365,
        }
    }
}

/// Validates event drafts and stamps delivery metadata.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    defaults: TrackerDefaults,
}

impl DeliveryTracker {
    pub fn new(defaults: TrackerDefaults) -> Self {
        Self { defaults }
    }

    /// Turn a draft into an immutable [`Event`].
    ///
    /// Rejects malformed event types, out-of-range timestamps and malformed
    /// idempotency keys. The idempotency key falls back to the event id.
    pub fn stamp(&self, draft: EventDraft) -> Result<Event, CoreError> {
        validate_event_type(&draft.event_type)?;

        let now = Utc::now();
        let timestamp = draft.timestamp.unwrap_or(now);
        if timestamp.timestamp() < 0 {
            return Err(CoreError::Validation(
                "timestamp must not precede the Unix epoch".into(),
            ));
        }
        if timestamp > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(CoreError::Validation(format!(
                "timestamp {timestamp} lies in the future"
            )));
        }

        let options = draft.options;
        let event_id = Uuid::now_v7();

        let idempotency_key = match options.idempotency_key {
            Some(key) => {
                let key = key.trim().to_string();
                if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                    return Err(CoreError::Validation(format!(
                        "idempotency_key must be 1..={MAX_IDEMPOTENCY_KEY_LEN} bytes"
                    )));
                }
                key
            }
            None => event_id.to_string(),
        };

        let region = options
            .region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| self.defaults.region.clone());

        let gdpr_context = options
            .gdpr_context
            .unwrap_or_else(|| GdprContext::with_retention(self.defaults.retention_days));

        Ok(Event {
            event_id,
            event_type: draft.event_type,
            timestamp,
            data: draft.data,
            metadata: EventMetadata {
                region,
                idempotency_key,
                gdpr_context,
                company_id: options.company_id,
                source: options.source,
            },
        })
    }
}
