//! Process-wide event bus facade.
//!
//! [`EventBus`] is constructed once at startup with [`EventBus::init`] and
//! shared as `Arc<EventBus>`. Business collaborators publish through
//! [`EventBus::publish_event`]; the gateway attaches its dispatch path with
//! [`EventBus::subscribe_all`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eventgate_core::error::CoreError;
use serde::Serialize;

use crate::backend::{build_backend, BackendSignals, EventBackend, EventCallback};
use crate::config::{BackendKind, EventBusConfig};
use crate::envelope::{Event, EventDraft, PublishOptions};
use crate::metrics::GatewayMetrics;
use crate::tracker::DeliveryTracker;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusStatus {
    Ok,
    /// The most recent publish failed at the backend, or a backend
    /// subscription is down and reconnecting.
    Degraded,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusHealth {
    pub status: BusStatus,
    pub backend: &'static str,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    backend: Arc<dyn EventBackend>,
    backend_kind: BackendKind,
    channel_prefix: String,
    tracker: DeliveryTracker,
    metrics: Arc<GatewayMetrics>,
    signals: BackendSignals,
    closed: AtomicBool,
    last_publish_failed: AtomicBool,
}

impl EventBus {
    /// Build the backend selected by `config` and wrap it in a bus.
    pub fn init(
        config: &EventBusConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Arc<Self>, CoreError> {
        let signals = BackendSignals::new(metrics);
        let backend = build_backend(config, signals.clone())?;
        tracing::info!(
            backend = %config.backend,
            channel_prefix = %config.channel_prefix,
            "Event bus initialised"
        );
        Ok(Arc::new(Self::with_backend(backend, config, signals)))
    }

    /// Wrap an already constructed backend that reports through `signals`.
    pub fn with_backend(
        backend: Arc<dyn EventBackend>,
        config: &EventBusConfig,
        signals: BackendSignals,
    ) -> Self {
        Self {
            backend,
            backend_kind: config.backend,
            channel_prefix: config.channel_prefix.clone(),
            tracker: DeliveryTracker::new(config.tracker_defaults()),
            metrics: Arc::clone(signals.metrics()),
            signals,
            closed: AtomicBool::new(false),
            last_publish_failed: AtomicBool::new(false),
        }
    }

    /// Backend channel an event type is published on.
    pub fn channel_for(&self, event_type: &str) -> String {
        format!("{}{}", self.channel_prefix, event_type)
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Publish API for business collaborators.
    ///
    /// Returns `false` when the draft is invalid or the backend is
    /// unreachable; the failure is logged and counted, never raised.
    pub async fn publish_event(
        &self,
        event_type: &str,
        data: serde_json::Value,
        options: PublishOptions,
    ) -> bool {
        let draft = EventDraft::new(event_type)
            .with_data(data)
            .with_options(options);
        match self.try_publish(draft).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, event_type, "publish_event rejected");
                false
            }
        }
    }

    /// Validate, stamp and publish a draft, returning the published event so
    /// the caller can retry it verbatim with [`publish`](Self::publish).
    pub async fn try_publish(&self, draft: EventDraft) -> Result<Event, CoreError> {
        let event = match self.tracker.stamp(draft) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_validation_error();
                self.metrics.record_publish_failure();
                return Err(e);
            }
        };
        if self.publish(&event).await {
            Ok(event)
        } else {
            Err(CoreError::BackendUnavailable(format!(
                "failed to publish {}",
                event.event_type()
            )))
        }
    }

    /// Publish an already stamped event. Re-publishing the same value keeps
    /// its idempotency key, which is how retries stay recognisable.
    pub async fn publish(&self, event: &Event) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(event_type = %event.event_type(), "Publish after event bus shutdown");
            self.metrics.record_publish_failure();
            return false;
        }

        let channel = self.channel_for(event.event_type());
        let published = self.backend.publish(&channel, event).await;
        self.last_publish_failed.store(!published, Ordering::Release);

        if published {
            self.metrics.record_published();
            tracing::debug!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                idempotency_key = %event.idempotency_key(),
                "Event published"
            );
        } else {
            self.metrics.record_publish_failure();
            tracing::error!(
                event_type = %event.event_type(),
                region = %event.metadata().region,
                timestamp = %event.timestamp(),
                backend = %self.backend_kind,
                "Event bus publish failed"
            );
        }
        published
    }

    /// Receive every event under this bus's channel namespace.
    pub async fn subscribe_all(&self, callback: EventCallback) -> Result<(), CoreError> {
        self.backend
            .subscribe(vec![format!("{}*", self.channel_prefix)], callback)
            .await
    }

    /// Subscribe to specific event types (exact or trailing `*`).
    pub async fn subscribe(
        &self,
        event_types: &[&str],
        callback: EventCallback,
    ) -> Result<(), CoreError> {
        let channels = event_types.iter().map(|t| self.channel_for(t)).collect();
        self.backend.subscribe(channels, callback).await
    }

    pub async fn unsubscribe(&self, event_types: &[&str]) {
        let channels: Vec<String> = event_types.iter().map(|t| self.channel_for(t)).collect();
        self.backend.unsubscribe(&channels).await;
    }

    /// Close the backend. Later publishes return `false`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.backend.close().await;
        tracing::info!(backend = %self.backend_kind, "Event bus shut down");
    }

    pub fn health(&self) -> BusHealth {
        let status = if self.closed.load(Ordering::Acquire) {
            BusStatus::Closed
        } else if self.last_publish_failed.load(Ordering::Acquire)
            || self.signals.subscriptions_down() > 0
        {
            BusStatus::Degraded
        } else {
            BusStatus::Ok
        };
        BusHealth {
            status,
            backend: self.backend_kind.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
