//! Event bus and delivery infrastructure for the gateway.
//!
//! - [`Event`] -- the immutable event envelope every component shares.
//! - [`DeliveryTracker`] -- validates drafts and stamps idempotency, region
//!   and GDPR defaults.
//! - [`EventBackend`] -- the pluggable publish/subscribe primitive, with an
//!   in-process [`MemoryBackend`] and an optional Redis backend.
//! - [`EventBus`] -- the process-wide facade collaborators publish through.
//! - [`GatewayMetrics`] -- Prometheus counters shared by bus and transports.

pub mod backend;
pub mod bus;
pub mod config;
pub mod envelope;
pub mod metrics;
pub mod tracker;

pub use backend::memory::MemoryBackend;
pub use backend::{BackendSignals, EventBackend, EventCallback};
pub use bus::{BusHealth, BusStatus, EventBus};
pub use config::{BackendKind, EventBusConfig};
pub use envelope::{Event, EventDraft, EventMetadata, GdprContext, PublishOptions};
pub use metrics::GatewayMetrics;
pub use tracker::{DeliveryTracker, TrackerDefaults};
