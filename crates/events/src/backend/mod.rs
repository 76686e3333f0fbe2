//! Pluggable publish/subscribe backends.
//!
//! Every backend implements exactly the four operations of [`EventBackend`].
//! Callers (the bus facade, and through it the gateway) only ever hold an
//! `Arc<dyn EventBackend>`; the concrete type is chosen from
//! [`EventBusConfig::backend`](crate::config::EventBusConfig::backend).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventgate_core::error::CoreError;

use crate::config::{BackendKind, EventBusConfig};
use crate::envelope::Event;
use crate::metrics::GatewayMetrics;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

/// Callback invoked for every event delivered on a subscribed channel.
///
/// Runs on the backend's pump task and must not block.
pub type EventCallback = Arc<dyn Fn(Arc<Event>) + Send + Sync>;

/// Fire-and-forget publish/subscribe primitive.
///
/// Events published while no subscription covers their channel are lost;
/// backends never queue for absent subscribers.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Publish `event` on `channel`.
    ///
    /// Returns `false` when the transport is unreachable or the backend has
    /// been closed. Publishing to a channel nobody listens on is a success.
    async fn publish(&self, channel: &str, event: &Event) -> bool;

    /// Register `callback` for the given channels. A channel ending in `*`
    /// matches every channel sharing the part before the `*`.
    async fn subscribe(&self, channels: Vec<String>, callback: EventCallback)
        -> Result<(), CoreError>;

    /// Remove the given channels from every subscription that holds them.
    async fn unsubscribe(&self, channels: &[String]);

    /// Stop all subscriptions and refuse further publishes.
    async fn close(&self);
}

/// What a backend reports back to the bus outside the four operations:
/// events lost inside the transport and subscriptions that are currently down.
#[derive(Debug, Clone)]
pub struct BackendSignals {
    metrics: Arc<GatewayMetrics>,
    subscriptions_down: Arc<AtomicUsize>,
}

impl BackendSignals {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            metrics,
            subscriptions_down: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Count events the transport skipped before they reached a callback.
    pub fn events_lost(&self, count: u64) {
        self.metrics.record_dropped(count);
    }

    /// Mark one subscription as down until the returned guard is dropped.
    pub fn subscription_down(&self) -> SubscriptionDownGuard {
        self.subscriptions_down.fetch_add(1, Ordering::AcqRel);
        SubscriptionDownGuard {
            counter: Arc::clone(&self.subscriptions_down),
        }
    }

    pub fn subscriptions_down(&self) -> usize {
        self.subscriptions_down.load(Ordering::Acquire)
    }
}

/// Held by a pump while its subscription is disconnected.
#[derive(Debug)]
pub struct SubscriptionDownGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SubscriptionDownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Whether a subscribed channel (possibly a trailing-`*` glob) covers `channel`.
pub fn channel_matches(subscribed: &str, channel: &str) -> bool {
    match subscribed.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => subscribed == channel,
    }
}

/// Construct the backend selected by `config`.
pub fn build_backend(
    config: &EventBusConfig,
    signals: BackendSignals,
) -> Result<Arc<dyn EventBackend>, CoreError> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(memory::MemoryBackend::new(config.capacity, signals))),
        #[cfg(feature = "redis")]
        BackendKind::Redis => Ok(Arc::new(redis::RedisBackend::new(&config.redis_url, signals)?)),
        #[cfg(not(feature = "redis"))]
        BackendKind::Redis => Err(CoreError::Internal(
            "the redis event bus backend requires the `redis` cargo feature".into(),
        )),
    }
}
