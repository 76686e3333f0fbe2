//! Gateway metrics.
//!
//! [`GatewayMetrics`] owns a private Prometheus [`Registry`] so several
//! instances (one per test, for example) never collide. It is shared as
//! `Arc<GatewayMetrics>` by the bus, the registry and both transports.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};

#[derive(Debug, Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    connections_active: IntGauge,
    poll_waiters_active: IntGauge,
    events_published: IntCounter,
    publish_failures: IntCounter,
    events_delivered: IntCounter,
    events_dropped: IntCounter,
    slow_consumer_disconnects: IntCounter,
    validation_errors: IntCounter,
    auth_rejections: IntCounter,
    delivery_latency_seconds: Histogram,
}

impl GatewayMetrics {
    /// Create and register every gateway metric.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_active =
            IntGauge::new("gateway_connections_active", "Open WebSocket connections")?;
        let poll_waiters_active =
            IntGauge::new("gateway_poll_waiters_active", "In-flight long-poll requests")?;
        let events_published =
            IntCounter::new("gateway_events_published_total", "Events accepted by the bus")?;
        let publish_failures = IntCounter::new(
            "gateway_publish_failures_total",
            "Publishes rejected by validation or the backend",
        )?;
        let events_delivered = IntCounter::new(
            "gateway_events_delivered_total",
            "Events enqueued to a connection or poll waiter",
        )?;
        let events_dropped = IntCounter::new(
            "gateway_events_dropped_total",
            "Events not delivered because of lag, overflow or closed consumers",
        )?;
        let slow_consumer_disconnects = IntCounter::new(
            "gateway_slow_consumer_disconnects_total",
            "Connections closed because their outbound queue overflowed",
        )?;
        let validation_errors = IntCounter::new(
            "gateway_validation_errors_total",
            "Rejected topic patterns, frames and event drafts",
        )?;
        let auth_rejections =
            IntCounter::new("gateway_auth_rejections_total", "Rejected credentials")?;
        let delivery_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_delivery_latency_seconds",
                "Time from event creation to enqueue for a subscriber",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(poll_waiters_active.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(publish_failures.clone()))?;
        registry.register(Box::new(events_delivered.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(slow_consumer_disconnects.clone()))?;
        registry.register(Box::new(validation_errors.clone()))?;
        registry.register(Box::new(auth_rejections.clone()))?;
        registry.register(Box::new(delivery_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            connections_active,
            poll_waiters_active,
            events_published,
            publish_failures,
            events_delivered,
            events_dropped,
            slow_consumer_disconnects,
            validation_errors,
            auth_rejections,
            delivery_latency_seconds,
        })
    }

    pub fn connection_opened(&self) {
        self.connections_active.inc();
    }

    pub fn connection_closed(&self) {
        self.connections_active.dec();
    }

    pub fn waiter_registered(&self) {
        self.poll_waiters_active.inc();
    }

    pub fn waiter_removed(&self) {
        self.poll_waiters_active.dec();
    }

    pub fn record_published(&self) {
        self.events_published.inc();
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub fn record_delivered(&self, latency_secs: f64) {
        self.events_delivered.inc();
        self.delivery_latency_seconds.observe(latency_secs.max(0.0));
    }

    pub fn record_dropped(&self, count: u64) {
        self.events_dropped.inc_by(count);
    }

    pub fn record_slow_consumer(&self) {
        self.slow_consumer_disconnects.inc();
    }

    pub fn record_validation_error(&self) {
        self.validation_errors.inc();
    }

    pub fn record_auth_rejection(&self) {
        self.auth_rejections.inc();
    }

    pub fn connections_active(&self) -> i64 {
        self.connections_active.get()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.get()
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.get()
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.get()
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.get()
    }

    pub fn slow_consumer_disconnects(&self) -> u64 {
        self.slow_consumer_disconnects.get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = GatewayMetrics::new().unwrap();
        assert_eq!(metrics.events_delivered(), 0);

        metrics.record_delivered(0.002);
        metrics.record_delivered(0.010);
        metrics.record_dropped(3);
        metrics.connection_opened();

        assert_eq!(metrics.events_delivered(), 2);
        assert_eq!(metrics.events_dropped(), 3);
        assert_eq!(metrics.connections_active(), 1);
    }

    #[test]
    fn render_contains_metric_names() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_published();
        let text = metrics.render().unwrap();
        assert!(text.contains("gateway_events_published_total 1"));
        assert!(text.contains("gateway_delivery_latency_seconds"));
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = GatewayMetrics::new().unwrap();
        let b = GatewayMetrics::new().unwrap();
        a.record_published();
        assert_eq!(a.events_published(), 1);
        assert_eq!(b.events_published(), 0);
    }
}
