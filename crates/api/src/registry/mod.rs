//! Subscription registry shared by the WebSocket gateway and long-poll endpoint.
//!
//! Dispatch reads an immutable [`Snapshot`] through an `ArcSwap`, so
//! delivering an event never contends with subscribe/unsubscribe. Writers
//! serialize on a mutex, mutate the authoritative [`RegistryState`] and store
//! a freshly built snapshot before releasing it.
//!
//! Lookups are indexed: exact patterns by event type, wildcard patterns by
//! their literal prefix. For `deal.stage.updated` the candidate wildcard keys
//! are `deal`, `deal.stage` and `deal.stage.updated`.

pub mod subscriber;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use eventgate_core::topic::{TopicPattern, SEPARATOR};
use eventgate_core::types::{CompanyId, UserId};
use eventgate_events::{Event, GatewayMetrics};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ws::protocol::{Outbound, ServerMessage};

pub use subscriber::{CloseReason, ConnectionHandle, ConnectionId, PollBatch, WaiterShared};

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers whose patterns and tenant matched.
    pub matched: usize,
    pub delivered: usize,
    /// Copies lost to a full queue or a full poll buffer.
    pub dropped: usize,
    /// Connections removed during this dispatch.
    pub disconnected: usize,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Subscriber {
    Connection(Arc<ConnectionHandle>),
    Waiter(u64, Arc<WaiterShared>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriberKey {
    Connection(ConnectionId),
    Waiter(u64),
}

impl Subscriber {
    fn key(&self) -> SubscriberKey {
        match self {
            Subscriber::Connection(handle) => SubscriberKey::Connection(handle.id()),
            Subscriber::Waiter(id, _) => SubscriberKey::Waiter(*id),
        }
    }

    fn company_id(&self) -> &str {
        match self {
            Subscriber::Connection(handle) => handle.company_id(),
            Subscriber::Waiter(_, shared) => shared.company_id(),
        }
    }
}

#[derive(Default)]
struct Snapshot {
    exact: HashMap<String, Vec<Subscriber>>,
    wildcard: HashMap<String, Vec<Subscriber>>,
    entries: usize,
}

impl Snapshot {
    fn build(state: &RegistryState) -> Self {
        let mut snapshot = Snapshot::default();
        for entry in state.connections.values() {
            for pattern in &entry.patterns {
                snapshot.insert(pattern, Subscriber::Connection(Arc::clone(&entry.handle)));
            }
        }
        for (id, entry) in &state.waiters {
            for pattern in &entry.patterns {
                snapshot.insert(pattern, Subscriber::Waiter(*id, Arc::clone(&entry.shared)));
            }
        }
        snapshot
    }

    fn insert(&mut self, pattern: &TopicPattern, subscriber: Subscriber) {
        let index = if pattern.is_wildcard() {
            &mut self.wildcard
        } else {
            &mut self.exact
        };
        index
            .entry(pattern.literal().to_string())
            .or_default()
            .push(subscriber);
        self.entries += 1;
    }

    fn candidates<'a>(&'a self, event_type: &str) -> Vec<&'a Subscriber> {
        let mut found: Vec<&Subscriber> = self.exact.get(event_type).into_iter().flatten().collect();
        if self.wildcard.is_empty() {
            return found;
        }
        let prefixes = event_type
            .match_indices(SEPARATOR)
            .map(|(i, _)| &event_type[..i])
            .chain(std::iter::once(event_type));
        for prefix in prefixes {
            if let Some(subscribers) = self.wildcard.get(prefix) {
                found.extend(subscribers);
            }
        }
        found
    }
}

// ---------------------------------------------------------------------------
// Authoritative state
// ---------------------------------------------------------------------------

struct ConnectionEntry {
    handle: Arc<ConnectionHandle>,
    patterns: BTreeSet<TopicPattern>,
}

struct WaiterEntry {
    shared: Arc<WaiterShared>,
    patterns: Vec<TopicPattern>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    waiters: HashMap<u64, WaiterEntry>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps topic patterns to live subscribers.
///
/// Designed to be wrapped in `Arc` and shared across the application.
pub struct SubscriptionRegistry {
    snapshot: ArcSwap<Snapshot>,
    state: Mutex<RegistryState>,
    next_waiter_id: AtomicU64,
    metrics: Arc<GatewayMetrics>,
}

impl SubscriptionRegistry {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            state: Mutex::new(RegistryState::default()),
            next_waiter_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Rebuild the read snapshot. Must be called with the state lock held.
    fn publish(&self, state: &RegistryState) {
        self.snapshot.store(Arc::new(Snapshot::build(state)));
    }

    /// Register an authenticated connection with no subscriptions.
    ///
    /// Returns the handle and the receiving half of its bounded outbound queue.
    pub fn register_connection(
        &self,
        user_id: UserId,
        company_id: CompanyId,
        queue_size: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new(user_id, company_id, queue_size);
        self.state.lock().connections.insert(
            handle.id(),
            ConnectionEntry {
                handle: Arc::clone(&handle),
                patterns: BTreeSet::new(),
            },
        );
        self.metrics.connection_opened();
        (handle, rx)
    }

    /// Add patterns to a connection. Returns `false` if the connection is gone.
    pub fn subscribe(&self, id: ConnectionId, patterns: &[TopicPattern]) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        let mut changed = false;
        for pattern in patterns {
            changed |= entry.patterns.insert(pattern.clone());
        }
        if changed {
            self.publish(&state);
        }
        true
    }

    /// Remove patterns from a connection. Unknown patterns are ignored.
    pub fn unsubscribe(&self, id: ConnectionId, patterns: &[TopicPattern]) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        let mut changed = false;
        for pattern in patterns {
            changed |= entry.patterns.remove(pattern);
        }
        if changed {
            self.publish(&state);
        }
        true
    }

    /// Current subscription set of a connection.
    pub fn subscriptions(&self, id: ConnectionId) -> Vec<TopicPattern> {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.patterns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a connection and all of its entries. Idempotent.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let mut state = self.state.lock();
        let entry = state.connections.remove(&id)?;
        if !entry.patterns.is_empty() {
            self.publish(&state);
        }
        drop(state);
        self.metrics.connection_closed();
        Some(entry.handle)
    }

    /// Remove a connection whose queue overflowed and close it with 4008.
    fn evict_slow_consumer(&self, handle: &ConnectionHandle) -> bool {
        handle.close(CloseReason::SlowConsumer);
        if self.remove_connection(handle.id()).is_none() {
            return false;
        }
        self.metrics.record_slow_consumer();
        tracing::warn!(
            conn_id = %handle.id(),
            user_id = %handle.user_id(),
            company_id = %handle.company_id(),
            "Outbound queue full, disconnecting slow consumer"
        );
        true
    }

    /// Queue a control frame for a connection.
    ///
    /// A full queue is treated exactly like a full queue during dispatch.
    pub fn reply(&self, handle: &ConnectionHandle, frame: ServerMessage) -> bool {
        match handle.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.evict_slow_consumer(handle);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Register a long-poll waiter for `patterns`.
    ///
    /// The returned guard deregisters the waiter when dropped, including when
    /// the owning request future is cancelled.
    pub fn register_waiter(
        self: &Arc<Self>,
        patterns: Vec<TopicPattern>,
        company_id: CompanyId,
        max_events: usize,
    ) -> PollWaiter {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(WaiterShared::new(company_id, max_events));
        {
            let mut state = self.state.lock();
            state.waiters.insert(
                id,
                WaiterEntry {
                    shared: Arc::clone(&shared),
                    patterns,
                },
            );
            self.publish(&state);
        }
        self.metrics.waiter_registered();
        PollWaiter {
            id,
            shared,
            registry: Arc::clone(self),
        }
    }

    fn remove_waiter(&self, id: u64) {
        let mut state = self.state.lock();
        if state.waiters.remove(&id).is_some() {
            self.publish(&state);
            drop(state);
            self.metrics.waiter_removed();
        }
    }

    /// Deliver an event to every matching subscriber without blocking.
    ///
    /// Each subscriber receives at most one copy however many of its patterns
    /// match. Connections whose queue is full are removed and closed before
    /// this returns.
    pub fn dispatch(&self, event: &Arc<Event>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut slow: Vec<Arc<ConnectionHandle>> = Vec::new();
        let mut gone: Vec<ConnectionId> = Vec::new();

        {
            let snapshot = self.snapshot.load();
            let mut seen: HashSet<SubscriberKey> = HashSet::new();

            for subscriber in snapshot.candidates(event.event_type()) {
                if !seen.insert(subscriber.key()) {
                    continue;
                }
                if !event.is_visible_to(subscriber.company_id()) {
                    continue;
                }
                report.matched += 1;

                match subscriber {
                    Subscriber::Connection(handle) => {
                        match handle.try_send(Outbound::Event(Arc::clone(event))) {
                            Ok(()) => report.delivered += 1,
                            Err(TrySendError::Full(_)) => {
                                report.dropped += 1;
                                slow.push(Arc::clone(handle));
                            }
                            Err(TrySendError::Closed(_)) => gone.push(handle.id()),
                        }
                    }
                    Subscriber::Waiter(_, shared) => {
                        if shared.offer(Arc::clone(event)) {
                            report.delivered += 1;
                        } else {
                            report.dropped += 1;
                        }
                    }
                }
            }
        }

        for handle in &slow {
            if self.evict_slow_consumer(handle) {
                report.disconnected += 1;
            }
        }
        for id in gone {
            if self.remove_connection(id).is_some() {
                report.disconnected += 1;
            }
        }

        if report.delivered > 0 {
            let latency = (chrono::Utc::now() - event.timestamp())
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            for _ in 0..report.delivered {
                self.metrics.record_delivered(latency);
            }
        }
        if report.dropped > 0 {
            self.metrics.record_dropped(report.dropped as u64);
        }

        tracing::trace!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            "Event dispatched"
        );
        report
    }

    /// Queue a heartbeat ping on every connection. Full queues are skipped.
    pub fn ping_all(&self) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .state
            .lock()
            .connections
            .values()
            .map(|entry| Arc::clone(&entry.handle))
            .collect();
        handles
            .iter()
            .filter(|handle| handle.try_send(Outbound::Ping).is_ok())
            .count()
    }

    /// Close every connection with `reason` and release every poll waiter.
    ///
    /// Returns the number of connections closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let (connections, waiters) = {
            let mut state = self.state.lock();
            let connections: Vec<_> = state.connections.drain().map(|(_, e)| e.handle).collect();
            let waiters: Vec<_> = state.waiters.drain().map(|(_, e)| e.shared).collect();
            self.publish(&state);
            (connections, waiters)
        };

        for handle in &connections {
            handle.close(reason);
            self.metrics.connection_closed();
        }
        for shared in &waiters {
            shared.close();
            self.metrics.waiter_removed();
        }
        tracing::info!(
            connections = connections.len(),
            waiters = waiters.len(),
            reason = reason.reason(),
            "Closed all subscribers"
        );
        connections.len()
    }

    /// Number of (subscriber, pattern) pairs currently indexed.
    pub fn entry_count(&self) -> usize {
        self.snapshot.load().entries
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }
}

// ---------------------------------------------------------------------------
// PollWaiter
// ---------------------------------------------------------------------------

/// Registration guard for one long-poll request.
pub struct PollWaiter {
    id: u64,
    shared: Arc<WaiterShared>,
    registry: Arc<SubscriptionRegistry>,
}

impl PollWaiter {
    /// Wait until at least one event has been buffered, the waiter is
    /// released by shutdown, or `deadline` passes.
    pub async fn wait_until(&self, deadline: tokio::time::Instant) -> PollBatch {
        loop {
            if let Some(batch) = self.shared.take_ready() {
                return batch;
            }
            if tokio::time::timeout_at(deadline, self.shared.notified())
                .await
                .is_err()
            {
                return self.shared.take();
            }
        }
    }
}

impl Drop for PollWaiter {
    fn drop(&mut self) {
        self.registry.remove_waiter(self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventgate_events::{DeliveryTracker, EventDraft, PublishOptions, TrackerDefaults};

    use super::*;

    fn registry() -> Arc<SubscriptionRegistry> {
        Arc::new(SubscriptionRegistry::new(Arc::new(
            GatewayMetrics::new().unwrap(),
        )))
    }

    fn patterns(raw: &[&str]) -> Vec<TopicPattern> {
        raw.iter().map(|p| TopicPattern::parse(p).unwrap()).collect()
    }

    fn event(event_type: &str) -> Arc<Event> {
        event_with(event_type, PublishOptions::default())
    }

    fn event_with(event_type: &str, options: PublishOptions) -> Arc<Event> {
        let tracker = DeliveryTracker::new(TrackerDefaults::default());
        Arc::new(
            tracker
                .stamp(EventDraft::new(event_type).with_options(options))
                .unwrap(),
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn exact_and_wildcard_patterns_route_events() {
        let registry = registry();
        let (a, mut rx_a) = registry.register_connection("u1".into(), "acme".into(), 8);
        let (b, mut rx_b) = registry.register_connection("u2".into(), "acme".into(), 8);
        registry.subscribe(a.id(), &patterns(&["deal.stage.*"]));
        registry.subscribe(b.id(), &patterns(&["deal.created"]));

        let report = registry.dispatch(&event("deal.stage.updated"));
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());

        registry.dispatch(&event("deal.created"));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        registry.dispatch(&event("deal.stage"));
        assert_eq!(drain(&mut rx_a).len(), 1, "wildcard matches its own prefix");

        registry.dispatch(&event("deal.stagehand"));
        assert!(drain(&mut rx_a).is_empty(), "prefix must end on a segment boundary");
    }

    #[test]
    fn overlapping_patterns_deliver_once() {
        let registry = registry();
        let (handle, mut rx) = registry.register_connection("u1".into(), "acme".into(), 8);
        registry.subscribe(
            handle.id(),
            &patterns(&["deal.*", "deal.stage.*", "deal.stage.updated"]),
        );
        assert_eq!(registry.entry_count(), 3);

        let report = registry.dispatch(&event("deal.stage.updated"));
        assert_eq!(report.matched, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn tenant_scoped_events_skip_other_companies() {
        let registry = registry();
        let (acme, mut rx_acme) = registry.register_connection("u1".into(), "acme".into(), 8);
        let (globex, mut rx_globex) = registry.register_connection("u2".into(), "globex".into(), 8);
        registry.subscribe(acme.id(), &patterns(&["lead.*"]));
        registry.subscribe(globex.id(), &patterns(&["lead.*"]));

        registry.dispatch(&event_with("lead.created", PublishOptions::default().company("acme")));
        assert_eq!(drain(&mut rx_acme).len(), 1);
        assert!(drain(&mut rx_globex).is_empty());

        registry.dispatch(&event("lead.created"));
        assert_eq!(drain(&mut rx_acme).len(), 1);
        assert_eq!(drain(&mut rx_globex).len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = registry();
        let (handle, mut rx) = registry.register_connection("u1".into(), "acme".into(), 8);
        registry.subscribe(handle.id(), &patterns(&["task.*", "note.*"]));
        registry.unsubscribe(handle.id(), &patterns(&["task.*", "activity.*"]));

        assert_eq!(registry.subscriptions(handle.id()), patterns(&["note.*"]));
        registry.dispatch(&event("task.completed"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn full_queue_evicts_connection_within_one_dispatch() {
        let registry = registry();
        let (handle, _rx) = registry.register_connection("u1".into(), "acme".into(), 1);
        registry.subscribe(handle.id(), &patterns(&["deal.*"]));

        assert_eq!(registry.dispatch(&event("deal.created")).delivered, 1);
        let report = registry.dispatch(&event("deal.updated"));

        assert_eq!(report.dropped, 1);
        assert_eq!(report.disconnected, 1);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.entry_count(), 0);
        assert_eq!(handle.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(registry.metrics().slow_consumer_disconnects(), 1);
    }

    #[test]
    fn dropped_receiver_is_removed() {
        let registry = registry();
        let (handle, rx) = registry.register_connection("u1".into(), "acme".into(), 4);
        registry.subscribe(handle.id(), &patterns(&["deal.*"]));
        drop(rx);

        let report = registry.dispatch(&event("deal.created"));
        assert_eq!(report.disconnected, 1);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn remove_connection_clears_entries() {
        let registry = registry();
        let mut ids = Vec::new();
        for i in 0..10 {
            let (handle, _rx) = registry.register_connection(format!("u{i}"), "acme".into(), 4);
            registry.subscribe(handle.id(), &patterns(&["deal.*", "lead.created"]));
            ids.push(handle.id());
        }
        assert_eq!(registry.entry_count(), 20);

        for id in ids {
            assert!(registry.remove_connection(id).is_some());
            assert!(registry.remove_connection(id).is_none());
        }
        assert_eq!(registry.entry_count(), 0);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.metrics().connections_active(), 0);
    }

    #[tokio::test]
    async fn waiter_receives_and_deregisters_on_drop() {
        let registry = registry();
        let waiter = registry.register_waiter(patterns(&["deal.*"]), "acme".into(), 10);
        assert_eq!(registry.waiter_count(), 1);

        registry.dispatch(&event("deal.created"));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let batch = waiter.wait_until(deadline).await;
        assert_eq!(batch.events.len(), 1);
        assert!(!batch.has_more);

        drop(waiter);
        assert_eq!(registry.waiter_count(), 0);
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_empty() {
        let registry = registry();
        let waiter = registry.register_waiter(patterns(&["deal.*"]), "acme".into(), 10);

        let start = tokio::time::Instant::now();
        let batch = waiter.wait_until(start + Duration::from_secs(2)).await;
        assert!(batch.events.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn close_all_closes_connections_and_releases_waiters() {
        let registry = registry();
        let (handle, _rx) = registry.register_connection("u1".into(), "acme".into(), 4);
        registry.subscribe(handle.id(), &patterns(&["deal.*"]));
        let waiter = registry.register_waiter(patterns(&["deal.*"]), "acme".into(), 10);

        assert_eq!(registry.close_all(CloseReason::Shutdown), 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(registry.entry_count(), 0);

        let far = tokio::time::Instant::now() + Duration::from_secs(30);
        let batch = tokio::time::timeout(Duration::from_secs(1), waiter.wait_until(far))
            .await
            .expect("released waiter returns immediately");
        assert!(batch.events.is_empty());
    }
}
