//! In-process backend backed by a `tokio::sync::broadcast` channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventgate_core::error::CoreError;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::{channel_matches, BackendSignals, EventBackend, EventCallback};
use crate::envelope::Event;

/// A message on the shared broadcast channel.
#[derive(Clone)]
struct ChannelMessage {
    channel: Arc<str>,
    event: Arc<Event>,
}

struct Subscription {
    id: u64,
    channels: Arc<RwLock<Vec<String>>>,
    pump: JoinHandle<()>,
}

/// Single shared channel namespace held in process memory.
///
/// Every `subscribe` call gets its own broadcast receiver and pump task.
/// When the broadcast buffer fills, the slowest pump observes
/// `RecvError::Lagged`; the skipped events are lost and counted as dropped.
pub struct MemoryBackend {
    sender: broadcast::Sender<ChannelMessage>,
    signals: BackendSignals,
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new(capacity: usize, signals: BackendSignals) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            signals,
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    async fn pump(
        id: u64,
        mut receiver: broadcast::Receiver<ChannelMessage>,
        channels: Arc<RwLock<Vec<String>>>,
        callback: EventCallback,
        signals: BackendSignals,
    ) {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let wanted = channels
                        .read()
                        .iter()
                        .any(|c| channel_matches(c, &message.channel));
                    if wanted {
                        callback(message.event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    signals.events_lost(n);
                    tracing::error!(
                        subscription = id,
                        skipped = n,
                        "Memory backend subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(subscription = id, "Memory backend channel closed");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    async fn publish(&self, channel: &str, event: &Event) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(ChannelMessage {
            channel: Arc::from(channel),
            event: Arc::new(event.clone()),
        });
        true
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
        callback: EventCallback,
    ) -> Result<(), CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::BackendUnavailable("memory backend is closed".into()));
        }
        if channels.is_empty() {
            return Err(CoreError::Validation("at least one channel is required".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channels = Arc::new(RwLock::new(channels));
        let receiver = self.sender.subscribe();
        let pump = tokio::spawn(Self::pump(
            id,
            receiver,
            Arc::clone(&channels),
            callback,
            self.signals.clone(),
        ));

        tracing::debug!(subscription = id, channels = ?channels.read(), "Memory backend subscribed");
        self.subscriptions.lock().await.push(Subscription { id, channels, pump });
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[String]) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.retain(|sub| {
            let mut held = sub.channels.write();
            held.retain(|c| !channels.contains(c));
            if held.is_empty() {
                sub.pump.abort();
                tracing::debug!(subscription = sub.id, "Memory backend subscription removed");
                false
            } else {
                true
            }
        });
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut subscriptions = self.subscriptions.lock().await;
        for sub in subscriptions.drain(..) {
            sub.pump.abort();
        }
        tracing::info!("Memory backend closed");
    }
}
