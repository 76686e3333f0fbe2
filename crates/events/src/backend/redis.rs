//! Redis pub/sub backend.
//!
//! Publishes go through one lazily (re)connected multiplexed connection.
//! Each subscription owns a dedicated pub/sub connection and a pump task.
//! Events travel as JSON, so every gateway instance attached to the same
//! Redis sees every event. A pump whose stream ends reports its
//! subscription down and reconnects with backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventgate_core::error::CoreError;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BackendSignals, EventBackend, EventCallback};
use crate::envelope::Event;

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(250);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

struct RedisSubscription {
    channels: Vec<String>,
    callback: EventCallback,
    cancel: CancellationToken,
}

pub struct RedisBackend {
    client: redis::Client,
    publisher: Mutex<Option<MultiplexedConnection>>,
    subscriptions: Mutex<Vec<RedisSubscription>>,
    signals: BackendSignals,
    closed: AtomicBool,
}

impl RedisBackend {
    /// Create a backend for `url`. No connection is opened until first use.
    pub fn new(url: &str, signals: BackendSignals) -> Result<Self, CoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::Internal(format!("invalid REDIS_URL: {e}")))?;
        Ok(Self {
            client,
            publisher: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            signals,
            closed: AtomicBool::new(false),
        })
    }

    /// Open a pub/sub connection for `channels` and spawn its pump task.
    async fn start_pump(
        &self,
        channels: &[String],
        callback: EventCallback,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        let pubsub = open_pubsub(&self.client, channels).await?;
        tokio::spawn(pump(
            self.client.clone(),
            channels.to_vec(),
            pubsub,
            callback,
            cancel,
            self.signals.clone(),
        ));
        Ok(())
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let mut guard = self.publisher.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

async fn open_pubsub(client: &redis::Client, channels: &[String]) -> Result<PubSub, CoreError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

    for channel in channels {
        let result = if channel.ends_with('*') {
            pubsub.psubscribe(channel).await
        } else {
            pubsub.subscribe(channel).await
        };
        result.map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
    }
    Ok(pubsub)
}

/// Forward messages to `callback`. When the stream ends the subscription
/// is reported down and re-opened with backoff until it recovers or
/// `cancel` fires.
async fn pump(
    client: redis::Client,
    channels: Vec<String>,
    mut pubsub: PubSub,
    callback: EventCallback,
    cancel: CancellationToken,
    signals: BackendSignals,
) {
    loop {
        let mut messages = pubsub.into_on_message();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                message = messages.next() => {
                    let Some(message) = message else { break };
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "Non-text payload on redis channel");
                            continue;
                        }
                    };
                    match serde_json::from_str::<Event>(&payload) {
                        Ok(event) => callback(Arc::new(event)),
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                channel = %message.get_channel_name(),
                                "Discarding malformed event from redis"
                            );
                        }
                    }
                }
            }
        }
        drop(messages);

        tracing::error!(?channels, "Redis subscription stream ended");
        let _down = signals.subscription_down();
        match reconnect(&client, &channels, &cancel).await {
            Some(fresh) => pubsub = fresh,
            None => return,
        }
    }
}

/// Re-open a pub/sub connection with exponential backoff. Returns `None`
/// once `cancel` fires.
async fn reconnect(
    client: &redis::Client,
    channels: &[String],
    cancel: &CancellationToken,
) -> Option<PubSub> {
    let mut delay = RECONNECT_INITIAL_DELAY;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }
        match open_pubsub(client, channels).await {
            Ok(pubsub) => {
                tracing::info!(?channels, "Redis subscription restored");
                return Some(pubsub);
            }
            Err(e) => {
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Redis resubscribe failed");
            }
        }
    }
}

#[async_trait]
impl EventBackend for RedisBackend {
    async fn publish(&self, channel: &str, event: &Event) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, event_type = %event.event_type(), "Failed to encode event");
                return false;
            }
        };

        let mut conn = match self.publisher().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, channel, "Redis unreachable");
                return false;
            }
        };

        match conn.publish::<_, _, i64>(channel, payload).await {
            Ok(receivers) => {
                tracing::trace!(channel, receivers, "Published to redis");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, channel, "Redis publish failed");
                // Force a reconnect on the next publish.
                *self.publisher.lock().await = None;
                false
            }
        }
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
        callback: EventCallback,
    ) -> Result<(), CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::BackendUnavailable("redis backend is closed".into()));
        }
        if channels.is_empty() {
            return Err(CoreError::Validation("at least one channel is required".into()));
        }

        let cancel = CancellationToken::new();
        self.start_pump(&channels, Arc::clone(&callback), cancel.clone())
            .await?;
        tracing::debug!(?channels, "Redis backend subscribed");
        self.subscriptions.lock().await.push(RedisSubscription {
            channels,
            callback,
            cancel,
        });
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[String]) {
        let mut subscriptions = self.subscriptions.lock().await;
        let mut kept = Vec::with_capacity(subscriptions.len());

        for mut sub in subscriptions.drain(..) {
            if !sub.channels.iter().any(|c| channels.contains(c)) {
                kept.push(sub);
                continue;
            }
            // A pub/sub stream cannot drop channels once consumed, so the
            // remaining channels move to a fresh connection.
            sub.cancel.cancel();
            sub.channels.retain(|c| !channels.contains(c));
            if sub.channels.is_empty() {
                continue;
            }
            let cancel = CancellationToken::new();
            match self
                .start_pump(&sub.channels, Arc::clone(&sub.callback), cancel.clone())
                .await
            {
                Ok(()) => kept.push(RedisSubscription { cancel, ..sub }),
                Err(e) => {
                    tracing::error!(error = %e, channels = ?sub.channels, "Failed to resubscribe remaining channels");
                }
            }
        }
        *subscriptions = kept;
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for sub in self.subscriptions.lock().await.drain(..) {
            sub.cancel.cancel();
        }
        *self.publisher.lock().await = None;
        tracing::info!("Redis backend closed");
    }
}
