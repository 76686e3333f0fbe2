use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::SubscriptionRegistry;

/// Spawn a background task that queues a Ping frame on every registered
/// connection each `every`.
///
/// Clients answer with Pong, which counts as inbound traffic and keeps an
/// otherwise quiet connection inside its idle window. `every` comes from
/// [`GatewayConfig::heartbeat_interval`](crate::config::GatewayConfig::heartbeat_interval)
/// so it always fits inside that window. The task runs until `cancel` fires.
pub fn start_heartbeat(
    registry: Arc<SubscriptionRegistry>,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let count = registry.ping_all();
                    tracing::debug!(count, "WebSocket heartbeat ping");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use eventgate_events::GatewayMetrics;

    use super::*;
    use crate::ws::protocol::Outbound;

    #[tokio::test(start_paused = true)]
    async fn pings_registered_connections_each_interval() {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(GatewayMetrics::new().unwrap())));
        let (_handle, mut rx) = registry.register_connection("u1".into(), "acme".into(), 8);
        let cancel = CancellationToken::new();
        let task = start_heartbeat(Arc::clone(&registry), Duration::from_secs(4), cancel.clone());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_matches!(rx.try_recv(), Ok(Outbound::Ping));

        cancel.cancel();
        task.await.unwrap();
    }
}
