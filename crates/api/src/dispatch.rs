//! Bridge from the event bus to the subscription registry.

use std::sync::Arc;

use eventgate_core::error::CoreError;
use eventgate_events::{EventBus, EventCallback};

use crate::registry::SubscriptionRegistry;

/// Subscribe the registry to every event under the bus namespace.
///
/// The callback runs on the backend's pump task and never blocks: the
/// registry only uses `try_send` and short critical sections.
pub async fn attach(bus: &EventBus, registry: Arc<SubscriptionRegistry>) -> Result<(), CoreError> {
    let callback: EventCallback = Arc::new(move |event| {
        registry.dispatch(&event);
    });
    bus.subscribe_all(callback).await?;
    tracing::info!("Subscription registry attached to event bus");
    Ok(())
}
