//! Bus trait definitions

use async_trait::async_trait;
use nexus_core::NexusResult;
use serde::Serialize;

use crate::subscription::Subscription;

/// Broadcast publish/subscribe over named channels.
///
/// Every subscriber sees every message published while it is attached.
/// There is no backlog: a new subscription starts empty.
#[async_trait]
pub trait TaskBus: Send + Sync {
    /// Broadcast a JSON message. Does not wait for subscribers.
    async fn publish(&self, channel: &str, message: &serde_json::Value) -> NexusResult<()>;

    /// Attach to a channel. Returns once the listener is active.
    async fn subscribe(&self, channel: &str) -> NexusResult<Subscription>;

    /// Get the bus name
    fn name(&self) -> &'static str;
}

/// Serialize a value and publish it
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn TaskBus,
    channel: &str,
    value: &T,
) -> NexusResult<()> {
    let message = serde_json::to_value(value)?;
    bus.publish(channel, &message).await
}
