//! Shared subscribe/consume loop for bus-driven services

use async_trait::async_trait;
use nexus_bus::{Subscription, TaskBus};
use nexus_core::{Message, NexusResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Something that reacts to messages on one channel
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: Message);
}

/// Consume `channel` until cancelled.
///
/// A closed subscription or a retryable subscribe error is retried after
/// `backoff`. A fatal subscribe error is returned.
pub async fn listen(
    bus: &dyn TaskBus,
    channel: &str,
    backoff: Duration,
    cancel: CancellationToken,
    handler: &dyn MessageHandler,
) -> NexusResult<()> {
    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            subscribed = bus.subscribe(channel) => subscribed,
        };

        match subscribed {
            Ok(subscription) => {
                info!(channel = channel, bus = bus.name(), "Listening");
                consume(subscription, &cancel, handler).await;
                if cancel.is_cancelled() {
                    return Ok(());
                }
                warn!(channel = channel, "Subscription closed");
            }
            Err(e) if e.is_retryable() => {
                warn!(channel = channel, error = %e, "Subscribe failed");
            }
            Err(e) => {
                error!(channel = channel, error = %e, "Subscribe failed permanently");
                return Err(e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

async fn consume(
    mut subscription: Subscription,
    cancel: &CancellationToken,
    handler: &dyn MessageHandler,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = subscription.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = handler.handle_message(message) => {}
        }
    }
}
