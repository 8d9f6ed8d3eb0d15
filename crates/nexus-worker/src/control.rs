//! Control loop: apply operator commands to the daemon's arbiter

use async_trait::async_trait;
use nexus_arbiter::{Arbiter, ControlReply, ControlRequest};
use nexus_bus::{publish_json, TaskBus};
use nexus_core::{BusConfig, Message, NexusResult, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::listener::{listen, MessageHandler};

/// Serves `ControlRequest`s from the control channel.
///
/// Commands run on the same `Arbiter` the worker admits tasks through, so a
/// clear or unload waits for any load already in progress.
pub struct ControlService {
    arbiter: Arc<Arbiter>,
    bus: Arc<dyn TaskBus>,
    control_channel: String,
    reply_channel: String,
    resubscribe_backoff: Duration,
}

impl ControlService {
    pub fn new(
        arbiter: Arc<Arbiter>,
        bus: Arc<dyn TaskBus>,
        bus_config: &BusConfig,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            arbiter,
            bus,
            control_channel: bus_config.control_channel.clone(),
            reply_channel: bus_config.control_reply_channel.clone(),
            resubscribe_backoff: Duration::from_secs(config.resubscribe_backoff_secs),
        }
    }

    pub fn spawn(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<NexusResult<()>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run(cancel).await })
    }

    /// Run until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> NexusResult<()> {
        listen(
            self.bus.as_ref(),
            &self.control_channel,
            self.resubscribe_backoff,
            cancel,
            self,
        )
        .await?;
        info!("Control service stopped");
        Ok(())
    }

    /// Apply one command and publish the reply
    pub async fn handle(&self, message: &Message) -> Option<ControlReply> {
        let request: ControlRequest = match serde_json::from_value(message.payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed control request");
                return None;
            }
        };

        let reply = self.arbiter.apply(request).await;
        if let Err(e) = publish_json(self.bus.as_ref(), &self.reply_channel, &reply).await {
            error!(request_id = %reply.id, error = %e, "Failed to publish control reply");
        }
        Some(reply)
    }
}

#[async_trait]
impl MessageHandler for ControlService {
    async fn handle_message(&self, message: Message) {
        self.handle(&message).await;
    }
}
