//! In-process bus with one unbounded queue per subscriber
//!
//! Same delivery contract as the Postgres bus, without a database. Publishing
//! pushes into every live subscriber queue without waiting, so a slow
//! subscriber builds a backlog instead of losing messages.

use async_trait::async_trait;
use nexus_core::{BusConfig, Message, NexusResult};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{encode_payload, validate_channel};
use crate::subscription::Subscription;
use crate::traits::TaskBus;

/// In-process fan-out bus
pub struct MemoryBus {
    channels: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
    max_payload_bytes: usize,
    subscriber_buffer: usize,
}

impl MemoryBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            max_payload_bytes: config.max_payload_bytes,
            subscriber_buffer: config.subscriber_buffer.max(1),
        }
    }

    /// Number of live listeners on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

#[async_trait]
impl TaskBus for MemoryBus {
    async fn publish(&self, channel: &str, message: &serde_json::Value) -> NexusResult<()> {
        validate_channel(channel)?;
        encode_payload(channel, message, self.max_payload_bytes)?;

        let mut channels = self.channels.write().await;
        if let Some(senders) = channels.get_mut(channel) {
            let message = Message::new(channel, message.clone());
            // Closed queues belong to dropped subscriptions
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> NexusResult<Subscription> {
        validate_channel(channel)?;

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(queue_tx);

        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let name = channel.to_string();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    message = queue_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    sent = tx.send(message) => if sent.is_err() {
                        break;
                    },
                }
            }
            debug!(channel = %name, "Memory subscription closed");
        });

        debug!(channel = channel, "Subscribed (memory bus)");
        Ok(Subscription::new(channel.to_string(), rx, cancel))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use nexus_core::NexusError;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_subscriber_gets_every_message() {
        const SUBSCRIBERS: usize = 5;
        const MESSAGES: usize = 20;

        let bus = MemoryBus::default();
        let mut subs = Vec::new();
        for _ in 0..SUBSCRIBERS {
            subs.push(bus.subscribe("concurrency_test").await.unwrap());
        }

        for i in 0..MESSAGES {
            bus.publish("concurrency_test", &json!({"seq": i}))
                .await
                .unwrap();
        }

        for sub in subs {
            let received: Vec<Message> = sub.take(MESSAGES).collect().await;
            assert_eq!(received.len(), MESSAGES);
            for (i, message) in received.iter().enumerate() {
                assert_eq!(message.payload["seq"], i);
                assert_eq!(message.channel, "concurrency_test");
            }
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_nothing() {
        const MESSAGES: usize = 2000;

        let bus = MemoryBus::new(&BusConfig {
            subscriber_buffer: 4,
            ..BusConfig::default()
        });
        let mut sub = bus.subscribe("backlog_test").await.unwrap();

        for i in 0..MESSAGES {
            bus.publish("backlog_test", &json!({"seq": i}))
                .await
                .unwrap();
        }

        for i in 0..MESSAGES {
            let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for message")
                .expect("subscription closed");
            assert_eq!(message.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscriber() {
        let bus = MemoryBus::default();
        let mut early = bus.subscribe("swarm_tasks").await.unwrap();
        bus.publish("swarm_tasks", &json!({"n": 1})).await.unwrap();

        let mut late = bus.subscribe("swarm_tasks").await.unwrap();
        bus.publish("swarm_tasks", &json!({"n": 2})).await.unwrap();

        assert_eq!(early.recv().await.unwrap().payload["n"], 1);
        assert_eq!(early.recv().await.unwrap().payload["n"], 2);
        assert_eq!(late.recv().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = MemoryBus::default();
        let mut results = bus.subscribe("swarm_results").await.unwrap();

        bus.publish("swarm_tasks", &json!({"n": 1})).await.unwrap();
        bus.publish("swarm_results", &json!({"n": 2})).await.unwrap();

        assert_eq!(results.recv().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::default();
        assert!(bus.publish("orphan", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe("swarm_results").await.unwrap();

        let err = bus
            .publish("swarm_results", &json!({"result": "x".repeat(9000)}))
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::PayloadTooLarge { .. }));

        bus.publish("swarm_results", &json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().payload["ok"], true);
    }

    #[tokio::test]
    async fn test_invalid_channel_rejected() {
        let bus = MemoryBus::default();
        assert!(matches!(
            bus.subscribe("bad-name").await.unwrap_err(),
            NexusError::InvalidChannel(_)
        ));
        assert!(bus.publish("bad name", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases_listener() {
        let bus = MemoryBus::default();
        let sub = bus.subscribe("swarm_tasks").await.unwrap();
        assert_eq!(bus.subscriber_count("swarm_tasks").await, 1);

        drop(sub);
        for _ in 0..50 {
            if bus.subscriber_count("swarm_tasks").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.subscriber_count("swarm_tasks").await, 0);
    }
}
