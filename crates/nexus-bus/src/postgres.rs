//! Postgres LISTEN/NOTIFY bus
//!
//! Publishing goes through a shared pool with `pg_notify`. Each subscription
//! opens its own `PgListener` connection, held for as long as the
//! subscription lives.

use async_trait::async_trait;
use nexus_core::{BusConfig, Message, NexusError, NexusResult};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{encode_payload, validate_channel};
use crate::subscription::Subscription;
use crate::traits::TaskBus;

fn bus_error(context: &str, err: sqlx::Error) -> NexusError {
    NexusError::Bus(format!("{}: {}", context, err))
}

/// Bus over a Postgres server
pub struct PgBus {
    pool: PgPool,
    database_url: String,
    max_payload_bytes: usize,
    subscriber_buffer: usize,
}

impl PgBus {
    /// Connect the publishing pool
    pub async fn connect(config: &BusConfig) -> NexusResult<Self> {
        info!("Connecting to task bus (Postgres)");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await
            .map_err(|e| bus_error("connect", e))?;
        Ok(Self::from_pool(pool, config))
    }

    /// Use an existing pool for publishing
    pub fn from_pool(pool: PgPool, config: &BusConfig) -> Self {
        Self {
            pool,
            database_url: config.database_url.clone(),
            max_payload_bytes: config.max_payload_bytes,
            subscriber_buffer: config.subscriber_buffer.max(1),
        }
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> NexusResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| bus_error("health check", e))?;
        Ok(())
    }
}

#[async_trait]
impl TaskBus for PgBus {
    async fn publish(&self, channel: &str, message: &serde_json::Value) -> NexusResult<()> {
        validate_channel(channel)?;
        let payload = encode_payload(channel, message, self.max_payload_bytes)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| bus_error("notify", e))?;

        debug!(channel = channel, bytes = payload.len(), "Published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> NexusResult<Subscription> {
        validate_channel(channel)?;

        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|e| bus_error("listener connect", e))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| bus_error("listen", e))?;
        info!(channel = channel, "Subscribed to channel");

        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let name = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    received = listener.recv() => match received {
                        Ok(notification) => {
                            let payload = match serde_json::from_str(notification.payload()) {
                                Ok(value) => value,
                                Err(e) => {
                                    warn!(channel = %name, error = %e, "Dropping non-JSON notification");
                                    continue;
                                }
                            };
                            let message = Message::new(notification.channel(), payload);
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(channel = %name, error = %e, "Listener failed");
                            break;
                        }
                    }
                }
            }
            // Dropping the listener closes its connection
            drop(listener);
            debug!(channel = %name, "Listener connection released");
        });

        Ok(Subscription::new(channel.to_string(), rx, cancel))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
