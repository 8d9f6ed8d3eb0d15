//! CLI commands implementation
//!
//! Residency commands are sent to the running daemon over the control
//! channel, so they go through the same arbiter as the worker.

use anyhow::{Context, Result};
use futures::StreamExt;
use nexus_arbiter::{ControlCommand, ControlReply, ControlRequest, KeywordClassifier};
use nexus_bus::{publish_json, PgBus, Subscription, TaskBus};
use nexus_core::{BusKind, NexusConfig, TaskRequest, TaskResult, Tier};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Slack on top of the runtime timeouts when waiting for a control reply
const CONTROL_REPLY_GRACE_SECS: u64 = 10;

fn gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

async fn connect_bus(config: &NexusConfig) -> Result<PgBus> {
    if config.bus.kind == BusKind::Memory {
        anyhow::bail!(
            "bus.kind is \"memory\", which only the daemon itself can reach; \
             configure the postgres bus to use the CLI"
        );
    }
    PgBus::connect(&config.bus)
        .await
        .context("Failed to connect to the task bus")
}

/// Reply that names the request it answers
trait Reply: DeserializeOwned {
    fn request_id(&self) -> &str;
}

impl Reply for TaskResult {
    fn request_id(&self) -> &str {
        &self.id
    }
}

impl Reply for ControlReply {
    fn request_id(&self) -> &str {
        &self.id
    }
}

/// Read `subscription` until the reply to request `id` arrives
async fn wait_for_reply<T: Reply>(
    subscription: &mut Subscription,
    id: &str,
    timeout: Duration,
) -> Result<T> {
    let wait = async {
        while let Some(message) = subscription.next().await {
            match serde_json::from_value::<T>(message.payload) {
                Ok(reply) if reply.request_id() == id => return Some(reply),
                Ok(other) => debug!(id = other.request_id(), "Ignoring reply for another request"),
                Err(e) => debug!(error = %e, "Ignoring malformed reply"),
            }
        }
        None
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => anyhow::bail!("{} closed before {} was answered", subscription.channel(), id),
        Err(_) => anyhow::bail!("No reply for {} after {}s", id, timeout.as_secs()),
    }
}

/// Send a command to the daemon's arbiter and wait for its reply
async fn send_control(config: &NexusConfig, command: ControlCommand) -> Result<ControlReply> {
    let bus = connect_bus(config).await?;

    // Listen before publishing so a fast daemon cannot answer unseen
    let mut replies = bus.subscribe(&config.bus.control_reply_channel).await?;

    let request = ControlRequest::new(Uuid::new_v4().to_string(), command);
    publish_json(&bus, &config.bus.control_channel, &request).await?;
    debug!(request_id = %request.id, "Control request sent");

    // A clear or unload may queue behind a model load already in progress
    let timeout = Duration::from_secs(
        config.runtime.load_timeout_secs
            + config.runtime.unload_timeout_secs
            + CONTROL_REPLY_GRACE_SECS,
    );
    wait_for_reply::<ControlReply>(&mut replies, &request.id, timeout)
        .await
        .context("Is nexusd running?")
}

/// Publish a task and wait for the matching result
pub async fn submit(config: &NexusConfig, task: String, timeout: u64) -> Result<()> {
    let bus = connect_bus(config).await?;

    // Listen before publishing so a fast worker cannot answer unseen
    let mut results = bus.subscribe(&config.bus.result_channel).await?;

    let request = TaskRequest::new(Uuid::new_v4().to_string(), task);
    publish_json(&bus, &config.bus.task_channel, &request).await?;
    println!("Task {} submitted, waiting for result...", request.id);

    let result: TaskResult =
        wait_for_reply(&mut results, &request.id, Duration::from_secs(timeout)).await?;

    if result.is_success() {
        println!("Status: {}", result.status);
        println!();
        println!("{}", result.result.unwrap_or_default());
    } else {
        eprintln!("Status: {}", result.status);
        eprintln!("Error: {}", result.error.unwrap_or_default());
    }

    Ok(())
}

/// Show resident models and estimated memory use
pub async fn ps(config: &NexusConfig) -> Result<()> {
    let status = send_control(config, ControlCommand::Status).await?.status;

    if status.resident.is_empty() {
        println!("No models resident");
    } else {
        println!("{:<30} {:<8} {:<10}", "MODEL", "TIER", "EST. GB");
        println!("{}", "-".repeat(50));
        for name in &status.resident {
            let handle = config.arbiter.handle_for(name, Tier::Light);
            println!(
                "{:<30} {:<8} {:<10.1}",
                name,
                handle.tier,
                gb(handle.estimated_memory)
            );
        }
    }

    println!();
    println!(
        "Memory: {:.1}/{:.1} GB estimated",
        gb(status.estimated_resident_bytes),
        gb(status.memory_budget_bytes)
    );
    println!("Mode: {}  Idle: {}s", status.mode, status.idle_secs);
    println!(
        "Primary: {}  Sentinel: {}",
        status.primary_model, status.sentinel_model
    );

    Ok(())
}

/// Unload everything except the kept models
pub async fn unload(config: &NexusConfig, keep: Vec<String>) -> Result<()> {
    let reply = send_control(config, ControlCommand::Unload { keep }).await?;

    if reply.evicted.is_empty() {
        println!("Nothing to unload");
    } else {
        for name in reply.evicted {
            println!("Unloaded {}", name);
        }
    }

    Ok(())
}

/// Hibernate down to the sentinel
pub async fn sentry(config: &NexusConfig) -> Result<()> {
    let reply = send_control(config, ControlCommand::Sentry).await?;
    println!(
        "Sentry mode: only {} is resident ({} model(s) unloaded)",
        reply.status.sentinel_model,
        reply.evicted.len()
    );
    Ok(())
}

/// Free all GPU memory
pub async fn clear(config: &NexusConfig) -> Result<()> {
    let reply = send_control(config, ControlCommand::Clear).await?;
    println!("GPU cleared ({} model(s) unloaded)", reply.evicted.len());
    Ok(())
}

/// Print the tier a task would get
pub fn classify(config: &NexusConfig, text: &str) {
    let classifier =
        KeywordClassifier::default().extend(config.arbiter.extra_heavy_keywords.iter());

    match classifier.matched_keyword(text) {
        Some(keyword) => println!(
            "heavy (matched '{}') -> {}",
            keyword, config.arbiter.primary_model
        ),
        None => println!("light -> {}", config.arbiter.sentinel_model),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_bus::MemoryBus;
    use nexus_core::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_wait_for_reply_skips_other_requests() {
        let bus = MemoryBus::default();
        let mut results = bus.subscribe("swarm_results").await.unwrap();

        bus.publish("swarm_results", &json!({"garbage": true}))
            .await
            .unwrap();
        publish_json(&bus, "swarm_results", &TaskResult::success("other", "no"))
            .await
            .unwrap();
        publish_json(&bus, "swarm_results", &TaskResult::success("mine", "yes"))
            .await
            .unwrap();

        let result: TaskResult = wait_for_reply(&mut results, "mine", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.result.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn test_wait_for_reply_times_out() {
        let bus = MemoryBus::default();
        let mut replies = bus.subscribe("nexus_control_replies").await.unwrap();

        let err = wait_for_reply::<ControlReply>(&mut replies, "c-1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No reply for c-1"));
    }

    #[tokio::test]
    async fn test_memory_bus_rejected() {
        let mut config = NexusConfig::default();
        config.bus.kind = BusKind::Memory;

        let Err(err) = connect_bus(&config).await else {
            panic!("memory bus accepted by the CLI");
        };
        assert!(err.to_string().contains("memory"));
    }
}
