//! Worker loop: consume tasks from the bus, publish results

use async_trait::async_trait;
use nexus_bus::{publish_json, TaskBus};
use nexus_core::{
    BusConfig, Message, NexusError, NexusResult, TaskRequest, TaskResult, WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::listener::{listen, MessageHandler};

/// Long-running consumer of the task channel.
///
/// A failing task becomes a FAILED result; it never stops the loop. A closed
/// subscription is re-established after a backoff. Only cancellation or a
/// fatal subscribe error ends `run`.
pub struct SwarmWorker {
    bus: Arc<dyn TaskBus>,
    executor: Arc<dyn Executor>,
    task_channel: String,
    result_channel: String,
    resubscribe_backoff: Duration,
}

impl SwarmWorker {
    pub fn new(
        bus: Arc<dyn TaskBus>,
        executor: Arc<dyn Executor>,
        bus_config: &BusConfig,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            bus,
            executor,
            task_channel: bus_config.task_channel.clone(),
            result_channel: bus_config.result_channel.clone(),
            resubscribe_backoff: Duration::from_secs(config.resubscribe_backoff_secs),
        }
    }

    /// Spawn the loop on the runtime
    pub fn spawn(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<NexusResult<()>> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run(cancel).await })
    }

    /// Run until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> NexusResult<()> {
        info!(channel = %self.task_channel, bus = self.bus.name(), "Swarm worker starting");
        listen(
            self.bus.as_ref(),
            &self.task_channel,
            self.resubscribe_backoff,
            cancel,
            self,
        )
        .await?;
        info!("Swarm worker stopped");
        Ok(())
    }

    /// Process one bus message and publish its result.
    ///
    /// Returns the published result, or `None` when the message carried no
    /// task text.
    pub async fn handle(&self, message: &Message) -> Option<TaskResult> {
        let request = TaskRequest::from_payload(&message.payload);
        let Some(task) = request.task.as_deref() else {
            debug!(task_id = %request.id, "Skipping message without task text");
            return None;
        };

        info!(task_id = %request.id, "Received task");
        let result = match self.executor.execute(task).await {
            Ok(output) => {
                info!(task_id = %request.id, "Task completed");
                TaskResult::success(&request.id, output)
            }
            Err(e) => {
                error!(task_id = %request.id, error = %e, "Task failed");
                TaskResult::failed(&request.id, e.to_string())
            }
        };

        Some(self.publish_result(result).await)
    }

    async fn publish_result(&self, result: TaskResult) -> TaskResult {
        match publish_json(self.bus.as_ref(), &self.result_channel, &result).await {
            Ok(()) => result,
            Err(NexusError::PayloadTooLarge { size, limit, .. }) => {
                warn!(task_id = %result.id, size, limit, "Result exceeds payload cap");
                let fallback = TaskResult::failed(
                    &result.id,
                    format!("Result too large for the bus: {} bytes, limit {}", size, limit),
                );
                if let Err(e) =
                    publish_json(self.bus.as_ref(), &self.result_channel, &fallback).await
                {
                    error!(task_id = %fallback.id, error = %e, "Failed to publish result");
                }
                fallback
            }
            Err(e) => {
                error!(task_id = %result.id, error = %e, "Failed to publish result");
                result
            }
        }
    }
}

#[async_trait]
impl MessageHandler for SwarmWorker {
    async fn handle_message(&self, message: Message) {
        self.handle(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_bus::{MemoryBus, Subscription};
    use nexus_core::TaskStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on "fail", answers oversized on "huge", echoes otherwise
    struct ScriptedExecutor {
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, task: &str) -> NexusResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match task {
                "fail" => Err(NexusError::Executor("agent crashed".to_string())),
                "huge" => Ok("x".repeat(10_000)),
                other => Ok(format!("done: {}", other)),
            }
        }
    }

    fn worker(bus: Arc<MemoryBus>, executor: Arc<ScriptedExecutor>) -> Arc<SwarmWorker> {
        Arc::new(SwarmWorker::new(
            bus,
            executor,
            &BusConfig::default(),
            &WorkerConfig::default(),
        ))
    }

    async fn wait_for_listener(bus: &MemoryBus, channel: &str) {
        for _ in 0..100 {
            if bus.subscriber_count(channel).await > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker never subscribed");
    }

    async fn next_result(subscription: &mut Subscription) -> TaskResult {
        let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for result")
            .expect("result stream closed");
        serde_json::from_value(message.payload).unwrap()
    }

    #[tokio::test]
    async fn test_handle_success_and_failure() {
        let bus = Arc::new(MemoryBus::default());
        let worker = worker(bus, Arc::new(ScriptedExecutor::new()));

        let ok = worker
            .handle(&Message::new("swarm_tasks", json!({"id": "a", "task": "hello"})))
            .await
            .unwrap();
        assert_eq!(ok.status, TaskStatus::Success);
        assert_eq!(ok.result.as_deref(), Some("done: hello"));

        let failed = worker
            .handle(&Message::new("swarm_tasks", json!({"id": "b", "task": "fail"})))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().contains("agent crashed"));
    }

    #[tokio::test]
    async fn test_message_without_task_is_skipped() {
        let bus = Arc::new(MemoryBus::default());
        let executor = Arc::new(ScriptedExecutor::new());
        let worker = worker(bus, executor.clone());

        let skipped = worker
            .handle(&Message::new("swarm_tasks", json!({"id": "a"})))
            .await;
        assert!(skipped.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_result_becomes_failure() {
        let bus = Arc::new(MemoryBus::default());
        let mut results = bus.subscribe("swarm_results").await.unwrap();
        let worker = worker(bus, Arc::new(ScriptedExecutor::new()));

        let published = worker
            .handle(&Message::new("swarm_tasks", json!({"id": "big", "task": "huge"})))
            .await
            .unwrap();
        assert_eq!(published.status, TaskStatus::Failed);

        let received = next_result(&mut results).await;
        assert_eq!(received.id, "big");
        assert_eq!(received.status, TaskStatus::Failed);
        assert!(received.error.unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn test_loop_continues_after_failure() {
        let bus = Arc::new(MemoryBus::default());
        let mut results = bus.subscribe("swarm_results").await.unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let worker = worker(bus.clone(), executor.clone());

        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());
        wait_for_listener(&bus, "swarm_tasks").await;

        bus.publish("swarm_tasks", &json!({"id": "1", "task": "fail"}))
            .await
            .unwrap();
        bus.publish("swarm_tasks", &json!({"task": "second"}))
            .await
            .unwrap();

        let first = next_result(&mut results).await;
        assert_eq!(first.id, "1");
        assert_eq!(first.status, TaskStatus::Failed);

        let second = next_result(&mut results).await;
        assert_eq!(second.id, "unknown");
        assert_eq!(second.result.as_deref(), Some("done: second"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_channel_is_fatal() {
        let bus = Arc::new(MemoryBus::default());
        let config = BusConfig {
            task_channel: "not-valid".to_string(),
            ..BusConfig::default()
        };
        let worker = SwarmWorker::new(
            bus,
            Arc::new(ScriptedExecutor::new()),
            &config,
            &WorkerConfig::default(),
        );

        let err = worker.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NexusError::InvalidChannel(_)));
    }
}
