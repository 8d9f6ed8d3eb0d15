//! Task execution behind the arbiter

use async_trait::async_trait;
use nexus_arbiter::Arbiter;
use nexus_core::{ModelHandle, NexusError, NexusResult};
use nexus_runtime::OllamaRuntime;
use std::sync::Arc;
use tracing::info;

/// Reply used when a run produced no text
pub const NO_RESPONSE: &str = "The swarm is standing by. (No response captured)";

/// Runs a task and returns its text result
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &str) -> NexusResult<String>;
}

/// Runs a task on a specific, already admitted model
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn run(&self, model: &ModelHandle, task: &str) -> NexusResult<String>;
}

/// Executor that admits the right model before running the task.
///
/// Activity is signalled again after the run so the host does not
/// hibernate while the caller is still reading the answer.
pub struct ArbitratedExecutor {
    arbiter: Arc<Arbiter>,
    backend: Arc<dyn ModelBackend>,
}

impl ArbitratedExecutor {
    pub fn new(arbiter: Arc<Arbiter>, backend: Arc<dyn ModelBackend>) -> Self {
        Self { arbiter, backend }
    }
}

#[async_trait]
impl Executor for ArbitratedExecutor {
    async fn execute(&self, task: &str) -> NexusResult<String> {
        let model = self.arbiter.prepare_for_task(task).await;
        info!(model = %model.name, tier = %model.tier, "Running task");

        let output = self.backend.run(&model, task).await;
        self.arbiter.update_activity();

        let text = output?;
        let text = text.trim();
        if text.is_empty() {
            Ok(NO_RESPONSE.to_string())
        } else {
            Ok(text.to_string())
        }
    }
}

/// Backend that sends the task as a prompt to the admitted Ollama model
pub struct OllamaBackend {
    runtime: Arc<OllamaRuntime>,
}

impl OllamaBackend {
    pub fn new(runtime: Arc<OllamaRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn run(&self, model: &ModelHandle, task: &str) -> NexusResult<String> {
        self.runtime
            .generate(&model.name, task, Some(model.retention))
            .await
            .map_err(|e| NexusError::Executor(e.to_string()))
    }
}

/// Dry-run backend: answers with the model name and the task
pub struct EchoBackend;

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn run(&self, model: &ModelHandle, task: &str) -> NexusResult<String> {
        Ok(format!("[{}] {}", model.name, task))
    }
}
