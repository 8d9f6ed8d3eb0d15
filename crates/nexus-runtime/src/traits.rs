//! Runtime trait definitions

use async_trait::async_trait;
use nexus_core::{NexusResult, ResidentModel};
use std::time::Duration;

/// Control surface of the inference runtime that owns GPU memory
#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Models currently resident, as reported by the runtime right now
    async fn list_resident(&self) -> NexusResult<Vec<ResidentModel>>;

    /// Load a model and keep it resident for roughly `retention`.
    ///
    /// Returns once the runtime reports the model as loaded.
    async fn load(&self, model: &str, retention: Duration) -> NexusResult<()>;

    /// Ask the runtime to release a model immediately
    async fn unload(&self, model: &str) -> NexusResult<()>;

    /// Get the runtime name
    fn name(&self) -> &'static str;
}
