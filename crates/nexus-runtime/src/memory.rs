//! In-process runtime
//!
//! Tracks residency without touching a GPU. Used for dry runs and tests.

use async_trait::async_trait;
use nexus_core::{NexusResult, ResidentModel};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::InferenceRuntime;

/// A residency change applied to the memory runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    Load { model: String, retention_secs: u64 },
    Unload { model: String },
}

/// Runtime that keeps its resident set in memory
#[derive(Default)]
pub struct MemoryRuntime {
    resident: RwLock<Vec<ResidentModel>>,
    ops: RwLock<Vec<RuntimeOp>>,
}

impl MemoryRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runtime with the given models already resident
    pub fn with_resident<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resident: RwLock::new(names.into_iter().map(ResidentModel::named).collect()),
            ops: RwLock::new(Vec::new()),
        }
    }

    /// Names currently resident
    pub async fn resident_names(&self) -> Vec<String> {
        self.resident
            .read()
            .await
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    /// Every load and unload applied so far, oldest first
    pub async fn operations(&self) -> Vec<RuntimeOp> {
        self.ops.read().await.clone()
    }
}

#[async_trait]
impl InferenceRuntime for MemoryRuntime {
    async fn list_resident(&self) -> NexusResult<Vec<ResidentModel>> {
        Ok(self.resident.read().await.clone())
    }

    async fn load(&self, model: &str, retention: Duration) -> NexusResult<()> {
        {
            let mut resident = self.resident.write().await;
            if !resident.iter().any(|m| m.name == model) {
                resident.push(ResidentModel::named(model));
            }
        }
        self.ops.write().await.push(RuntimeOp::Load {
            model: model.to_string(),
            retention_secs: retention.as_secs(),
        });
        debug!(model = model, "Loaded model (memory runtime)");
        Ok(())
    }

    async fn unload(&self, model: &str) -> NexusResult<()> {
        self.resident.write().await.retain(|m| m.name != model);
        self.ops.write().await.push(RuntimeOp::Unload {
            model: model.to_string(),
        });
        debug!(model = model, "Unloaded model (memory runtime)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
