//! nexus-runtime: Inference runtime control layer
//!
//! This crate provides the runtimes the arbiter drives to change GPU residency:
//! - Ollama control API runtime
//! - In-process memory runtime for dry runs

pub mod memory;
pub mod ollama;
pub mod traits;

pub use memory::{MemoryRuntime, RuntimeOp};
pub use ollama::OllamaRuntime;
pub use traits::InferenceRuntime;
