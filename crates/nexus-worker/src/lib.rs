//! nexus-worker: Task consumers
//!
//! This crate provides:
//! - The executor seam and an executor that admits models through the arbiter
//! - The swarm worker loop (task channel in, result channel out)
//! - The reflection loop that works through a checklist file
//! - The control service that applies operator commands to the arbiter

pub mod checklist;
pub mod control;
pub mod executor;
pub mod listener;
pub mod reflection;
pub mod worker;

pub use checklist::ChecklistParser;
pub use control::ControlService;
pub use executor::{
    ArbitratedExecutor, EchoBackend, Executor, ModelBackend, OllamaBackend, NO_RESPONSE,
};
pub use listener::{listen, MessageHandler};
pub use reflection::{dispatch_prompt, ReflectionLoop, ReflectionState, ReflectionStatus};
pub use worker::SwarmWorker;
