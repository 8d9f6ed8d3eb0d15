//! nexus-arbiter: GPU-memory arbiter
//!
//! This crate decides which models occupy GPU memory:
//! - Task classification into heavy and light tiers
//! - Residency snapshots and keep-list eviction
//! - Admission for tasks and generation jobs
//! - Inactivity-driven sentry mode
//! - Operator commands applied to the running arbiter

pub mod arbiter;
pub mod classifier;
pub mod clock;
pub mod control;
pub mod monitor;
pub mod residency;

pub use arbiter::{Arbiter, ArbiterStatus};
pub use classifier::{KeywordClassifier, TaskClassifier, DEFAULT_HEAVY_KEYWORDS};
pub use control::{ControlCommand, ControlReply, ControlRequest};
pub use residency::ResidencySet;
