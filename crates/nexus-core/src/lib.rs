//! nexus-core: Core types and traits for the nexus GPU arbiter
//!
//! This crate provides the fundamental types used throughout the nexus system:
//! - Model handles, tiers and arbitration modes
//! - Task requests, results and bus messages
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;
pub mod task;

pub use config::*;
pub use error::*;
pub use model::*;
pub use task::*;
