//! Model, tier and arbitration mode definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert a gigabyte figure from configuration into bytes
pub fn gb_to_bytes(gb: f64) -> u64 {
    if gb <= 0.0 {
        return 0;
    }
    (gb * BYTES_PER_GB) as u64
}

/// Model requirement of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Needs the primary (8B+) model
    Heavy,
    /// The sentinel model is enough
    Light,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Heavy => write!(f, "heavy"),
            Tier::Light => write!(f, "light"),
        }
    }
}

/// A model the arbiter can place on the GPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// Model name including tag (e.g., "qwen3:8b")
    pub name: String,
    /// Tier this model serves
    pub tier: Tier,
    /// Estimated GPU memory in bytes
    pub estimated_memory: u64,
    /// Advisory retention passed to the runtime on load
    pub retention: Duration,
}

/// A model currently loaded by the inference runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentModel {
    /// Name as reported by the runtime
    pub name: String,
    /// Memory the runtime reports for the model, if any
    pub size_vram: Option<u64>,
}

impl ResidentModel {
    /// Create a resident model entry without a size report
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_vram: None,
        }
    }
}

/// Power state of the arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Normal operation, any model may be resident
    Active,
    /// Hibernation, only the sentinel is resident
    Sentry,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Active => write!(f, "Active"),
            Mode::Sentry => write!(f, "Sentry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gb_to_bytes() {
        assert_eq!(gb_to_bytes(1.0), 1024 * 1024 * 1024);
        assert_eq!(gb_to_bytes(0.0), 0);
        assert_eq!(gb_to_bytes(-3.0), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Tier::Heavy.to_string(), "heavy");
        assert_eq!(Mode::Sentry.to_string(), "Sentry");
    }
}
