//! Error types for nexus

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nexus
#[derive(Error, Debug)]
pub enum NexusError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inference runtime unreachable or returned an error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Task bus error (connection, listen, notify)
    #[error("Bus error: {0}")]
    Bus(String),

    /// Payload exceeds the broadcast size cap
    #[error("Payload on channel '{channel}' is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        channel: String,
        size: usize,
        limit: usize,
    },

    /// Channel name is not a valid identifier
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    /// A singleton loop is already active
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// Path does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The external executor failed
    #[error("Executor error: {0}")]
    Executor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Transport-level failures are retryable. Bad configuration, invalid
    /// channel names and oversized payloads fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NexusError::Runtime(_)
                | NexusError::Bus(_)
                | NexusError::Executor(_)
                | NexusError::Io(_)
        )
    }
}

/// Result type for nexus operations
pub type NexusResult<T> = Result<T, NexusError>;

impl From<serde_json::Error> for NexusError {
    fn from(err: serde_json::Error) -> Self {
        NexusError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for NexusError {
    fn from(err: toml::de::Error) -> Self {
        NexusError::Config(format!("Failed to parse config: {}", err))
    }
}
