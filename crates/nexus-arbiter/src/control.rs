//! Operator commands for a running arbiter
//!
//! Residency changes requested from outside the daemon are sent as
//! `ControlRequest`s and applied to the daemon's own arbiter, so they share
//! its admission lock and mode.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::arbiter::{Arbiter, ArbiterStatus};

/// Residency command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Report the current status
    Status,
    /// Unload everything not matching a keep entry
    Unload {
        #[serde(default)]
        keep: Vec<String>,
    },
    /// Hibernate down to the sentinel
    Sentry,
    /// Free all GPU memory for a generation job
    Clear,
}

/// Command with a correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: String,
    pub command: ControlCommand,
}

impl ControlRequest {
    pub fn new(id: impl Into<String>, command: ControlCommand) -> Self {
        Self {
            id: id.into(),
            command,
        }
    }
}

/// Answer to a `ControlRequest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlReply {
    pub id: String,
    /// Models unloaded by the command
    #[serde(default)]
    pub evicted: Vec<String>,
    /// Status after the command was applied
    pub status: ArbiterStatus,
}

impl Arbiter {
    /// Apply an operator command and report the resulting state
    pub async fn apply(&self, request: ControlRequest) -> ControlReply {
        info!(request_id = %request.id, command = ?request.command, "Control command");

        let evicted = match request.command {
            ControlCommand::Status => Vec::new(),
            ControlCommand::Unload { keep } => self.unload_all_except(&keep).await,
            ControlCommand::Sentry => self.enter_sentry_mode().await,
            ControlCommand::Clear => self.prepare_for_generation().await,
        };

        ControlReply {
            id: request.id,
            evicted,
            status: self.status().await,
        }
    }
}
