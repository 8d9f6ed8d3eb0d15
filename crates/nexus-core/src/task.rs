//! Task and bus message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier used when a task arrives without one
pub const UNKNOWN_TASK_ID: &str = "unknown";

/// A notification delivered on a bus channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Channel the message was published on
    pub channel: String,
    /// Decoded JSON payload
    pub payload: serde_json::Value,
}

impl Message {
    /// Create a new message
    pub fn new(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

/// Task published on the task channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Correlation id, echoed in the result
    #[serde(default = "unknown_id")]
    pub id: String,
    /// Task text; messages without it are ignored
    #[serde(default)]
    pub task: Option<String>,
}

fn unknown_id() -> String {
    UNKNOWN_TASK_ID.to_string()
}

impl TaskRequest {
    /// Create a new task request
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: Some(task.into()),
        }
    }

    /// Decode a task from a bus payload.
    ///
    /// Payloads that are not objects decode to a request without text.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_else(|_| Self {
            id: unknown_id(),
            task: None,
        })
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result published on the result channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Successful result
    pub fn success(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Success,
            result: Some(result.into()),
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    /// Failed result
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
        }
    }

    /// Whether the task succeeded
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
