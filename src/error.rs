use std::time::Duration;

use crate::task::{format_duration, TaskFailure};

/// Failure of a [`Bridge::execute`](crate::bridge::Bridge::execute) call.
///
/// These are the only errors returned to callers. None of them is retried
/// by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// No agent channel was open when the task was dispatched.
    #[error("No plugin instances are currently connected. Please ensure the plugin is running and connected.")]
    NoAgentConnected,
    /// Every agent channel disappeared between the dispatch check and the send.
    #[error("All connected plugin instances appear to be disconnected. Task could not be sent.")]
    SendFailed,
    /// The agent executed the task and reported a failure.
    #[error("{0}")]
    RemoteExecutionFailed(String),
    /// No response arrived within the task's bound.
    #[error("Task {id} timed out after {}", format_duration(.duration))]
    Timeout { id: String, duration: Duration },
}

impl BridgeError {
    /// Machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NoAgentConnected => "no_agent_connected",
            BridgeError::SendFailed => "send_failed",
            BridgeError::RemoteExecutionFailed(_) => "remote_execution_failed",
            BridgeError::Timeout { .. } => "timeout",
        }
    }

    /// True for the kinds a caller should treat as "agent unreachable, try
    /// again".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BridgeError::NoAgentConnected | BridgeError::SendFailed)
    }
}

impl From<TaskFailure> for BridgeError {
    fn from(failure: TaskFailure) -> Self {
        match failure {
            TaskFailure::Remote(message) => BridgeError::RemoteExecutionFailed(message),
            TaskFailure::TimedOut { id, after } => BridgeError::Timeout { id, duration: after },
            abandoned @ TaskFailure::Abandoned(_) => {
                BridgeError::RemoteExecutionFailed(abandoned.to_string())
            }
        }
    }
}

/// Non-fatal problems with inbound agent messages. Logged and discarded;
/// never surfaced to a caller.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("no pending task with id {0}")]
    UnknownResponseId(String),
}
