//! Task failure taxonomy
//!
//! Every failure a turn can produce maps to exactly one variant here, and each
//! variant has a fixed retryability. The orchestrator consults
//! [`TaskError::is_retryable`] to decide between re-pushing a continuation and
//! ending the run.

use ratchet_provider::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by tool failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming failure detail
#[derive(Error, Debug)]
pub enum StreamFailure {
    /// Transport or decode error on a single chunk
    #[error("stream chunk error: {0}")]
    Chunk(String),

    /// Accumulated output passed the hard ceiling
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task aborted")]
    TaskAborted,

    #[error("consecutive mistake limit ({limit}) reached")]
    ConsecutiveMistakeLimit { limit: u32 },

    #[error("api request timed out after {0:?}")]
    ApiTimeout(Duration),

    #[error("api request failed: {0}")]
    ApiRequestFailed(#[from] ProviderError),

    #[error("no response from api")]
    NoApiResponse,

    #[error("model response contained no tool use")]
    NoToolsUsed,

    #[error("streaming failed: {0}")]
    StreamingFailed(#[from] StreamFailure),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool '{name}' failed: {source}")]
    ToolExecution {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("tool '{name}' timed out after {timeout:?}")]
    ToolTimeout { name: String, timeout: Duration },

    #[error("retry budget exhausted after {} errors", errors.len())]
    MaxRetryExceeded { errors: Vec<TaskError> },
}

pub type Result<T> = std::result::Result<T, TaskError>;

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::TaskAborted
            | TaskError::ConsecutiveMistakeLimit { .. }
            | TaskError::MaxRetryExceeded { .. } => false,
            TaskError::StreamingFailed(StreamFailure::MessageTooLarge { .. }) => false,
            TaskError::StreamingFailed(StreamFailure::Chunk(_)) => true,
            TaskError::ApiTimeout(_)
            | TaskError::ApiRequestFailed(_)
            | TaskError::NoApiResponse
            | TaskError::NoToolsUsed
            | TaskError::ToolNotFound(_)
            | TaskError::ToolExecution { .. }
            | TaskError::ToolTimeout { .. } => true,
        }
    }

    /// Short stable name, used in logs and usage stats
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::TaskAborted => "task_aborted",
            TaskError::ConsecutiveMistakeLimit { .. } => "consecutive_mistake_limit",
            TaskError::ApiTimeout(_) => "api_timeout",
            TaskError::ApiRequestFailed(_) => "api_request_failed",
            TaskError::NoApiResponse => "no_api_response",
            TaskError::NoToolsUsed => "no_tools_used",
            TaskError::StreamingFailed(_) => "streaming_failed",
            TaskError::ToolNotFound(_) => "tool_not_found",
            TaskError::ToolExecution { .. } => "tool_execution",
            TaskError::ToolTimeout { .. } => "tool_timeout",
            TaskError::MaxRetryExceeded { .. } => "max_retry_exceeded",
        }
    }

    pub(crate) fn tool_execution(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TaskError::ToolExecution {
            name: name.into(),
            source: source.into(),
        }
    }
}
