use std::time::Duration;

use thiserror::Error;

/// How a single HTTP exchange went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Timeouts, connection failures, 429 and 5xx answers.
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Job-scoped failures. Every variant ends the job it was raised for and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("failed to submit task (request id: {})", .request_id.as_deref().unwrap_or("unknown"))]
    Submission { request_id: Option<String> },

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("task {}: protocol error: {detail}", .task_id.as_deref().unwrap_or("-"))]
    Protocol {
        task_id: Option<String>,
        detail: String,
    },

    #[error("network error after {attempts} attempt(s): {message}")]
    Network {
        task_id: Option<String>,
        attempts: u32,
        message: String,
    },

    #[error("task {task_id} timed out after {:.1}s ({polls} polls)", .waited.as_secs_f64())]
    Timeout {
        task_id: String,
        waited: Duration,
        polls: u32,
    },

    #[error("artifact download failed ({url}): {reason}")]
    Download { url: String, reason: String },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submission { .. } => "submission",
            Self::TaskFailed { .. } => "task_failed",
            Self::Protocol { .. } => "protocol",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Download { .. } => "download",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub(crate) fn from_transport(task_id: Option<&str>, err: TransportError) -> Self {
        match err {
            TransportError::Transient(message) => Self::Network {
                task_id: task_id.map(str::to_string),
                attempts: 1,
                message,
            },
            TransportError::Rejected { status, message } => Self::Rejected { status, message },
            TransportError::Decode(detail) => Self::Protocol {
                task_id: task_id.map(str::to_string),
                detail,
            },
        }
    }
}

/// Failures of the one-shot image endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("Unauthorized: Invalid API key")]
    Unauthorized,
    #[error("API Error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Transport(TransportError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for GenerateError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected { status: 401, .. } => Self::Unauthorized,
            TransportError::Rejected { status, message } => Self::Api { status, message },
            other => Self::Transport(other),
        }
    }
}
