use engine_core::{
    error::{ProgressError, StateStoreError},
    retry::RetryDisposition,
    state::models::RunStatus,
};
use std::time::Duration;
use thiserror::Error;

/// Common error type for all actors in the host.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Actor internal error: {0}")]
    Internal(String),
}

/// Failure of one activity attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    NonRetryable(String),

    #[error("attempt exceeded its {0:?} start-to-close timeout")]
    Timeout(Duration),
}

impl ActivityError {
    pub fn retryable(err: impl ToString) -> Self {
        ActivityError::Retryable(err.to_string())
    }

    pub fn non_retryable(err: impl ToString) -> Self {
        ActivityError::NonRetryable(err.to_string())
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            ActivityError::Retryable(_) | ActivityError::Timeout(_) => RetryDisposition::Retry,
            ActivityError::NonRetryable(_) => RetryDisposition::Stop,
        }
    }
}

/// Why a workflow execution stopped without a normal exit.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("activity '{activity}' failed after {attempts} attempt(s): {message}")]
    ActivityFailed {
        activity: String,
        message: String,
        attempts: u32,
    },

    /// Workflow logic rejected what it saw.
    #[error("{0}")]
    Application(String),

    #[error("run was cancelled")]
    Cancelled,

    /// The worker is shutting down. Not terminal: the run resumes by replay.
    #[error("worker is shutting down")]
    Interrupted,

    #[error("history does not match workflow code: {0}")]
    Nondeterminism(String),

    #[error("failed to encode or decode a payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed to size a history event: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("state store error: {0}")]
    Store(#[from] StateStoreError),
}

impl WorkflowError {
    /// Status a run takes when its execution ends with this error, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            WorkflowError::Cancelled => Some(RunStatus::Cancelled),
            WorkflowError::Interrupted | WorkflowError::Store(_) => None,
            _ => Some(RunStatus::Failed),
        }
    }
}

/// Errors surfaced by [`crate::client::Client`] and [`crate::worker::Worker`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Run '{0}' is already running")]
    AlreadyStarted(String),

    #[error("Run '{run_id}' already finished as {status}")]
    AlreadyFinished { run_id: String, status: RunStatus },

    #[error("Run '{0}' does not exist")]
    RunNotFound(String),

    #[error("Run '{run_id}' belongs to workflow '{found}', not '{expected}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        found: String,
    },

    #[error("No worker is attached to this client")]
    NoWorker,

    #[error("Failed to encode workflow input: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Control directory error: {0}")]
    Control(#[from] std::io::Error),
}
