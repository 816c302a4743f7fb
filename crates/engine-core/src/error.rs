use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode or decode a state record: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Run '{0}' does not exist")]
    RunNotFound(String),

    #[error("Run '{0}' already exists")]
    RunExists(String),

    #[error("Invalid run id '{0}'")]
    InvalidRunId(String),

    #[error("Run '{run_id}' is on execution {current}, not {expected}")]
    ExecutionMismatch {
        run_id: String,
        expected: u64,
        current: u64,
    },

    #[error("Run '{run_id}' is {status}: {reason}")]
    InvalidStatus {
        run_id: String,
        status: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Run '{0}' does not exist")]
    RunNotFound(String),

    #[error("Failed to load run state: {0}")]
    Load(#[from] StateStoreError),
}
