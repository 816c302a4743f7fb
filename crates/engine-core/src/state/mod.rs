use crate::{
    error::StateStoreError,
    state::models::{Checkpoint, HistoryEvent, RunRecord, RunStatus},
};
use async_trait::async_trait;

pub mod models;
pub mod sled_store;

/// Durable storage behind the execution host.
///
/// Every mutation of a run names the execution it belongs to and is rejected
/// when that execution is no longer current, so a superseded execution can
/// never write over its successor.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores a new run. Fails with `RunExists` if the id is taken.
    async fn create_run(&self, record: &RunRecord) -> Result<(), StateStoreError>;

    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>, StateStoreError>;

    async fn list_runs(&self) -> Result<Vec<RunRecord>, StateStoreError>;

    /// Appends to the history of a running execution. A `CheckpointRecorded`
    /// event also advances the run's checkpoint in the same transaction.
    async fn append_history(
        &self,
        run_id: &str,
        execution_id: u64,
        event: &HistoryEvent,
    ) -> Result<(), StateStoreError>;

    async fn load_history(
        &self,
        run_id: &str,
        execution_id: u64,
    ) -> Result<Vec<HistoryEvent>, StateStoreError>;

    /// Replaces a running execution with a fresh one carrying `input` and an
    /// empty history.
    async fn continue_as_new(
        &self,
        run_id: &str,
        execution_id: u64,
        input: Vec<u8>,
    ) -> Result<RunRecord, StateStoreError>;

    /// Starts a new execution of a finished run.
    async fn restart_run(&self, run_id: &str, input: Vec<u8>) -> Result<RunRecord, StateStoreError>;

    /// Moves a running execution to a terminal status.
    async fn finish_run(
        &self,
        run_id: &str,
        execution_id: u64,
        status: RunStatus,
        failure: Option<String>,
    ) -> Result<RunRecord, StateStoreError>;

    /// Durably flags a running run for cancellation.
    async fn request_cancel(&self, run_id: &str) -> Result<RunRecord, StateStoreError>;

    async fn load_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>, StateStoreError>;
}
