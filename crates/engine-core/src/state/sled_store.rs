use crate::{
    error::StateStoreError,
    state::{
        StateStore,
        models::{Checkpoint, HistoryEvent, RunRecord, RunStatus},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use sled::{
    Transactional,
    transaction::{
        ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
        TransactionResult, TransactionalTree,
    },
};
use std::path::Path;
use tracing::debug;

type TxError = ConflictableTransactionError<StateStoreError>;

/// Sled-backed state store.
///
/// Runs, history and checkpoints live in separate trees so that a history
/// append and the checkpoint it carries commit in one multi-tree transaction.
/// History keys are `run_id \0 execution_id index`, big-endian, so a prefix
/// scan returns one execution in append order.
pub struct SledStateStore {
    db: sled::Db,
    runs: sled::Tree,
    history: sled::Tree,
    checkpoints: sled::Tree,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        let runs = db.open_tree("runs")?;
        let history = db.open_tree("history")?;
        let checkpoints = db.open_tree("checkpoints")?;
        let store = Self {
            db,
            runs,
            history,
            checkpoints,
        };
        store.sweep_superseded_history()?;
        Ok(store)
    }

    /// Run ids never contain control characters, so `run_id \0` never
    /// prefixes another run's keys.
    #[inline]
    fn run_history_prefix(run_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(run_id.len() + 9);
        key.extend_from_slice(run_id.as_bytes());
        key.push(0);
        key
    }

    #[inline]
    fn history_prefix(run_id: &str, execution_id: u64) -> Vec<u8> {
        let mut key = Self::run_history_prefix(run_id);
        key.extend_from_slice(&execution_id.to_be_bytes());
        key
    }

    #[inline]
    fn history_key(run_id: &str, execution_id: u64, index: u64) -> Vec<u8> {
        let mut key = Self::history_prefix(run_id, execution_id);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    fn validate_run_id(run_id: &str) -> Result<(), StateStoreError> {
        if run_id.trim().is_empty() || run_id.chars().any(char::is_control) {
            return Err(StateStoreError::InvalidRunId(run_id.to_string()));
        }
        Ok(())
    }

    /// Loads a run inside a transaction and checks it is the running
    /// execution the caller believes it is.
    fn load_running(
        runs: &TransactionalTree,
        run_id: &str,
        execution_id: u64,
    ) -> Result<RunRecord, TxError> {
        let record: RunRecord = match runs.get(run_id.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(abort(StateStoreError::RunNotFound(run_id.to_string()))),
        };

        if record.execution_id != execution_id {
            return Err(abort(StateStoreError::ExecutionMismatch {
                run_id: run_id.to_string(),
                expected: execution_id,
                current: record.execution_id,
            }));
        }
        if record.status != RunStatus::Running {
            return Err(abort(StateStoreError::InvalidStatus {
                run_id: run_id.to_string(),
                status: record.status.to_string(),
                reason: "execution already finished".to_string(),
            }));
        }
        Ok(record)
    }

    /// Removes history of every execution of `run_id` older than `current`.
    ///
    /// The run record moves to a new execution before its old history is
    /// dropped, so history left behind by a crash in between is removed by
    /// the next purge for that run or the next open.
    fn purge_history_before(&self, run_id: &str, current: u64) -> Result<usize, StateStoreError> {
        let prefix = Self::run_history_prefix(run_id);
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.history.scan_prefix(&prefix) {
            let (key, _) = item?;
            let superseded = key
                .get(prefix.len()..prefix.len() + 8)
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .is_none_or(|exec| u64::from_be_bytes(exec) < current);
            if superseded {
                batch.remove(key);
                removed += 1;
            }
        }
        self.history.apply_batch(batch)?;
        Ok(removed)
    }

    fn sweep_superseded_history(&self) -> Result<(), StateStoreError> {
        for item in self.runs.iter() {
            let (_, bytes) = item?;
            let record: RunRecord = bincode::deserialize(&bytes)?;
            let purged = self.purge_history_before(&record.run_id, record.execution_id)?;
            if purged > 0 {
                debug!(run_id = %record.run_id, purged, "Removed leftover history");
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StateStoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn abort(err: StateStoreError) -> TxError {
    ConflictableTransactionError::Abort(err)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TxError> {
    bincode::deserialize(bytes).map_err(|e| abort(e.into()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TxError> {
    bincode::serialize(value).map_err(|e| abort(e.into()))
}

fn committed<T>(result: TransactionResult<T, StateStoreError>) -> Result<T, StateStoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StateStoreError> {
        Self::validate_run_id(&record.run_id)?;
        let bytes = bincode::serialize(record)?;

        let swapped = self.runs.compare_and_swap(
            record.run_id.as_bytes(),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        if swapped.is_err() {
            return Err(StateStoreError::RunExists(record.run_id.clone()));
        }

        self.flush().await
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>, StateStoreError> {
        match self.runs.get(run_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, StateStoreError> {
        let mut runs = Vec::new();
        for item in self.runs.iter() {
            let (_key, value) = item?;
            runs.push(bincode::deserialize(&value)?);
        }
        Ok(runs)
    }

    async fn append_history(
        &self,
        run_id: &str,
        execution_id: u64,
        event: &HistoryEvent,
    ) -> Result<(), StateStoreError> {
        let event_bytes = bincode::serialize(event)?;

        let result = (&self.runs, &self.history, &self.checkpoints).transaction(
            |(runs, history, checkpoints)| -> ConflictableTransactionResult<(), StateStoreError> {
                let mut record = Self::load_running(runs, run_id, execution_id)?;

                let key = Self::history_key(run_id, execution_id, record.history_events);
                history.insert(key, event_bytes.as_slice())?;

                if let HistoryEvent::CheckpointRecorded { cursor, rows, .. } = event {
                    let existing: Option<Checkpoint> = match checkpoints.get(run_id.as_bytes())? {
                        Some(bytes) => Some(decode(&bytes)?),
                        None => None,
                    };

                    // Within one execution the cursor only moves forward.
                    let stale = existing
                        .as_ref()
                        .is_some_and(|cp| cp.execution_id == execution_id && *cursor < cp.cursor);

                    if !stale {
                        let (batches, total_rows) = existing
                            .as_ref()
                            .map_or((0, 0), |cp| (cp.batches_copied, cp.rows_copied));
                        let checkpoint = Checkpoint {
                            run_id: run_id.to_string(),
                            execution_id,
                            cursor: *cursor,
                            batches_copied: batches + 1,
                            rows_copied: total_rows + rows,
                            updated_at: Utc::now(),
                        };
                        checkpoints.insert(run_id.as_bytes(), encode(&checkpoint)?)?;
                    }
                }

                record.history_events += 1;
                record.history_bytes += event_bytes.len() as u64;
                record.updated_at = Utc::now();
                runs.insert(run_id.as_bytes(), encode(&record)?)?;
                Ok(())
            },
        );

        committed(result)?;
        self.flush().await
    }

    async fn load_history(
        &self,
        run_id: &str,
        execution_id: u64,
    ) -> Result<Vec<HistoryEvent>, StateStoreError> {
        let mut events = Vec::new();
        for item in self
            .history
            .scan_prefix(Self::history_prefix(run_id, execution_id))
        {
            let (_key, value) = item?;
            events.push(bincode::deserialize(&value)?);
        }
        Ok(events)
    }

    async fn continue_as_new(
        &self,
        run_id: &str,
        execution_id: u64,
        input: Vec<u8>,
    ) -> Result<RunRecord, StateStoreError> {
        let result = self.runs.transaction(|runs| {
            let mut record = Self::load_running(runs, run_id, execution_id)?;
            let now = Utc::now();

            record.execution_id += 1;
            record.input = input.clone();
            record.continued_from = Some(execution_id);
            record.history_events = 0;
            record.history_bytes = 0;
            record.execution_started_at = now;
            record.updated_at = now;

            runs.insert(run_id.as_bytes(), encode(&record)?)?;
            Ok(record)
        });

        let record = committed(result)?;
        self.flush().await?;

        // The superseded execution is unreachable once the swap commits.
        let purged = self.purge_history_before(run_id, record.execution_id)?;
        debug!(run_id, execution_id, purged, "Dropped superseded history");
        Ok(record)
    }

    async fn restart_run(&self, run_id: &str, input: Vec<u8>) -> Result<RunRecord, StateStoreError> {
        let result = self.runs.transaction(|runs| {
            let mut record: RunRecord = match runs.get(run_id.as_bytes())? {
                Some(bytes) => decode(&bytes)?,
                None => return Err(abort(StateStoreError::RunNotFound(run_id.to_string()))),
            };

            if !record.status.is_terminal() {
                return Err(abort(StateStoreError::InvalidStatus {
                    run_id: run_id.to_string(),
                    status: record.status.to_string(),
                    reason: "only a finished run can be restarted".to_string(),
                }));
            }

            let previous = record.execution_id;
            let now = Utc::now();
            record.execution_id += 1;
            record.input = input.clone();
            record.status = RunStatus::Running;
            record.failure = None;
            record.cancel_requested = false;
            record.continued_from = Some(previous);
            record.history_events = 0;
            record.history_bytes = 0;
            record.execution_started_at = now;
            record.updated_at = now;

            runs.insert(run_id.as_bytes(), encode(&record)?)?;
            Ok((previous, record))
        });

        let (previous, record) = committed(result)?;
        self.flush().await?;
        let purged = self.purge_history_before(run_id, record.execution_id)?;
        debug!(run_id, previous, purged, "Dropped history of the finished execution");
        Ok(record)
    }

    async fn finish_run(
        &self,
        run_id: &str,
        execution_id: u64,
        status: RunStatus,
        failure: Option<String>,
    ) -> Result<RunRecord, StateStoreError> {
        let result = self.runs.transaction(|runs| {
            let mut record = Self::load_running(runs, run_id, execution_id)?;
            record.status = status;
            record.failure = failure.clone();
            record.updated_at = Utc::now();
            runs.insert(run_id.as_bytes(), encode(&record)?)?;
            Ok(record)
        });

        let record = committed(result)?;
        self.flush().await?;
        Ok(record)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<RunRecord, StateStoreError> {
        let result = self.runs.transaction(|runs| {
            let mut record: RunRecord = match runs.get(run_id.as_bytes())? {
                Some(bytes) => decode(&bytes)?,
                None => return Err(abort(StateStoreError::RunNotFound(run_id.to_string()))),
            };

            // Cancelling a finished run changes nothing.
            if record.status.is_terminal() || record.cancel_requested {
                return Ok(record);
            }

            record.cancel_requested = true;
            record.updated_at = Utc::now();
            runs.insert(run_id.as_bytes(), encode(&record)?)?;
            Ok(record)
        });

        let record = committed(result)?;
        self.flush().await?;
        Ok(record)
    }

    async fn load_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>, StateStoreError> {
        match self.checkpoints.get(run_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}
