use crate::{
    error::ProgressError,
    state::{
        StateStore,
        models::{Checkpoint, HistoryEvent, RunRecord, RunStatus},
    },
};
use chrono::{DateTime, Utc};
use model::pagination::cursor::Cursor;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, sync::Arc};

#[derive(Clone)]
pub struct ProgressService {
    pub store: Arc<dyn StateStore>,
}

/// What a running execution is waiting on, as far as its history shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunPhase {
    /// Between commands, or not yet picked up by a worker.
    Deciding,
    Activity { name: String },
    Sleeping { until: DateTime<Utc> },
    Finished,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Deciding => f.write_str("deciding"),
            RunPhase::Activity { name } => write!(f, "running {name}"),
            RunPhase::Sleeping { until } => write!(f, "sleeping until {}", until.to_rfc3339()),
            RunPhase::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: String,
    pub workflow_type: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub execution_id: u64,
    pub cursor: Option<Cursor>,
    pub batches_copied: u64,
    pub rows_copied: u64,
    pub history_events: u64,
    pub history_bytes: u64,
    pub cancel_requested: bool,
    pub failure: Option<String>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        ProgressService { store }
    }

    pub async fn run_status(&self, run_id: &str) -> Result<RunProgress, ProgressError> {
        let record = self
            .store
            .load_run(run_id)
            .await?
            .ok_or_else(|| ProgressError::RunNotFound(run_id.to_string()))?;
        let checkpoint = self.store.load_checkpoint(run_id).await?;

        let phase = if record.status.is_terminal() {
            RunPhase::Finished
        } else {
            let history = self.store.load_history(run_id, record.execution_id).await?;
            phase_from_history(&history)
        };

        let cursor = resume_cursor(&record, checkpoint.as_ref());
        Ok(RunProgress {
            run_id: record.run_id,
            workflow_type: record.workflow_type,
            status: record.status,
            phase,
            execution_id: record.execution_id,
            cursor,
            batches_copied: checkpoint.as_ref().map_or(0, |cp| cp.batches_copied),
            rows_copied: checkpoint.as_ref().map_or(0, |cp| cp.rows_copied),
            history_events: record.history_events,
            history_bytes: record.history_bytes,
            cancel_requested: record.cancel_requested,
            failure: record.failure,
            last_checkpoint_at: checkpoint.map(|cp| cp.updated_at),
            updated_at: record.updated_at,
        })
    }
}

/// Last known good cursor: the checkpoint if the current execution wrote
/// one, otherwise the cursor the current execution started from.
fn resume_cursor(record: &RunRecord, checkpoint: Option<&Checkpoint>) -> Option<Cursor> {
    match checkpoint {
        Some(cp) if cp.execution_id >= record.execution_id => Some(cp.cursor),
        _ => serde_json::from_slice(&record.input)
            .ok()
            .or_else(|| checkpoint.map(|cp| cp.cursor)),
    }
}

/// The last command with no recorded outcome is what the run waits on.
fn phase_from_history(history: &[HistoryEvent]) -> RunPhase {
    let resolved: BTreeSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ActivityCompleted { seq, .. }
            | HistoryEvent::ActivityFailed { seq, .. }
            | HistoryEvent::TimerFired { seq } => Some(*seq),
            _ => None,
        })
        .collect();

    history
        .iter()
        .rev()
        .find_map(|e| match e {
            HistoryEvent::ActivityScheduled { seq, activity, .. } if !resolved.contains(seq) => {
                Some(RunPhase::Activity {
                    name: activity.clone(),
                })
            }
            HistoryEvent::TimerStarted { seq, fire_at } if !resolved.contains(seq) => {
                Some(RunPhase::Sleeping { until: *fire_at })
            }
            _ => None,
        })
        .unwrap_or(RunPhase::Deciding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sled_store::SledStateStore;
    use tempfile::tempdir;

    const RUN_ID: &str = "test-run";

    async fn setup() -> (tempfile::TempDir, Arc<dyn StateStore>, ProgressService) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn StateStore> =
            Arc::new(SledStateStore::open(dir.path()).expect("open sled"));
        store
            .create_run(&RunRecord::new(RUN_ID, "migrate_table", "q", vec![]))
            .await
            .unwrap();
        let service = ProgressService::new(store.clone());
        (dir, store, service)
    }

    #[tokio::test]
    async fn reports_pending_activity_and_checkpoint() {
        let (_dir, store, service) = setup().await;

        store
            .append_history(
                RUN_ID,
                1,
                &HistoryEvent::CheckpointRecorded {
                    seq: 0,
                    cursor: Cursor::new(100),
                    rows: 100,
                },
            )
            .await
            .unwrap();
        store
            .append_history(
                RUN_ID,
                1,
                &HistoryEvent::ActivityScheduled {
                    seq: 1,
                    activity: "copy_batch".into(),
                    input: vec![],
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let status = service.run_status(RUN_ID).await.unwrap();
        assert_eq!(status.status, RunStatus::Running);
        assert_eq!(
            status.phase,
            RunPhase::Activity {
                name: "copy_batch".into()
            }
        );
        assert_eq!(status.cursor, Some(Cursor::new(100)));
        assert_eq!(status.rows_copied, 100);
        assert!(status.last_checkpoint_at.is_some());
    }

    #[tokio::test]
    async fn reports_sleeping_until_timer_fires() {
        let (_dir, store, service) = setup().await;
        let fire_at = Utc::now();

        store
            .append_history(RUN_ID, 1, &HistoryEvent::TimerStarted { seq: 0, fire_at })
            .await
            .unwrap();
        assert_eq!(
            service.run_status(RUN_ID).await.unwrap().phase,
            RunPhase::Sleeping { until: fire_at }
        );

        store
            .append_history(RUN_ID, 1, &HistoryEvent::TimerFired { seq: 0 })
            .await
            .unwrap();
        assert_eq!(
            service.run_status(RUN_ID).await.unwrap().phase,
            RunPhase::Deciding
        );
    }

    #[tokio::test]
    async fn reports_failure_of_finished_run() {
        let (_dir, store, service) = setup().await;
        store
            .finish_run(RUN_ID, 1, RunStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        let status = service.run_status(RUN_ID).await.unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert_eq!(status.phase, RunPhase::Finished);
        assert_eq!(status.failure.as_deref(), Some("boom"));
        assert_eq!(status.cursor, None);
    }

    #[tokio::test]
    async fn falls_back_to_the_execution_input_until_it_checkpoints() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let service = ProgressService::new(store.clone());
        let input = serde_json::to_vec(&Cursor::new(5000)).unwrap();
        store
            .create_run(&RunRecord::new(RUN_ID, "migrate_table", "q", input))
            .await
            .unwrap();
        store
            .append_history(
                RUN_ID,
                1,
                &HistoryEvent::CheckpointRecorded {
                    seq: 0,
                    cursor: Cursor::new(5100),
                    rows: 100,
                },
            )
            .await
            .unwrap();
        store
            .finish_run(RUN_ID, 1, RunStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(
            service.run_status(RUN_ID).await.unwrap().cursor,
            Some(Cursor::new(5100))
        );

        // A restart to a lower cursor supersedes the older checkpoint.
        store
            .restart_run(RUN_ID, serde_json::to_vec(&Cursor::new(10)).unwrap())
            .await
            .unwrap();
        let status = service.run_status(RUN_ID).await.unwrap();
        assert_eq!(status.cursor, Some(Cursor::new(10)));
        assert_eq!(status.rows_copied, 100);
    }

    #[tokio::test]
    async fn unknown_run_is_an_error() {
        let (_dir, _store, service) = setup().await;
        assert!(matches!(
            service.run_status("missing").await,
            Err(ProgressError::RunNotFound(_))
        ));
    }
}
