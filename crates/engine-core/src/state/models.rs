use chrono::{DateTime, Utc};
use model::pagination::cursor::Cursor;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Cancelled => "Cancelled",
            RunStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one run identifier and its current execution.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    /// Starts at 1, bumped by every continue-as-new or restart.
    pub execution_id: u64,
    /// Encoded input of the current execution.
    pub input: Vec<u8>,
    pub status: RunStatus,
    pub failure: Option<String>,
    pub cancel_requested: bool,
    pub continued_from: Option<u64>,
    /// History size of the current execution.
    pub history_events: u64,
    pub history_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub execution_started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run_id: &str, workflow_type: &str, task_queue: &str, input: Vec<u8>) -> Self {
        let now = Utc::now();
        RunRecord {
            run_id: run_id.to_string(),
            workflow_type: workflow_type.to_string(),
            task_queue: task_queue.to_string(),
            execution_id: 1,
            input,
            status: RunStatus::Running,
            failure: None,
            cancel_requested: false,
            continued_from: None,
            history_events: 0,
            history_bytes: 0,
            created_at: now,
            execution_started_at: now,
            updated_at: now,
        }
    }
}

/// One entry in an execution's replay log.
///
/// `seq` numbers the commands a workflow issued within one execution; replay
/// matches commands to recorded outcomes by it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum HistoryEvent {
    ActivityScheduled {
        seq: u64,
        activity: String,
        input: Vec<u8>,
        at: DateTime<Utc>,
    },
    ActivityCompleted {
        seq: u64,
        output: Vec<u8>,
        attempts: u32,
    },
    ActivityFailed {
        seq: u64,
        error: String,
        attempts: u32,
    },
    TimerStarted {
        seq: u64,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        seq: u64,
    },
    CheckpointRecorded {
        seq: u64,
        cursor: Cursor,
        rows: u64,
    },
}

impl HistoryEvent {
    pub fn seq(&self) -> u64 {
        match self {
            HistoryEvent::ActivityScheduled { seq, .. }
            | HistoryEvent::ActivityCompleted { seq, .. }
            | HistoryEvent::ActivityFailed { seq, .. }
            | HistoryEvent::TimerStarted { seq, .. }
            | HistoryEvent::TimerFired { seq }
            | HistoryEvent::CheckpointRecorded { seq, .. } => *seq,
        }
    }
}

/// Last durable cursor of a run, with running totals across executions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub run_id: String,
    pub execution_id: u64,
    pub cursor: Cursor,
    pub batches_copied: u64,
    pub rows_copied: u64,
    pub updated_at: DateTime<Utc>,
}
