use crate::actor::ActorRef;
use engine_core::state::models::{RunRecord, RunStatus};
use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;

/// How a hosted run left the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed { error: String },
    /// The worker stopped before the run finished. The run is still
    /// `Running` and resumes on the next worker start.
    Interrupted,
}

impl RunOutcome {
    /// Outcome implied by a stored run, if it has finished.
    pub fn from_record(record: &RunRecord) -> Option<Self> {
        match record.status {
            RunStatus::Running => None,
            RunStatus::Completed => Some(RunOutcome::Completed),
            RunStatus::Cancelled => Some(RunOutcome::Cancelled),
            RunStatus::Failed => Some(RunOutcome::Failed {
                error: record.failure.clone().unwrap_or_default(),
            }),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
            RunOutcome::Failed { error } => write!(f, "failed: {error}"),
            RunOutcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Messages for the Worker actor.
#[derive(Debug)]
pub enum WorkerMsg {
    /// Initialize the actor with its own reference, then resume runs.
    SetActorRef(ActorRef<WorkerMsg>),

    /// Host a run unless it is already hosted here.
    Dispatch { run_id: String },

    /// Durably request cancellation and signal the run if it is hosted.
    Cancel { run_id: String },

    /// A hosted run's task has ended.
    Finished { run_id: String, outcome: RunOutcome },

    /// Reply once the run leaves this worker.
    Subscribe {
        run_id: String,
        reply: oneshot::Sender<RunOutcome>,
    },

    /// Read operator requests and publish status snapshots.
    PollControl,

    /// Interrupt every hosted run and stop the actor.
    Stop,
}
