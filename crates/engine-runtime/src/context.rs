//! Replay-aware workflow context.
//!
//! Every command a workflow issues (activity call, timer, checkpoint) gets the
//! next sequence number of its execution. When history already holds an
//! outcome for that number the recorded outcome is returned instead of doing
//! the work again, which is how a restarted worker rebuilds a workflow's
//! local state up to the point where it crashed.

use crate::{
    activity::{Activity, ActivityOptions, ActivityPool, ActivityRunError},
    error::WorkflowError,
};
use chrono::{DateTime, Utc};
use engine_core::{
    metrics::Metrics,
    state::{StateStore, models::HistoryEvent},
};
use model::pagination::cursor::Cursor;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Size at which an execution should hand over to a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_events: u64,
    pub max_bytes: u64,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
enum Recorded {
    Activity {
        name: String,
        input: Vec<u8>,
        outcome: Option<Result<Vec<u8>, (String, u32)>>,
    },
    Timer {
        fire_at: DateTime<Utc>,
        fired: bool,
    },
    Checkpoint {
        cursor: Cursor,
    },
}

impl Recorded {
    fn kind(&self) -> &'static str {
        match self {
            Recorded::Activity { .. } => "an activity",
            Recorded::Timer { .. } => "a timer",
            Recorded::Checkpoint { .. } => "a checkpoint",
        }
    }
}

pub(crate) struct ContextParts {
    pub(crate) run_id: String,
    pub(crate) execution_id: u64,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) pool: ActivityPool,
    pub(crate) activity_options: ActivityOptions,
    pub(crate) limits: HistoryLimits,
    pub(crate) cancel: CancellationToken,
    pub(crate) shutdown: CancellationToken,
    pub(crate) metrics: Metrics,
}

pub struct WorkflowContext {
    run_id: String,
    execution_id: u64,
    store: Arc<dyn StateStore>,
    pool: ActivityPool,
    activity_options: ActivityOptions,
    limits: HistoryLimits,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    metrics: Metrics,

    recorded: BTreeMap<u64, Recorded>,
    /// Events and encoded bytes recorded under each sequence number.
    recorded_cost: BTreeMap<u64, (u64, u64)>,
    next_seq: u64,
    history_events: u64,
    history_bytes: u64,
}

impl WorkflowContext {
    pub(crate) fn new(parts: ContextParts, history: Vec<HistoryEvent>) -> Result<Self, WorkflowError> {
        let mut recorded = BTreeMap::new();
        let mut recorded_cost: BTreeMap<u64, (u64, u64)> = BTreeMap::new();

        for event in history {
            let cost = recorded_cost.entry(event.seq()).or_default();
            cost.0 += 1;
            cost.1 += bincode::serialized_size(&event)?;

            match event {
                HistoryEvent::ActivityScheduled {
                    seq,
                    activity,
                    input,
                    ..
                } => {
                    recorded.insert(
                        seq,
                        Recorded::Activity {
                            name: activity,
                            input,
                            outcome: None,
                        },
                    );
                }
                HistoryEvent::ActivityCompleted { seq, output, .. } => {
                    if let Some(Recorded::Activity { outcome, .. }) = recorded.get_mut(&seq) {
                        *outcome = Some(Ok(output));
                    }
                }
                HistoryEvent::ActivityFailed {
                    seq,
                    error,
                    attempts,
                } => {
                    if let Some(Recorded::Activity { outcome, .. }) = recorded.get_mut(&seq) {
                        *outcome = Some(Err((error, attempts)));
                    }
                }
                HistoryEvent::TimerStarted { seq, fire_at } => {
                    recorded.insert(
                        seq,
                        Recorded::Timer {
                            fire_at,
                            fired: false,
                        },
                    );
                }
                HistoryEvent::TimerFired { seq } => {
                    if let Some(Recorded::Timer { fired, .. }) = recorded.get_mut(&seq) {
                        *fired = true;
                    }
                }
                HistoryEvent::CheckpointRecorded { seq, cursor, .. } => {
                    recorded.insert(seq, Recorded::Checkpoint { cursor });
                }
            }
        }

        Ok(Self {
            run_id: parts.run_id,
            execution_id: parts.execution_id,
            store: parts.store,
            pool: parts.pool,
            activity_options: parts.activity_options,
            limits: parts.limits,
            cancel: parts.cancel,
            shutdown: parts.shutdown,
            metrics: parts.metrics,
            recorded,
            recorded_cost,
            next_seq: 0,
            history_events: 0,
            history_bytes: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// True while the workflow is re-issuing commands whose outcomes are
    /// already in history. Side-effect-free code such as logging should be
    /// skipped then, or it repeats on every recovery.
    pub fn is_replaying(&self) -> bool {
        self.recorded.range(self.next_seq..).next().is_some()
    }

    /// Whether history has grown past its limits at this point of the
    /// execution. Only counts what was recorded before the current command,
    /// so replay answers exactly as the original run did.
    pub fn continue_as_new_suggested(&self) -> bool {
        self.history_events >= self.limits.max_events || self.history_bytes >= self.limits.max_bytes
    }

    pub fn history_len(&self) -> u64 {
        self.history_events
    }

    /// Fails with `Cancelled` or `Interrupted` when the run should stop.
    /// Workflows call this at the top of every loop iteration; commands call
    /// it before starting new work.
    pub fn check_cancelled(&self) -> Result<(), WorkflowError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkflowError::Interrupted);
        }
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        Ok(())
    }

    pub async fn execute_activity<A: Activity>(
        &mut self,
        input: &A::Input,
    ) -> Result<A::Output, WorkflowError> {
        let options = self.activity_options.clone();
        self.execute_activity_with::<A>(input, &options).await
    }

    pub async fn execute_activity_with<A: Activity>(
        &mut self,
        input: &A::Input,
        options: &ActivityOptions,
    ) -> Result<A::Output, WorkflowError> {
        let seq = self.next_command();
        let input = serde_json::to_vec(input)?;

        let rescheduled = match self.recorded.get(&seq) {
            None => false,
            Some(Recorded::Activity {
                name,
                input: recorded_input,
                outcome,
            }) => {
                if name != A::NAME || *recorded_input != input {
                    return Err(WorkflowError::Nondeterminism(format!(
                        "command {seq} was activity '{name}' with a different input, now '{}'",
                        A::NAME
                    )));
                }
                let outcome = outcome.clone();
                self.account_recorded(seq);

                match outcome {
                    Some(Ok(output)) => {
                        self.metrics.increment_replayed(1);
                        return Ok(serde_json::from_slice(&output)?);
                    }
                    Some(Err((message, attempts))) => {
                        return Err(WorkflowError::ActivityFailed {
                            activity: A::NAME.to_string(),
                            message,
                            attempts,
                        });
                    }
                    None => true,
                }
            }
            Some(other) => {
                return Err(WorkflowError::Nondeterminism(format!(
                    "command {seq} was {} in history, now activity '{}'",
                    other.kind(),
                    A::NAME
                )));
            }
        };

        self.check_cancelled()?;

        if rescheduled {
            info!(
                run_id = %self.run_id,
                execution_id = self.execution_id,
                activity = A::NAME,
                seq,
                "Re-dispatching activity with no recorded result"
            );
        } else {
            self.append(HistoryEvent::ActivityScheduled {
                seq,
                activity: A::NAME.to_string(),
                input: input.clone(),
                at: Utc::now(),
            })
            .await?;
        }

        let result = self
            .pool
            .execute(A::NAME, &self.run_id, &input, options, &self.shutdown)
            .await;

        match result {
            Ok(attempted) => {
                self.append(HistoryEvent::ActivityCompleted {
                    seq,
                    output: attempted.value.clone(),
                    attempts: attempted.attempts,
                })
                .await?;
                Ok(serde_json::from_slice(&attempted.value)?)
            }
            Err(ActivityRunError::Interrupted) => Err(WorkflowError::Interrupted),
            Err(ActivityRunError::Failed { message, attempts }) => {
                self.append(HistoryEvent::ActivityFailed {
                    seq,
                    error: message.clone(),
                    attempts,
                })
                .await?;
                Err(WorkflowError::ActivityFailed {
                    activity: A::NAME.to_string(),
                    message,
                    attempts,
                })
            }
        }
    }

    /// Durable timer. Survives restarts: a replayed timer only waits for
    /// whatever remains of its original deadline. Cancellation and shutdown
    /// end the wait early.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), WorkflowError> {
        let seq = self.next_command();

        let wait = match self.recorded.get(&seq) {
            None => {
                self.check_cancelled()?;
                let fire_at = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.append(HistoryEvent::TimerStarted { seq, fire_at })
                    .await?;
                duration
            }
            Some(Recorded::Timer { fired: true, .. }) => {
                self.account_recorded(seq);
                return Ok(());
            }
            Some(Recorded::Timer { fire_at, .. }) => {
                let fire_at = *fire_at;
                self.account_recorded(seq);
                self.check_cancelled()?;
                (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            }
            Some(other) => {
                return Err(WorkflowError::Nondeterminism(format!(
                    "command {seq} was {} in history, now a timer",
                    other.kind()
                )));
            }
        };

        debug!(run_id = %self.run_id, seq, ?wait, "Timer started");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(WorkflowError::Interrupted),
        }

        self.append(HistoryEvent::TimerFired { seq }).await
    }

    /// Records that everything up to `cursor` is applied. The run's durable
    /// checkpoint moves in the same write.
    pub async fn checkpoint(&mut self, cursor: Cursor, rows: u64) -> Result<(), WorkflowError> {
        let seq = self.next_command();

        match self.recorded.get(&seq) {
            None => {
                self.append(HistoryEvent::CheckpointRecorded { seq, cursor, rows })
                    .await
            }
            Some(Recorded::Checkpoint { cursor: recorded }) if *recorded == cursor => {
                self.account_recorded(seq);
                Ok(())
            }
            Some(other) => Err(WorkflowError::Nondeterminism(format!(
                "command {seq} was {} in history, now a checkpoint at {cursor}",
                other.kind()
            ))),
        }
    }

    fn next_command(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn account_recorded(&mut self, seq: u64) {
        if let Some((events, bytes)) = self.recorded_cost.get(&seq) {
            self.history_events += events;
            self.history_bytes += bytes;
        }
    }

    async fn append(&mut self, event: HistoryEvent) -> Result<(), WorkflowError> {
        let size = bincode::serialized_size(&event)?;
        self.store
            .append_history(&self.run_id, self.execution_id, &event)
            .await?;
        self.history_events += 1;
        self.history_bytes += size;
        Ok(())
    }
}
