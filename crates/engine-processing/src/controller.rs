use crate::activities::{CopyBatch, ListBatch, ListRequest};
use async_trait::async_trait;
use engine_runtime::{
    context::WorkflowContext,
    error::WorkflowError,
    workflow::{Workflow, WorkflowExit},
};
use model::{pagination::cursor::Cursor, records::batch::Batch};
use std::time::Duration;
use tracing::info;

/// Task queue migration workers poll by default.
pub const TASK_QUEUE: &str = "migration-workers";

pub const DEFAULT_BATCH_LIMIT: usize = 100;
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(600);

enum Phase {
    Listing,
    Copying(Batch),
    Idling,
}

/// Walks the source table in primary-key order, copying one batch at a time
/// and checkpointing the cursor after each. It never completes: once the
/// table is drained it idles and polls for new rows until cancelled, and it
/// continues as new whenever its history grows too long.
#[derive(Debug, Clone)]
pub struct MigrateTable {
    batch_limit: usize,
    idle_interval: Duration,
}

impl MigrateTable {
    pub fn new(batch_limit: usize, idle_interval: Duration) -> Self {
        Self {
            batch_limit,
            idle_interval,
        }
    }
}

impl Default for MigrateTable {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_LIMIT, DEFAULT_IDLE_INTERVAL)
    }
}

#[async_trait]
impl Workflow for MigrateTable {
    type Input = Cursor;
    const NAME: &'static str = "migrate_table";

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        mut cursor: Cursor,
    ) -> Result<WorkflowExit<Cursor>, WorkflowError> {
        if !ctx.is_replaying() {
            info!(
                run_id = ctx.run_id(),
                execution_id = ctx.execution_id(),
                cursor = %cursor,
                "Migration execution started"
            );
        }

        let mut phase = Phase::Listing;
        loop {
            ctx.check_cancelled()?;

            phase = match phase {
                Phase::Listing => {
                    if ctx.continue_as_new_suggested() {
                        info!(
                            run_id = ctx.run_id(),
                            execution_id = ctx.execution_id(),
                            cursor = %cursor,
                            history_events = ctx.history_len(),
                            "History limit reached, continuing as new"
                        );
                        return Ok(WorkflowExit::ContinueAsNew(cursor));
                    }

                    let request = ListRequest {
                        after: cursor,
                        limit: self.batch_limit,
                    };
                    let keys = ctx.execute_activity::<ListBatch>(&request).await?;
                    let batch = Batch::new(cursor, keys, self.batch_limit).map_err(|e| {
                        WorkflowError::Application(format!("invalid batch after {cursor}: {e}"))
                    })?;

                    if batch.is_empty() {
                        Phase::Idling
                    } else {
                        Phase::Copying(batch)
                    }
                }
                Phase::Copying(batch) => {
                    let outcome = ctx
                        .execute_activity::<CopyBatch>(&batch.keys().to_vec())
                        .await?;
                    if let Some(last) = batch.last() {
                        cursor = cursor.advance_to(last).map_err(|e| {
                            WorkflowError::Application(format!("cannot checkpoint batch: {e}"))
                        })?;
                    }
                    ctx.checkpoint(cursor, outcome.copied as u64).await?;

                    if !ctx.is_replaying() {
                        info!(
                            run_id = ctx.run_id(),
                            cursor = %cursor,
                            batch_size = batch.len(),
                            copied = outcome.copied,
                            "Batch copied"
                        );
                    }
                    Phase::Listing
                }
                Phase::Idling => {
                    if !ctx.is_replaying() {
                        info!(
                            run_id = ctx.run_id(),
                            cursor = %cursor,
                            idle_secs = self.idle_interval.as_secs(),
                            "No new rows, idling"
                        );
                    }
                    ctx.sleep(self.idle_interval).await?;
                    Phase::Listing
                }
            };
        }
    }
}
