use crate::{
    activity::{ActivityOptions, ActivityPool},
    context::{ContextParts, HistoryLimits, WorkflowContext},
    error::WorkflowError,
    workflow::{Registry, WorkflowExit},
    worker::messages::RunOutcome,
};
use engine_core::{
    error::StateStoreError,
    metrics::Metrics,
    state::{StateStore, models::RunStatus},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything a run task needs, cloned out of the worker.
#[derive(Clone)]
pub(crate) struct RunEnv {
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) pool: ActivityPool,
    pub(crate) activity_options: ActivityOptions,
    pub(crate) limits: HistoryLimits,
    pub(crate) shutdown: CancellationToken,
    pub(crate) metrics: Metrics,
}

/// Drives a run through successive executions until it finishes or the
/// worker stops.
pub(crate) async fn host_run(env: RunEnv, run_id: String, cancel: CancellationToken) -> RunOutcome {
    match drive(&env, &run_id, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Run left unfinished after a state store error");
            RunOutcome::Interrupted
        }
    }
}

async fn drive(
    env: &RunEnv,
    run_id: &str,
    cancel: &CancellationToken,
) -> Result<RunOutcome, StateStoreError> {
    loop {
        let Some(record) = env.store.load_run(run_id).await? else {
            return Err(StateStoreError::RunNotFound(run_id.to_string()));
        };
        if let Some(outcome) = RunOutcome::from_record(&record) {
            return Ok(outcome);
        }
        if record.cancel_requested {
            cancel.cancel();
        }

        // Another worker build may know the workflow, so the run stays Running.
        let Some(workflow) = env.registry.workflow(&record.workflow_type) else {
            error!(
                run_id,
                workflow = %record.workflow_type,
                "Workflow is not registered on this worker"
            );
            return Ok(RunOutcome::Interrupted);
        };

        let history = env.store.load_history(run_id, record.execution_id).await?;
        let replayed = history.len();
        let parts = ContextParts {
            run_id: run_id.to_string(),
            execution_id: record.execution_id,
            store: env.store.clone(),
            pool: env.pool.clone(),
            activity_options: env.activity_options.clone(),
            limits: env.limits,
            cancel: cancel.clone(),
            shutdown: env.shutdown.clone(),
            metrics: env.metrics.clone(),
        };

        info!(
            run_id,
            execution_id = record.execution_id,
            workflow = %record.workflow_type,
            replayed,
            "Executing workflow"
        );

        let result = match WorkflowContext::new(parts, history) {
            Ok(mut ctx) => workflow.run_erased(&mut ctx, &record.input).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(WorkflowExit::Completed) => {
                env.store
                    .finish_run(run_id, record.execution_id, RunStatus::Completed, None)
                    .await?;
                info!(run_id, execution_id = record.execution_id, "Run completed");
                return Ok(RunOutcome::Completed);
            }
            Ok(WorkflowExit::ContinueAsNew(input)) => {
                let next = env
                    .store
                    .continue_as_new(run_id, record.execution_id, input)
                    .await?;
                info!(
                    run_id,
                    from_execution = record.execution_id,
                    execution_id = next.execution_id,
                    "Continued as new"
                );
            }
            Err(err) => match err.terminal_status() {
                Some(status) => {
                    let failure = (status == RunStatus::Failed).then(|| err.to_string());
                    env.store
                        .finish_run(run_id, record.execution_id, status, failure.clone())
                        .await?;
                    return Ok(match failure {
                        Some(error) => {
                            error!(run_id, execution_id = record.execution_id, %error, "Run failed");
                            RunOutcome::Failed { error }
                        }
                        None => {
                            info!(run_id, execution_id = record.execution_id, "Run cancelled");
                            RunOutcome::Cancelled
                        }
                    });
                }
                None => {
                    if let WorkflowError::Store(e) = err {
                        return Err(e);
                    }
                    warn!(run_id, execution_id = record.execution_id, "Run interrupted by worker shutdown");
                    return Ok(RunOutcome::Interrupted);
                }
            },
        }
    }
}
