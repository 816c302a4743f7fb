use crate::{error::CliError, shutdown::{ExitCode, ShutdownCoordinator}};
use connectors::{
    adapter::{RowDestination, RowSource},
    sql::{
        base::table::TableRef,
        postgres::{
            destination::PgDestination,
            pool::{PoolSettings, connect_pool},
            source::PgSource,
        },
    },
};
use engine_config::settings::MigrationSettings;
use engine_core::{
    error::StateStoreError,
    metrics::Metrics,
    progress::RunProgress,
    retry::RetryPolicy,
    state::{StateStore, sled_store::SledStateStore},
};
use engine_processing::{
    MigrateTable,
    activities::{CopyBatch, ListBatch},
};
use engine_runtime::{
    activity::ActivityOptions,
    client::Client,
    context::HistoryLimits,
    control::ControlDir,
    error::HostError,
    worker::{Worker, WorkerHandle, WorkerOptions, messages::RunOutcome},
};
use model::pagination::cursor::Cursor;
use std::sync::Arc;
use tracing::{debug, error, info};

fn open_store(settings: &MigrationSettings) -> Result<Arc<dyn StateStore>, StateStoreError> {
    Ok(Arc::new(SledStateStore::open(&settings.state_dir)?))
}

fn worker_options(settings: &MigrationSettings) -> WorkerOptions {
    let mut options = WorkerOptions::new(&settings.task_queue);
    options.max_concurrent_activities = settings.max_concurrent_activities;
    options.activity = ActivityOptions {
        start_to_close_timeout: settings.activity_timeout,
        retry: RetryPolicy::for_activities().with_max_attempts(settings.max_attempts),
    };
    options.history = HistoryLimits {
        max_events: settings.history_max_events,
        max_bytes: settings.history_max_bytes,
    };
    options.control_dir = Some(settings.control_dir());
    options
}

async fn start_worker(
    settings: &MigrationSettings,
    store: Arc<dyn StateStore>,
) -> Result<WorkerHandle, CliError> {
    let table = TableRef::parse(&settings.table, &settings.key_column)?;
    let pool_settings = PoolSettings {
        min_connections: settings.pool_min,
        max_connections: settings.pool_max,
        ..PoolSettings::default()
    };

    let source_pool = connect_pool("source", settings.require_source_dsn()?, &pool_settings).await?;
    let destination_pool =
        connect_pool("destination", settings.require_destination_dsn()?, &pool_settings).await?;
    let source: Arc<dyn RowSource> = Arc::new(PgSource::new(source_pool, table.clone()));
    let destination: Arc<dyn RowDestination> = Arc::new(PgDestination::new(destination_pool, table));

    let metrics = Metrics::new();
    let mut worker = Worker::new(store, worker_options(settings)).with_metrics(metrics.clone());
    worker
        .register_workflow(MigrateTable::new(settings.batch_size, settings.idle_interval))
        .register_activity(ListBatch::new(source.clone()))
        .register_activity(CopyBatch::new(source, destination, metrics));

    Ok(worker.start().await?)
}

/// Creates, resumes or restarts `run_id` depending on what the store holds.
async fn prepare_run(client: &Client, run_id: &str, cursor: Option<Cursor>) -> Result<(), CliError> {
    match client.load(run_id).await? {
        None => {
            let cursor = cursor.unwrap_or(Cursor::START);
            client.start::<MigrateTable>(run_id, &cursor).await?;
            info!(run_id, cursor = %cursor, "Migration started");
        }
        Some(record) if !record.status.is_terminal() => {
            if cursor.is_some() {
                return Err(CliError::Usage(format!(
                    "run '{run_id}' is still running; --cursor only applies to new or finished runs"
                )));
            }
            client.resume(run_id).await?;
            info!(run_id, execution_id = record.execution_id, "Resuming migration");
        }
        Some(record) => {
            // Without --cursor, continue from the last checkpoint of this
            // execution, or from where it started if it never checkpointed.
            let from = match cursor {
                Some(cursor) => cursor,
                None => client
                    .describe(run_id)
                    .await?
                    .cursor
                    .unwrap_or(Cursor::START),
            };
            client.restart::<MigrateTable>(run_id, &from).await?;
            info!(
                run_id,
                previous_status = %record.status,
                cursor = %from,
                "Migration restarted"
            );
        }
    }
    Ok(())
}

pub async fn start(
    settings: &MigrationSettings,
    run_id: &str,
    cursor: Option<Cursor>,
    shutdown: &ShutdownCoordinator,
) -> Result<ExitCode, CliError> {
    let store = open_store(settings)?;
    let worker = start_worker(settings, store).await?;
    let client = worker.client();

    if let Err(e) = prepare_run(&client, run_id, cursor).await {
        worker.shutdown().await?;
        return Err(e);
    }

    let token = shutdown.cancel_token();
    let outcome = tokio::select! {
        outcome = client.wait(run_id) => Some(outcome),
        _ = token.cancelled() => None,
    };

    let metrics = worker.metrics();
    worker.shutdown().await?;
    info!(
        run_id,
        batches_copied = metrics.batches_copied,
        rows_copied = metrics.rows_copied,
        retries = metrics.activity_retries,
        "Worker stopped"
    );

    report(run_id, outcome)
}

fn report(run_id: &str, outcome: Option<Result<RunOutcome, HostError>>) -> Result<ExitCode, CliError> {
    let Some(outcome) = outcome else {
        info!(run_id, "Run left unfinished; it resumes on the next start");
        return Ok(ExitCode::ShutdownRequested);
    };

    match outcome? {
        outcome @ (RunOutcome::Completed | RunOutcome::Cancelled) => {
            info!(run_id, outcome = %outcome, "Run finished");
            Ok(ExitCode::Success)
        }
        RunOutcome::Failed { error } => {
            error!(
                run_id,
                error = %error,
                "Run failed; fix the cause and start it again to continue from its last checkpoint"
            );
            Ok(ExitCode::GeneralError)
        }
        RunOutcome::Interrupted => Ok(ExitCode::ShutdownRequested),
    }
}

/// Hosts every unfinished run of the task queue until a shutdown signal.
pub async fn serve(
    settings: &MigrationSettings,
    shutdown: &ShutdownCoordinator,
) -> Result<ExitCode, CliError> {
    let store = open_store(settings)?;
    let worker = start_worker(settings, store).await?;
    info!(task_queue = %settings.task_queue, "Worker running, press Ctrl+C to stop");

    shutdown.cancel_token().cancelled().await;

    let metrics = worker.metrics();
    worker.shutdown().await?;
    info!(
        batches_copied = metrics.batches_copied,
        rows_copied = metrics.rows_copied,
        "Worker stopped"
    );
    Ok(ExitCode::ShutdownRequested)
}

pub async fn status(settings: &MigrationSettings, run_id: &str, as_json: bool) -> Result<(), CliError> {
    let progress = match open_store(settings) {
        Ok(store) => Client::new(store, &settings.task_queue).describe(run_id).await?,
        // A running worker holds the store lock; fall back to its snapshot.
        Err(StateStoreError::Storage(e)) => {
            debug!(error = %e, "State store unavailable, reading published status");
            let control = ControlDir::open(settings.control_dir()).await?;
            control.read_status(run_id).await?.ok_or_else(|| {
                CliError::Unexpected(format!(
                    "the state store is held by a running worker that has not published run '{run_id}'"
                ))
            })?
        }
        Err(e) => return Err(e.into()),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    } else {
        print_progress_table(&progress);
    }
    Ok(())
}

pub async fn cancel(settings: &MigrationSettings, run_id: &str) -> Result<(), CliError> {
    match open_store(settings) {
        Ok(store) => {
            let record = Client::new(store, &settings.task_queue).cancel(run_id).await?;
            info!(
                run_id,
                status = %record.status,
                "Cancellation recorded; the run stops when a worker next hosts it"
            );
        }
        Err(StateStoreError::Storage(e)) => {
            debug!(error = %e, "State store unavailable, leaving a request for the worker");
            let control = ControlDir::open(settings.control_dir()).await?;
            let request = control.request_cancel(run_id).await?;
            info!(
                run_id,
                request = %request.display(),
                "Cancellation handed to the running worker"
            );
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_progress_table(progress: &RunProgress) {
    let or_na = |value: Option<String>| value.unwrap_or_else(|| "n/a".to_string());

    println!("Run '{}' ({}):", progress.run_id, progress.workflow_type);
    println!("-----------------------------");
    println!("{:<18} {}", "Status", progress.status);
    println!("{:<18} {}", "Phase", progress.phase);
    println!("{:<18} {}", "Execution", progress.execution_id);
    println!("{:<18} {}", "Cursor", or_na(progress.cursor.map(|c| c.to_string())));
    println!("{:<18} {}", "Batches copied", progress.batches_copied);
    println!("{:<18} {}", "Rows copied", progress.rows_copied);
    println!(
        "{:<18} {} events, {} bytes",
        "History", progress.history_events, progress.history_bytes
    );
    println!("{:<18} {}", "Cancel requested", progress.cancel_requested);
    println!(
        "{:<18} {}",
        "Last checkpoint",
        or_na(progress.last_checkpoint_at.map(|ts| ts.to_rfc3339()))
    );
    if let Some(failure) = &progress.failure {
        println!("{:<18} {}", "Failure", failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::models::{HistoryEvent, RunStatus};
    use engine_processing::TASK_QUEUE;
    use tempfile::tempdir;

    const RUN_ID: &str = "audio-downloads";

    fn detached_client(dir: &std::path::Path) -> (Arc<dyn StateStore>, Client) {
        let store: Arc<dyn StateStore> = Arc::new(SledStateStore::open(dir).unwrap());
        let client = Client::new(store.clone(), TASK_QUEUE);
        (store, client)
    }

    async fn restart_input(store: &Arc<dyn StateStore>) -> (u64, Cursor) {
        let record = store.load_run(RUN_ID).await.unwrap().unwrap();
        let input = serde_json::from_slice(&record.input).unwrap();
        (record.execution_id, input)
    }

    #[tokio::test]
    async fn restart_keeps_the_start_cursor_of_a_run_that_never_checkpointed() {
        let dir = tempdir().unwrap();
        let (store, client) = detached_client(dir.path());

        prepare_run(&client, RUN_ID, Some(Cursor::new(5000))).await.unwrap();
        store
            .finish_run(RUN_ID, 1, RunStatus::Failed, Some("connection refused".into()))
            .await
            .unwrap();

        prepare_run(&client, RUN_ID, None).await.unwrap();
        assert_eq!(restart_input(&store).await, (2, Cursor::new(5000)));
    }

    #[tokio::test]
    async fn restart_continues_from_the_last_checkpoint() {
        let dir = tempdir().unwrap();
        let (store, client) = detached_client(dir.path());

        prepare_run(&client, RUN_ID, None).await.unwrap();
        store
            .append_history(
                RUN_ID,
                1,
                &HistoryEvent::CheckpointRecorded {
                    seq: 0,
                    cursor: Cursor::new(200),
                    rows: 200,
                },
            )
            .await
            .unwrap();
        store
            .finish_run(RUN_ID, 1, RunStatus::Failed, Some("duplicate key".into()))
            .await
            .unwrap();

        prepare_run(&client, RUN_ID, None).await.unwrap();
        assert_eq!(restart_input(&store).await, (2, Cursor::new(200)));
    }

    #[tokio::test]
    async fn cursor_is_refused_for_a_running_run() {
        let dir = tempdir().unwrap();
        let (_store, client) = detached_client(dir.path());

        prepare_run(&client, RUN_ID, None).await.unwrap();
        assert!(matches!(
            prepare_run(&client, RUN_ID, Some(Cursor::new(7))).await,
            Err(CliError::Usage(_))
        ));
    }
}
