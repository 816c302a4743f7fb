use crate::{
    actor::ActorRef,
    error::{ActorError, HostError},
    workflow::Workflow,
    worker::messages::{RunOutcome, WorkerMsg},
};
use engine_core::{
    error::{ProgressError, StateStoreError},
    progress::{ProgressService, RunProgress},
    state::{StateStore, models::RunRecord},
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;

/// Starts, inspects and cancels runs.
///
/// A client made by [`crate::worker::WorkerHandle::client`] also hands new
/// runs to that worker; a detached one only changes durable state, which a
/// worker picks up on its next start.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn StateStore>,
    task_queue: String,
    worker: Option<ActorRef<WorkerMsg>>,
    progress: ProgressService,
}

impl Client {
    pub fn new(store: Arc<dyn StateStore>, task_queue: impl Into<String>) -> Self {
        let progress = ProgressService::new(store.clone());
        Self {
            store,
            task_queue: task_queue.into(),
            worker: None,
            progress,
        }
    }

    pub(crate) fn with_worker(mut self, worker: ActorRef<WorkerMsg>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Creates a run. Fails if the run id is already in use, whether the run
    /// is still going or has finished.
    pub async fn start<W: Workflow>(
        &self,
        run_id: &str,
        input: &W::Input,
    ) -> Result<RunRecord, HostError> {
        let record = RunRecord::new(run_id, W::NAME, &self.task_queue, serde_json::to_vec(input)?);

        match self.store.create_run(&record).await {
            Ok(()) => {}
            Err(StateStoreError::RunExists(_)) => {
                let existing = self.load_existing(run_id).await?;
                return Err(if existing.status.is_terminal() {
                    HostError::AlreadyFinished {
                        run_id: run_id.to_string(),
                        status: existing.status,
                    }
                } else {
                    HostError::AlreadyStarted(run_id.to_string())
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(run_id, workflow = W::NAME, task_queue = %self.task_queue, "Run created");
        self.dispatch(run_id).await?;
        Ok(record)
    }

    /// Starts a new execution of a finished run with a fresh input.
    pub async fn restart<W: Workflow>(
        &self,
        run_id: &str,
        input: &W::Input,
    ) -> Result<RunRecord, HostError> {
        let existing = self.load_existing(run_id).await?;
        if existing.workflow_type != W::NAME {
            return Err(HostError::WorkflowMismatch {
                run_id: run_id.to_string(),
                expected: W::NAME.to_string(),
                found: existing.workflow_type,
            });
        }
        if !existing.status.is_terminal() {
            return Err(HostError::AlreadyStarted(run_id.to_string()));
        }

        let record = self
            .store
            .restart_run(run_id, serde_json::to_vec(input)?)
            .await?;
        info!(
            run_id,
            execution_id = record.execution_id,
            previous_status = %existing.status,
            "Run restarted"
        );
        self.dispatch(run_id).await?;
        Ok(record)
    }

    /// Hands an unfinished run to the attached worker.
    pub async fn resume(&self, run_id: &str) -> Result<RunRecord, HostError> {
        let record = self.load_existing(run_id).await?;
        if record.status.is_terminal() {
            return Err(HostError::AlreadyFinished {
                run_id: run_id.to_string(),
                status: record.status,
            });
        }
        self.dispatch(run_id).await?;
        Ok(record)
    }

    /// Durably requests cancellation. The run stops at its next suspension
    /// point; its last checkpoint stays as it is.
    pub async fn cancel(&self, run_id: &str) -> Result<RunRecord, HostError> {
        let record = match self.store.request_cancel(run_id).await {
            Ok(record) => record,
            Err(StateStoreError::RunNotFound(id)) => return Err(HostError::RunNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        if let Some(worker) = &self.worker {
            worker
                .send(WorkerMsg::Cancel {
                    run_id: run_id.to_string(),
                })
                .await?;
        }
        Ok(record)
    }

    pub async fn describe(&self, run_id: &str) -> Result<RunProgress, HostError> {
        self.progress
            .run_status(run_id)
            .await
            .map_err(|e| match e {
                ProgressError::RunNotFound(id) => HostError::RunNotFound(id),
                e => e.into(),
            })
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, HostError> {
        Ok(self.store.load_run(run_id).await?)
    }

    /// Waits until the run leaves the attached worker.
    pub async fn wait(&self, run_id: &str) -> Result<RunOutcome, HostError> {
        let worker = self.worker.as_ref().ok_or(HostError::NoWorker)?;
        self.load_existing(run_id).await?;

        let (reply, rx) = oneshot::channel();
        worker
            .send(WorkerMsg::Subscribe {
                run_id: run_id.to_string(),
                reply,
            })
            .await?;
        rx.await.map_err(|_| HostError::Actor(ActorError::MailboxClosed))
    }

    async fn load_existing(&self, run_id: &str) -> Result<RunRecord, HostError> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or_else(|| HostError::RunNotFound(run_id.to_string()))
    }

    async fn dispatch(&self, run_id: &str) -> Result<(), HostError> {
        if let Some(worker) = &self.worker {
            worker
                .send(WorkerMsg::Dispatch {
                    run_id: run_id.to_string(),
                })
                .await?;
        }
        Ok(())
    }
}
