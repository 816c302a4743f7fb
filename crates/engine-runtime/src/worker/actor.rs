use crate::{
    actor::{Actor, ActorContext, ActorRef},
    control::ControlDir,
    error::ActorError,
    worker::{
        messages::{RunOutcome, WorkerMsg},
        run::{RunEnv, host_run},
    },
};
use async_trait::async_trait;
use engine_core::{error::StateStoreError, progress::ProgressService};
use futures::future::join_all;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct HostedRun {
    cancel: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

/// Owns every run hosted by one worker.
///
/// Runs execute on their own tasks; the actor only starts them, relays
/// cancellation and collects their outcomes, so a run id is never hosted
/// twice by the same worker.
pub(crate) struct WorkerActor {
    env: RunEnv,
    task_queue: String,
    worker_id: Uuid,
    control: Option<ControlDir>,
    control_poll: Duration,
    progress: ProgressService,
    self_ref: Option<ActorRef<WorkerMsg>>,
    resumable: Vec<String>,
    active: HashMap<String, HostedRun>,
    waiters: HashMap<String, Vec<oneshot::Sender<RunOutcome>>>,
}

impl WorkerActor {
    pub(crate) fn new(
        env: RunEnv,
        task_queue: String,
        control: Option<ControlDir>,
        control_poll: Duration,
    ) -> Self {
        let progress = ProgressService::new(env.store.clone());
        Self {
            env,
            task_queue,
            worker_id: Uuid::new_v4(),
            control,
            control_poll,
            progress,
            self_ref: None,
            resumable: Vec::new(),
            active: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    async fn dispatch(&mut self, run_id: String) -> Result<(), ActorError> {
        if self.active.contains_key(&run_id) {
            debug!(run_id = %run_id, "Run already hosted by this worker");
            return Ok(());
        }
        if self.env.shutdown.is_cancelled() {
            return Ok(());
        }
        let Some(self_ref) = self.self_ref.clone() else {
            return Err(ActorError::Internal("worker is not initialized".into()));
        };

        match self.env.store.load_run(&run_id).await {
            Ok(Some(record)) if record.task_queue != self.task_queue => {
                warn!(
                    run_id = %run_id,
                    task_queue = %record.task_queue,
                    "Run belongs to another task queue"
                );
                return Ok(());
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(run_id = %run_id, "Dispatch for unknown run ignored");
                return Ok(());
            }
            Err(e) => return Err(ActorError::Internal(e.to_string())),
        }

        let cancel = CancellationToken::new();
        let env = self.env.clone();
        let token = cancel.clone();
        let id = run_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = host_run(env, id.clone(), token).await;
            let _ = self_ref
                .send(WorkerMsg::Finished {
                    run_id: id,
                    outcome: outcome.clone(),
                })
                .await;
            outcome
        });

        debug!(run_id = %run_id, worker_id = %self.worker_id, "Run dispatched");
        self.active.insert(run_id, HostedRun { cancel, handle });
        Ok(())
    }

    /// A task only ends with a final outcome after storing it, so a stored
    /// run that is `Running` again was restarted while the task wound down.
    /// The dispatch for that restart found the old task still hosted.
    async fn restarted_meanwhile(&self, run_id: &str, outcome: &RunOutcome) -> bool {
        if matches!(outcome, RunOutcome::Interrupted) {
            return false;
        }
        match self.env.store.load_run(run_id).await {
            Ok(Some(record)) => !record.status.is_terminal(),
            Ok(None) => false,
            Err(e) => {
                warn!(run_id, error = %e, "Failed to reload finished run");
                false
            }
        }
    }

    async fn cancel(&mut self, run_id: &str) -> Result<(), ActorError> {
        match self.env.store.request_cancel(run_id).await {
            Ok(record) => info!(run_id, status = %record.status, "Cancellation requested"),
            Err(StateStoreError::RunNotFound(_)) => {
                warn!(run_id, "Cancellation requested for unknown run");
                return Ok(());
            }
            Err(e) => return Err(ActorError::Internal(e.to_string())),
        }

        if let Some(run) = self.active.get(run_id) {
            run.cancel.cancel();
        }
        Ok(())
    }

    fn notify(&mut self, run_id: &str, outcome: &RunOutcome) {
        for waiter in self.waiters.remove(run_id).unwrap_or_default() {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn subscribe(&mut self, run_id: String, reply: oneshot::Sender<RunOutcome>) {
        if !self.active.contains_key(&run_id) {
            match self.env.store.load_run(&run_id).await {
                Ok(Some(record)) => {
                    if let Some(outcome) = RunOutcome::from_record(&record) {
                        let _ = reply.send(outcome);
                        return;
                    }
                }
                // Dropping the sender tells the caller there is nothing to wait for.
                Ok(None) => return,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Failed to load run for subscriber");
                    return;
                }
            }
        }
        self.waiters.entry(run_id).or_default().push(reply);
    }

    async fn publish(&self, run_id: &str) {
        let Some(control) = &self.control else {
            return;
        };
        match self.progress.run_status(run_id).await {
            Ok(progress) => {
                if let Err(e) = control.publish_status(&progress).await {
                    warn!(run_id, error = %e, "Failed to publish run status");
                }
            }
            Err(e) => warn!(run_id, error = %e, "Failed to read run status"),
        }
    }

    async fn poll_control(&mut self) -> Result<(), ActorError> {
        let Some(control) = self.control.clone() else {
            return Ok(());
        };

        let requests = control
            .take_cancel_requests()
            .await
            .map_err(|e| ActorError::Internal(e.to_string()))?;
        for run_id in requests {
            self.cancel(&run_id).await?;
        }

        let hosted: Vec<String> = self.active.keys().cloned().collect();
        for run_id in hosted {
            self.publish(&run_id).await;
        }
        Ok(())
    }

    fn spawn_control_ticker(&self, self_ref: ActorRef<WorkerMsg>) {
        if self.control.is_none() {
            return;
        }
        let shutdown = self.env.shutdown.clone();
        let period = self.control_poll;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if self_ref.try_send(WorkerMsg::PollControl).is_err() && self_ref.is_closed() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn stop(&mut self, ctx: &ActorContext) {
        info!(
            worker_id = %self.worker_id,
            hosted = self.active.len(),
            "Stopping worker"
        );
        self.env.shutdown.cancel();

        let (run_ids, handles): (Vec<String>, Vec<JoinHandle<RunOutcome>>) = self
            .active
            .drain()
            .map(|(run_id, run)| (run_id, run.handle))
            .unzip();

        for (run_id, joined) in run_ids.into_iter().zip(join_all(handles).await) {
            let outcome = joined.unwrap_or(RunOutcome::Interrupted);
            self.publish(&run_id).await;
            self.notify(&run_id, &outcome);
        }
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(RunOutcome::Interrupted);
            }
        }

        ctx.stop();
    }
}

#[async_trait]
impl Actor<WorkerMsg> for WorkerActor {
    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        let runs = self
            .env
            .store
            .list_runs()
            .await
            .map_err(|e| ActorError::Internal(e.to_string()))?;

        self.resumable = runs
            .into_iter()
            .filter(|r| r.task_queue == self.task_queue && !r.status.is_terminal())
            .map(|r| r.run_id)
            .collect();

        info!(
            actor = ctx.name(),
            worker_id = %self.worker_id,
            task_queue = %self.task_queue,
            resumable = self.resumable.len(),
            "Worker started"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: WorkerMsg, ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            WorkerMsg::SetActorRef(actor_ref) => {
                self.spawn_control_ticker(actor_ref.clone());
                self.self_ref = Some(actor_ref);
                for run_id in std::mem::take(&mut self.resumable) {
                    info!(run_id = %run_id, "Resuming run");
                    self.dispatch(run_id).await?;
                }
            }
            WorkerMsg::Dispatch { run_id } => self.dispatch(run_id).await?,
            WorkerMsg::Cancel { run_id } => self.cancel(&run_id).await?,
            WorkerMsg::Finished { run_id, outcome } => {
                self.active.remove(&run_id);
                if self.restarted_meanwhile(&run_id, &outcome).await {
                    info!(run_id = %run_id, %outcome, "Run restarted before its task ended, hosting it again");
                    return self.dispatch(run_id).await;
                }
                self.publish(&run_id).await;
                let metrics = self.env.metrics.snapshot();
                info!(
                    run_id = %run_id,
                    %outcome,
                    batches = metrics.batches_copied,
                    rows = metrics.rows_copied,
                    retries = metrics.activity_retries,
                    "Run left worker"
                );
                self.notify(&run_id, &outcome);
            }
            WorkerMsg::Subscribe { run_id, reply } => self.subscribe(run_id, reply).await,
            WorkerMsg::PollControl => self.poll_control().await?,
            WorkerMsg::Stop => self.stop(ctx).await,
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        let metrics = self.env.metrics.snapshot();
        info!(
            actor = ctx.name(),
            rows = metrics.rows_copied,
            batches = metrics.batches_copied,
            failures = metrics.activity_failures,
            retries = metrics.activity_retries,
            "Worker stopped"
        );
        Ok(())
    }
}
