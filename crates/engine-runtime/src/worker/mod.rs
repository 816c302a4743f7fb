use crate::{
    activity::{Activity, ActivityOptions, ActivityPool},
    actor::{ActorRef, spawn_actor},
    client::Client,
    context::HistoryLimits,
    control::ControlDir,
    error::{ActorError, HostError},
    workflow::{Registry, Workflow},
    worker::{actor::WorkerActor, messages::WorkerMsg, run::RunEnv},
};
use engine_core::{
    metrics::{Metrics, MetricsSnapshot},
    state::StateStore,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) mod actor;
pub mod messages;
pub(crate) mod run;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub task_queue: String,
    /// Upper bound on activity attempts in flight across all hosted runs.
    pub max_concurrent_activities: usize,
    pub activity: ActivityOptions,
    pub history: HistoryLimits,
    /// Drop-box for operator requests while this worker holds the store.
    pub control_dir: Option<PathBuf>,
    pub control_poll_interval: Duration,
}

impl WorkerOptions {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            max_concurrent_activities: 10,
            activity: ActivityOptions::default(),
            history: HistoryLimits::default(),
            control_dir: None,
            control_poll_interval: Duration::from_secs(5),
        }
    }
}

pub struct Worker {
    store: Arc<dyn StateStore>,
    options: WorkerOptions,
    registry: Registry,
    metrics: Metrics,
}

impl Worker {
    pub fn new(store: Arc<dyn StateStore>, options: WorkerOptions) -> Self {
        Self {
            store,
            options,
            registry: Registry::default(),
            metrics: Metrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn register_workflow<W: Workflow>(&mut self, workflow: W) -> &mut Self {
        self.registry.add_workflow(workflow);
        self
    }

    pub fn register_activity<A: Activity>(&mut self, activity: A) -> &mut Self {
        self.registry.add_activity(activity);
        self
    }

    /// Spawns the worker actor. It resumes every unfinished run of its task
    /// queue before taking new work.
    pub async fn start(self) -> Result<WorkerHandle, HostError> {
        let Worker {
            store,
            options,
            registry,
            metrics,
        } = self;

        let control = match &options.control_dir {
            Some(path) => Some(ControlDir::open(path).await?),
            None => None,
        };

        let pool = ActivityPool::new(
            registry.activities.clone(),
            options.max_concurrent_activities,
            metrics.clone(),
        );
        let shutdown = CancellationToken::new();
        let env = RunEnv {
            store: store.clone(),
            registry: Arc::new(registry),
            pool,
            activity_options: options.activity.clone(),
            limits: options.history,
            shutdown,
            metrics: metrics.clone(),
        };

        let actor = WorkerActor::new(
            env,
            options.task_queue.clone(),
            control,
            options.control_poll_interval,
        );
        let (actor_ref, join) = spawn_actor(format!("worker:{}", options.task_queue), 256, actor);
        actor_ref
            .send(WorkerMsg::SetActorRef(actor_ref.clone()))
            .await?;

        Ok(WorkerHandle {
            actor: actor_ref,
            join,
            store,
            task_queue: options.task_queue,
            metrics,
        })
    }
}

pub struct WorkerHandle {
    actor: ActorRef<WorkerMsg>,
    join: JoinHandle<()>,
    store: Arc<dyn StateStore>,
    task_queue: String,
    metrics: Metrics,
}

impl WorkerHandle {
    /// Client bound to this worker's task queue that also notifies the worker.
    pub fn client(&self) -> Client {
        Client::new(self.store.clone(), self.task_queue.clone()).with_worker(self.actor.clone())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Interrupts hosted runs and waits for the worker to stop. Interrupted
    /// runs stay `Running` in the store.
    pub async fn shutdown(self) -> Result<(), HostError> {
        match self.actor.send(WorkerMsg::Stop).await {
            Ok(()) | Err(ActorError::MailboxClosed) => {}
            Err(e) => return Err(e.into()),
        }
        self.join.await?;
        Ok(())
    }
}
