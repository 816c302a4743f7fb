use crate::{
    activity::{Activity, ActivityOptions},
    context::{HistoryLimits, WorkflowContext},
    error::{ActivityError, WorkflowError},
    worker::{Worker, WorkerHandle, WorkerOptions},
    workflow::{Workflow, WorkflowExit},
};
use async_trait::async_trait;
use engine_core::{
    retry::RetryPolicy,
    state::{StateStore, sled_store::SledStateStore},
};
use model::pagination::cursor::Cursor;
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::Notify;

pub const QUEUE: &str = "test-queue";

/// Counts a cursor up to `target` one activity call at a time, then either
/// completes or idles forever.
pub struct CountUp {
    pub target: i64,
    pub idle: Option<Duration>,
}

#[async_trait]
impl Workflow for CountUp {
    type Input = Cursor;
    const NAME: &'static str = "count_up";

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        mut cursor: Cursor,
    ) -> Result<WorkflowExit<Cursor>, WorkflowError> {
        loop {
            ctx.check_cancelled()?;
            if ctx.continue_as_new_suggested() {
                return Ok(WorkflowExit::ContinueAsNew(cursor));
            }

            if cursor.value() >= self.target {
                match self.idle {
                    Some(idle) => {
                        ctx.sleep(idle).await?;
                        continue;
                    }
                    None => return Ok(WorkflowExit::Completed),
                }
            }

            let next = ctx.execute_activity::<Increment>(&cursor.value()).await?;
            cursor = cursor
                .advance_to(next)
                .map_err(|e| WorkflowError::Application(e.to_string()))?;
            ctx.checkpoint(cursor, 1).await?;
        }
    }
}

#[derive(Default)]
pub struct Script {
    pub transient_failures: u32,
    pub fatal_at: Option<i64>,
    pub stall_at: Option<i64>,
    pub slow_once: Option<Duration>,
}

enum Step {
    Ok,
    Transient,
    Fatal,
    Stall,
    Slow(Duration),
}

#[derive(Clone, Default)]
pub struct Increment {
    pub calls: Arc<Mutex<Vec<i64>>>,
    pub script: Arc<Mutex<Script>>,
    pub stalled: Arc<Notify>,
}

impl Increment {
    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }
}

#[async_trait]
impl Activity for Increment {
    type Input = i64;
    type Output = i64;
    const NAME: &'static str = "increment";

    async fn execute(&self, n: i64) -> Result<i64, ActivityError> {
        self.calls.lock().unwrap().push(n);

        let step = {
            let mut script = self.script.lock().unwrap();
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                Step::Transient
            } else if script.fatal_at == Some(n) {
                Step::Fatal
            } else if script.stall_at == Some(n) {
                script.stall_at = None;
                Step::Stall
            } else if let Some(delay) = script.slow_once.take() {
                Step::Slow(delay)
            } else {
                Step::Ok
            }
        };

        match step {
            Step::Ok => Ok(n + 1),
            Step::Transient => Err(ActivityError::retryable("connection reset")),
            Step::Fatal => Err(ActivityError::non_retryable(format!("rejected {n}"))),
            Step::Stall => {
                self.stalled.notify_one();
                std::future::pending().await
            }
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(n + 1)
            }
        }
    }
}

pub fn open_store(dir: &Path) -> Arc<dyn StateStore> {
    Arc::new(SledStateStore::open(dir).unwrap())
}

pub fn options(limits: HistoryLimits) -> WorkerOptions {
    let mut options = WorkerOptions::new(QUEUE);
    options.history = limits;
    options.activity = ActivityOptions {
        start_to_close_timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(5, Duration::ZERO, Duration::ZERO),
    };
    options
}

pub async fn start_worker(
    store: Arc<dyn StateStore>,
    options: WorkerOptions,
    workflow: CountUp,
    activity: Increment,
) -> WorkerHandle {
    let mut worker = Worker::new(store, options);
    worker.register_workflow(workflow).register_activity(activity);
    worker.start().await.unwrap()
}
