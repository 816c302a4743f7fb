#![allow(dead_code)]

use connectors::{
    adapter::{RowDestination, RowSource},
    memory::MemoryTable,
};
use engine_core::{
    metrics::Metrics,
    retry::RetryPolicy,
    state::{StateStore, sled_store::SledStateStore},
};
use engine_processing::{
    MigrateTable, TASK_QUEUE,
    activities::{CopyBatch, ListBatch},
};
use engine_runtime::{
    activity::ActivityOptions,
    worker::{Worker, WorkerHandle, WorkerOptions},
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

pub mod integration;
pub mod scenarios;
pub mod utils;

pub const RUN_ID: &str = "audio-downloads";
pub const IDLE: Duration = Duration::from_secs(600);

/// Source and destination tables plus a state store that outlives the
/// workers started on it.
pub struct Harness {
    pub source: MemoryTable,
    pub destination: MemoryTable,
    pub store: Arc<dyn StateStore>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(source: MemoryTable) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SledStateStore::open(dir.path().join("state")).expect("open state store");
        Self {
            source,
            destination: MemoryTable::new(),
            store: Arc::new(store),
            _dir: dir,
        }
    }

    /// Worker options with instant retries, so tests do not wait on backoff.
    pub fn options(&self) -> WorkerOptions {
        let mut options = WorkerOptions::new(TASK_QUEUE);
        options.activity = ActivityOptions {
            start_to_close_timeout: Duration::from_secs(300),
            retry: RetryPolicy::new(5, Duration::ZERO, Duration::ZERO),
        };
        options
    }

    pub async fn start_worker(&self, options: WorkerOptions) -> WorkerHandle {
        start_worker(
            self.store.clone(),
            options,
            Arc::new(self.source.clone()),
            Arc::new(self.destination.clone()),
        )
        .await
    }
}

pub async fn start_worker(
    store: Arc<dyn StateStore>,
    options: WorkerOptions,
    source: Arc<dyn RowSource>,
    destination: Arc<dyn RowDestination>,
) -> WorkerHandle {
    let metrics = Metrics::new();
    let mut worker = Worker::new(store, options).with_metrics(metrics.clone());
    worker
        .register_workflow(MigrateTable::new(100, IDLE))
        .register_activity(ListBatch::new(source.clone()))
        .register_activity(CopyBatch::new(source, destination, metrics));
    worker.start().await.expect("start worker")
}
