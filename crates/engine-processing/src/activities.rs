use crate::{error::MigrationError, retry::to_activity_error};
use async_trait::async_trait;
use connectors::adapter::{RowDestination, RowSource};
use engine_core::metrics::Metrics;
use engine_runtime::{activity::Activity, error::ActivityError};
use model::{pagination::cursor::Cursor, records::batch::CopyOutcome};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Input of [`ListBatch`]: the keys to list come strictly after `after`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub after: Cursor,
    pub limit: usize,
}

/// Lists the next batch of primary keys. Read-only, so any number of
/// repeats is harmless.
pub struct ListBatch {
    source: Arc<dyn RowSource>,
}

impl ListBatch {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Activity for ListBatch {
    type Input = ListRequest;
    type Output = Vec<i64>;
    const NAME: &'static str = "list_batch";

    async fn execute(&self, request: ListRequest) -> Result<Vec<i64>, ActivityError> {
        let keys = self
            .source
            .list_keys(request.after, request.limit)
            .await
            .map_err(|e| to_activity_error(MigrationError::Source(e)))?;

        debug!(cursor = %request.after, batch_size = keys.len(), "Listed keys");
        Ok(keys)
    }
}

/// Copies the rows behind a batch of keys from source to destination with
/// one bulk upsert.
pub struct CopyBatch {
    source: Arc<dyn RowSource>,
    destination: Arc<dyn RowDestination>,
    metrics: Metrics,
}

impl CopyBatch {
    pub fn new(
        source: Arc<dyn RowSource>,
        destination: Arc<dyn RowDestination>,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            destination,
            metrics,
        }
    }
}

#[async_trait]
impl Activity for CopyBatch {
    type Input = Vec<i64>;
    type Output = CopyOutcome;
    const NAME: &'static str = "copy_batch";

    async fn execute(&self, keys: Vec<i64>) -> Result<CopyOutcome, ActivityError> {
        if keys.is_empty() {
            return Ok(CopyOutcome::default());
        }

        let rows = self
            .source
            .fetch_rows(&keys)
            .await
            .map_err(|e| to_activity_error(MigrationError::Source(e)))?;

        if rows.len() < keys.len() {
            let found: HashSet<i64> = rows.iter().map(|r| r.key).collect();
            let vanished: Vec<i64> = keys.iter().copied().filter(|k| !found.contains(k)).collect();
            warn!(?vanished, "Rows disappeared from the source after listing; skipping them");
        }

        if rows.is_empty() {
            return Ok(CopyOutcome {
                requested: keys.len(),
                copied: 0,
            });
        }

        let bytes: usize = rows.iter().map(|r| r.size_bytes()).sum();
        self.destination
            .upsert_rows(&rows)
            .await
            .map_err(|e| to_activity_error(MigrationError::Destination(e)))?;

        self.metrics.increment_batches(1);
        self.metrics.increment_rows(rows.len() as u64);
        self.metrics.increment_bytes(bytes as u64);

        debug!(batch_size = rows.len(), bytes, "Upserted rows");
        Ok(CopyOutcome {
            requested: keys.len(),
            copied: rows.len(),
        })
    }
}
