use engine_core::state::{
    StateStore,
    models::{HistoryEvent, RunRecord},
};
use model::pagination::cursor::Cursor;
use std::sync::Arc;

fn timers_started(history: &[HistoryEvent]) -> usize {
    history
        .iter()
        .filter(|e| matches!(e, HistoryEvent::TimerStarted { .. }))
        .count()
}

/// Waits until the current execution of `run_id` has started its `n`th idle
/// timer and is parked on it. Panics if the run finishes first.
pub async fn wait_for_idle(store: &Arc<dyn StateStore>, run_id: &str, n: usize) -> RunRecord {
    loop {
        if let Some(record) = store.load_run(run_id).await.expect("load run") {
            assert!(
                !record.status.is_terminal(),
                "run finished as {} before idling: {:?}",
                record.status,
                record.failure
            );

            let history = store
                .load_history(run_id, record.execution_id)
                .await
                .expect("load history");
            if timers_started(&history) >= n
                && matches!(history.last(), Some(HistoryEvent::TimerStarted { .. }))
            {
                return record;
            }
        }
        tokio::task::yield_now().await;
    }
}

/// Cursors checkpointed by one execution, in order.
pub async fn checkpointed_cursors(
    store: &Arc<dyn StateStore>,
    run_id: &str,
    execution_id: u64,
) -> Vec<Cursor> {
    store
        .load_history(run_id, execution_id)
        .await
        .expect("load history")
        .into_iter()
        .filter_map(|e| match e {
            HistoryEvent::CheckpointRecorded { cursor, .. } => Some(cursor),
            _ => None,
        })
        .collect()
}

pub fn row(key: i64) -> serde_json::Value {
    serde_json::json!({ "id": key, "payload": format!("row-{key}") })
}
