#[cfg(test)]
mod tests {
    use crate::{
        Harness, IDLE, RUN_ID, start_worker,
        utils::{checkpointed_cursors, row, wait_for_idle},
    };
    use async_trait::async_trait;
    use connectors::{
        adapter::RowSource,
        memory::{Fault, MemoryTable, TableOp},
        sql::base::error::DbError,
    };
    use engine_core::state::models::RunStatus;
    use engine_processing::MigrateTable;
    use engine_runtime::{context::HistoryLimits, worker::messages::RunOutcome};
    use model::{pagination::cursor::Cursor, records::row::RowData};
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn upserted_batches(table: &MemoryTable) -> Vec<Vec<i64>> {
        table
            .calls(TableOp::UpsertRows)
            .into_iter()
            .map(|c| c.keys)
            .collect()
    }

    // Scenario: ids 1..=250, batch size 100, no new rows arrive.
    // Expected Outcome: three batches, cursor 0 -> 100 -> 200 -> 250, the
    // fourth listing comes back empty and the run idles. Cancelling while
    // idle leaves the cursor where it was.
    #[traced_test]
    #[tokio::test]
    async fn copies_250_rows_in_three_batches_then_idles() {
        let harness = Harness::new(MemoryTable::with_keys(1..=250));
        let worker = harness.start_worker(harness.options()).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        let record = wait_for_idle(&harness.store, RUN_ID, 1).await;

        assert_eq!(
            upserted_batches(&harness.destination),
            vec![
                (1..=100).collect::<Vec<_>>(),
                (101..=200).collect(),
                (201..=250).collect(),
            ]
        );
        assert_eq!(harness.source.calls(TableOp::ListKeys).len(), 4);
        assert_eq!(
            checkpointed_cursors(&harness.store, RUN_ID, record.execution_id).await,
            vec![Cursor::new(100), Cursor::new(200), Cursor::new(250)]
        );
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());
        assert!(logs_contain("Run created"));

        client.cancel(RUN_ID).await.unwrap();
        assert_eq!(client.wait(RUN_ID).await.unwrap(), RunOutcome::Cancelled);

        let checkpoint = harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap();
        assert_eq!(checkpoint.cursor, Cursor::new(250));
        assert_eq!(checkpoint.batches_copied, 3);
        assert_eq!(checkpoint.rows_copied, 250);
        assert_eq!(
            harness.store.load_run(RUN_ID).await.unwrap().unwrap().status,
            RunStatus::Cancelled
        );
        worker.shutdown().await.unwrap();
    }

    // Scenario: 1001 rows with no gaps.
    // Expected Outcome: the cursor reaches the last key after 11 copy cycles
    // and a single empty listing.
    #[tokio::test]
    async fn reaches_the_last_key_in_ceil_n_over_batch_cycles() {
        let harness = Harness::new(MemoryTable::with_keys(1..=1001));
        let worker = harness.start_worker(harness.options()).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        wait_for_idle(&harness.store, RUN_ID, 1).await;

        assert_eq!(harness.destination.calls(TableOp::UpsertRows).len(), 11);
        assert_eq!(harness.source.calls(TableOp::ListKeys).len(), 12);
        let checkpoint = harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap();
        assert_eq!(checkpoint.cursor, Cursor::new(1001));
        assert_eq!(harness.destination.len(), 1001);

        client.cancel(RUN_ID).await.unwrap();
        client.wait(RUN_ID).await.unwrap();
        worker.shutdown().await.unwrap();
    }

    // Scenario: the table drains, then new rows arrive while the run idles.
    // Expected Outcome: no listing happens before the idle interval has
    // passed; the next one picks the new rows up.
    #[tokio::test(start_paused = true)]
    async fn waits_the_idle_interval_before_listing_again() {
        let harness = Harness::new(MemoryTable::with_keys(1..=5));
        let worker = harness.start_worker(harness.options()).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        wait_for_idle(&harness.store, RUN_ID, 1).await;
        for key in 6..=8 {
            harness.source.insert(key, row(key));
        }

        tokio::time::sleep(IDLE + std::time::Duration::from_secs(1)).await;
        wait_for_idle(&harness.store, RUN_ID, 2).await;

        let listings = harness.source.calls(TableOp::ListKeys);
        assert_eq!(listings.len(), 4);
        assert!(listings[2].at.duration_since(listings[1].at) >= IDLE);
        assert_eq!(
            harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap().cursor,
            Cursor::new(8)
        );
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());

        client.cancel(RUN_ID).await.unwrap();
        assert_eq!(client.wait(RUN_ID).await.unwrap(), RunOutcome::Cancelled);
        worker.shutdown().await.unwrap();
    }

    // Scenario: the first upsert fails with a connection reset, then succeeds.
    // Expected Outcome: every row is copied exactly once and the cursor
    // advances once per batch.
    #[traced_test]
    #[tokio::test]
    async fn transient_copy_failure_is_retried_without_duplicates() {
        let harness = Harness::new(MemoryTable::with_keys(1..=250));
        harness.destination.fail_next(
            TableOp::UpsertRows,
            Fault::Transient("connection reset by peer".into()),
        );
        let worker = harness.start_worker(harness.options()).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        let record = wait_for_idle(&harness.store, RUN_ID, 1).await;

        let batches = upserted_batches(&harness.destination);
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], batches[1]);
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());
        assert_eq!(
            checkpointed_cursors(&harness.store, RUN_ID, record.execution_id).await,
            vec![Cursor::new(100), Cursor::new(200), Cursor::new(250)]
        );
        assert_eq!(worker.metrics().activity_retries, 1);
        assert_eq!(worker.metrics().rows_copied, 250);

        client.cancel(RUN_ID).await.unwrap();
        client.wait(RUN_ID).await.unwrap();
        worker.shutdown().await.unwrap();
    }

    // Scenario: the destination rejects the second batch with a constraint
    // violation.
    // Expected Outcome: the run fails after a single attempt, the first
    // batch's checkpoint survives, and a restart from it finishes the copy.
    #[tokio::test(start_paused = true)]
    async fn rejected_batch_fails_the_run_and_restart_resumes_from_checkpoint() {
        let harness = Harness::new(MemoryTable::with_keys(1..=100));
        let worker = harness.start_worker(harness.options()).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        wait_for_idle(&harness.store, RUN_ID, 1).await;

        harness.destination.fail_next(
            TableOp::UpsertRows,
            Fault::Rejected("null value in column \"payload\" violates not-null constraint".into()),
        );
        for key in 101..=150 {
            harness.source.insert(key, row(key));
        }

        let error = match client.wait(RUN_ID).await.unwrap() {
            RunOutcome::Failed { error } => error,
            other => panic!("expected failure, got {other:?}"),
        };
        assert!(error.contains("not-null constraint"), "{error}");
        assert!(error.contains("Destination error"), "{error}");
        assert_eq!(harness.destination.calls(TableOp::UpsertRows).len(), 2);

        let checkpoint = harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap();
        assert_eq!(checkpoint.cursor, Cursor::new(100));
        let record = harness.store.load_run(RUN_ID).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.failure.is_some());

        client
            .restart::<MigrateTable>(RUN_ID, &checkpoint.cursor)
            .await
            .unwrap();
        let record = wait_for_idle(&harness.store, RUN_ID, 1).await;
        assert_eq!(record.execution_id, 2);
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());

        client.cancel(RUN_ID).await.unwrap();
        client.wait(RUN_ID).await.unwrap();
        worker.shutdown().await.unwrap();
    }

    // Scenario: the worker stops while the first upsert has been applied but
    // not acknowledged.
    // Expected Outcome: a new worker replays the run, re-applies only that
    // batch and ends with the same destination as an uninterrupted run.
    #[tokio::test]
    async fn resumes_an_interrupted_copy_on_the_next_worker() {
        let harness = Harness::new(MemoryTable::with_keys(1..=250));
        harness
            .destination
            .fail_next(TableOp::UpsertRows, Fault::ApplyThenStall);

        let worker = harness.start_worker(harness.options()).await;
        worker
            .client()
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        harness.destination.wait_for_stall().await;
        worker.shutdown().await.unwrap();

        let record = harness.store.load_run(RUN_ID).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert!(harness.store.load_checkpoint(RUN_ID).await.unwrap().is_none());
        assert_eq!(harness.destination.len(), 100);

        let worker = harness.start_worker(harness.options()).await;
        wait_for_idle(&harness.store, RUN_ID, 1).await;

        let batches = upserted_batches(&harness.destination);
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], batches[1]);
        // The first listing came back from history instead of running again.
        assert_eq!(harness.source.calls(TableOp::ListKeys).len(), 4);
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());
        assert_eq!(
            harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap().rows_copied,
            250
        );

        let client = worker.client();
        client.cancel(RUN_ID).await.unwrap();
        client.wait(RUN_ID).await.unwrap();
        worker.shutdown().await.unwrap();
    }

    // Scenario: history may hold at most 8 events, one batch records 5.
    // Expected Outcome: every execution copies two batches and continues as
    // new; the run still reaches the last key with its totals intact.
    #[tokio::test]
    async fn continues_as_new_and_keeps_the_cursor() {
        let harness = Harness::new(MemoryTable::with_keys(1..=1000));
        let mut options = harness.options();
        options.history = HistoryLimits {
            max_events: 8,
            max_bytes: u64::MAX,
        };
        let worker = harness.start_worker(options).await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        let record = wait_for_idle(&harness.store, RUN_ID, 1).await;

        assert_eq!(record.execution_id, 6);
        assert_eq!(record.continued_from, Some(5));
        assert!(harness.store.load_history(RUN_ID, 1).await.unwrap().is_empty());

        let checkpoint = harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap();
        assert_eq!(checkpoint.cursor, Cursor::new(1000));
        assert_eq!(checkpoint.batches_copied, 10);
        assert_eq!(checkpoint.rows_copied, 1000);
        assert_eq!(harness.destination.calls(TableOp::UpsertRows).len(), 10);
        assert_eq!(harness.destination.snapshot(), harness.source.snapshot());

        client.cancel(RUN_ID).await.unwrap();
        assert_eq!(client.wait(RUN_ID).await.unwrap(), RunOutcome::Cancelled);
        worker.shutdown().await.unwrap();
    }

    /// Source that lists keys out of order.
    struct Unordered;

    #[async_trait]
    impl RowSource for Unordered {
        async fn list_keys(&self, _after: Cursor, _limit: usize) -> Result<Vec<i64>, DbError> {
            Ok(vec![7, 3])
        }

        async fn fetch_rows(&self, _keys: &[i64]) -> Result<Vec<RowData>, DbError> {
            Ok(Vec::new())
        }
    }

    // Scenario: the source returns keys that are not ascending.
    // Expected Outcome: the run fails before copying anything.
    #[tokio::test]
    async fn out_of_order_listing_fails_the_run() {
        let harness = Harness::new(MemoryTable::new());
        let worker = start_worker(
            harness.store.clone(),
            harness.options(),
            Arc::new(Unordered),
            Arc::new(harness.destination.clone()),
        )
        .await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        let outcome = client.wait(RUN_ID).await.unwrap();
        assert!(
            matches!(&outcome, RunOutcome::Failed { error } if error.contains("not strictly ascending")),
            "{outcome:?}"
        );
        assert!(harness.destination.calls(TableOp::UpsertRows).is_empty());
        worker.shutdown().await.unwrap();
    }
}
