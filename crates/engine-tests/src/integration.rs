//! Runs against a real Postgres. Set `TRAWL_TEST_PG_URL` and run with
//! `--ignored`; source and destination are two schemas of that database.

use connectors::sql::{
    base::table::TableRef,
    postgres::{
        destination::PgDestination,
        pool::{PoolSettings, connect_pool},
        source::PgSource,
    },
};
use sqlx::PgPool;
use std::env;

pub const TEST_PG_URL_VAR: &str = "TRAWL_TEST_PG_URL";

const SOURCE_TABLE: &str = "trawl_src.audio_downloads";
const DESTINATION_TABLE: &str = "trawl_dst.audio_downloads";

pub async fn pg_pool() -> PgPool {
    let url = env::var(TEST_PG_URL_VAR).expect("TRAWL_TEST_PG_URL must be set");
    connect_pool("test", &url, &PoolSettings::default())
        .await
        .expect("connect postgres")
}

/// Recreates both schemas with an empty `audio_downloads` table and fills
/// the source with `rows` rows.
pub async fn reset_tables(pool: &PgPool, rows: i64) {
    for statement in [
        "DROP SCHEMA IF EXISTS trawl_src CASCADE",
        "DROP SCHEMA IF EXISTS trawl_dst CASCADE",
        "CREATE SCHEMA trawl_src",
        "CREATE SCHEMA trawl_dst",
        "CREATE TABLE trawl_src.audio_downloads (
            id BIGINT PRIMARY KEY,
            url TEXT NOT NULL,
            size_bytes BIGINT,
            downloaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "CREATE TABLE trawl_dst.audio_downloads (LIKE trawl_src.audio_downloads INCLUDING ALL)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("reset schema");
    }

    sqlx::query(
        "INSERT INTO trawl_src.audio_downloads (id, url, size_bytes)
         SELECT g, 'https://cdn.example.com/audio/' || g || '.mp3', g * 1024
         FROM generate_series(1, $1) AS g",
    )
    .bind(rows)
    .execute(pool)
    .await
    .expect("seed source");
}

pub fn source(pool: &PgPool) -> PgSource {
    PgSource::new(pool.clone(), TableRef::parse(SOURCE_TABLE, "id").expect("table"))
}

pub fn destination(pool: &PgPool) -> PgDestination {
    PgDestination::new(
        pool.clone(),
        TableRef::parse(DESTINATION_TABLE, "id").expect("table"),
    )
}

/// Row count and a checksum over every column of a table.
pub async fn fingerprint(pool: &PgPool, table: &str) -> (i64, String) {
    let sql = format!(
        "SELECT count(*), coalesce(md5(string_agg(t::text, ',' ORDER BY id)), '') FROM {table} t"
    );
    sqlx::query_as(&sql)
        .fetch_one(pool)
        .await
        .expect("fingerprint")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RUN_ID, Harness, start_worker, utils::wait_for_idle};
    use connectors::{
        adapter::{RowDestination, RowSource},
        memory::MemoryTable,
    };
    use engine_processing::MigrateTable;
    use model::pagination::cursor::Cursor;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    #[ignore = "needs TRAWL_TEST_PG_URL"]
    async fn migrates_a_postgres_table() {
        let pool = pg_pool().await;
        reset_tables(&pool, 250).await;

        let harness = Harness::new(MemoryTable::new());
        let worker = start_worker(
            harness.store.clone(),
            harness.options(),
            Arc::new(source(&pool)),
            Arc::new(destination(&pool)),
        )
        .await;
        let client = worker.client();

        client
            .start::<MigrateTable>(RUN_ID, &Cursor::START)
            .await
            .unwrap();
        wait_for_idle(&harness.store, RUN_ID, 1).await;

        assert_eq!(
            fingerprint(&pool, SOURCE_TABLE).await,
            fingerprint(&pool, DESTINATION_TABLE).await
        );
        assert_eq!(
            harness.store.load_checkpoint(RUN_ID).await.unwrap().unwrap().cursor,
            Cursor::new(250)
        );

        client.cancel(RUN_ID).await.unwrap();
        client.wait(RUN_ID).await.unwrap();
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs TRAWL_TEST_PG_URL"]
    async fn postgres_upsert_is_idempotent() {
        let pool = pg_pool().await;
        reset_tables(&pool, 20).await;
        let source = source(&pool);
        let destination = destination(&pool);

        let keys = source.list_keys(Cursor::new(10), 100).await.unwrap();
        assert_eq!(keys, (11..=20).collect::<Vec<_>>());

        let rows = source.fetch_rows(&keys).await.unwrap();
        destination.upsert_rows(&rows).await.unwrap();
        let once = fingerprint(&pool, DESTINATION_TABLE).await;
        destination.upsert_rows(&rows).await.unwrap();

        assert_eq!(fingerprint(&pool, DESTINATION_TABLE).await, once);
        assert_eq!(once.0, 10);
    }
}
