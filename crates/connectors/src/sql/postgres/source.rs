use crate::{
    adapter::RowSource,
    sql::{
        base::{error::DbError, table::TableRef},
        postgres::query,
    },
};
use async_trait::async_trait;
use model::{pagination::cursor::Cursor, records::row::RowData};
use serde_json::value::RawValue;
use sqlx::PgPool;
use tracing::debug;

#[derive(Clone)]
pub struct PgSource {
    pool: PgPool,
    table: TableRef,
    list_sql: String,
    fetch_sql: String,
}

impl PgSource {
    pub fn new(pool: PgPool, table: TableRef) -> Self {
        let list_sql = query::list_keys(&table);
        let fetch_sql = query::fetch_rows(&table);
        Self {
            pool,
            table,
            list_sql,
            fetch_sql,
        }
    }
}

#[async_trait]
impl RowSource for PgSource {
    async fn list_keys(&self, after: Cursor, limit: usize) -> Result<Vec<i64>, DbError> {
        let keys: Vec<i64> = sqlx::query_scalar(&self.list_sql)
            .bind(after.value())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        debug!(table = %self.table, after = %after, found = keys.len(), "Listed keys");
        Ok(keys)
    }

    async fn fetch_rows(&self, keys: &[i64]) -> Result<Vec<RowData>, DbError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, String)> = sqlx::query_as(&self.fetch_sql)
            .bind(keys)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(key, json)| Ok(RowData::new(key, RawValue::from_string(json)?)))
            .collect()
    }
}
