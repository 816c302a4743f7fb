use crate::{
    adapter::RowDestination,
    sql::{
        base::{error::DbError, table::TableRef},
        postgres::query,
    },
};
use async_trait::async_trait;
use model::records::row::{RowData, json_array};
use sqlx::PgPool;
use tracing::debug;

#[derive(Clone)]
pub struct PgDestination {
    pool: PgPool,
    table: TableRef,
}

impl PgDestination {
    pub fn new(pool: PgPool, table: TableRef) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl RowDestination for PgDestination {
    async fn upsert_rows(&self, rows: &[RowData]) -> Result<u64, DbError> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };

        // Rows of one table share a shape, so the first row names the columns.
        let columns = first.columns()?;
        if !columns.iter().any(|c| *c == self.table.key_column) {
            return Err(DbError::Write(format!(
                "rows of {} carry no '{}' column",
                self.table, self.table.key_column
            )));
        }

        let sql = query::upsert_rows(&self.table, &columns);
        let result = sqlx::query(&sql)
            .bind(json_array(rows))
            .execute(&self.pool)
            .await?;

        debug!(
            table = %self.table,
            rows = rows.len(),
            affected = result.rows_affected(),
            "Upserted rows"
        );
        Ok(result.rows_affected())
    }
}
