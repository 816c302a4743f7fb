use crate::sql::base::error::DbError;
use async_trait::async_trait;
use model::{pagination::cursor::Cursor, records::row::RowData};

/// Read side of a keyset migration.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Returns up to `limit` primary keys strictly greater than `after`,
    /// ascending. Must not modify the source.
    async fn list_keys(&self, after: Cursor, limit: usize) -> Result<Vec<i64>, DbError>;

    /// Fetches the full rows for `keys`. Keys without a row are skipped.
    async fn fetch_rows(&self, keys: &[i64]) -> Result<Vec<RowData>, DbError>;
}

/// Write side of a keyset migration.
#[async_trait]
pub trait RowDestination: Send + Sync {
    /// Inserts or replaces `rows` by primary key. Applying the same rows twice
    /// leaves the destination as applying them once.
    async fn upsert_rows(&self, rows: &[RowData]) -> Result<u64, DbError>;
}
