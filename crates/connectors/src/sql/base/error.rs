use thiserror::Error;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Low‐level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any SQL driver error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// A row body could not be decoded as JSON.
    #[error("Row decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing rows to the database failed at the application level.
    #[error("Write error: {0}")]
    Write(String),
}

/// Errors happening during pool or connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid table reference: {0}")]
    InvalidTable(String),

    /// SQLx failed to build the connection or pool.
    #[error("SQLx connector creation failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}
