use connectors::sql::base::error::DbError;
use thiserror::Error;

/// Failures raised inside the list and copy activities, tagged with the side
/// of the migration they came from.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Source error: {0}")]
    Source(#[source] DbError),

    #[error("Destination error: {0}")]
    Destination(#[source] DbError),
}

impl MigrationError {
    pub fn db_error(&self) -> &DbError {
        match self {
            MigrationError::Source(e) | MigrationError::Destination(e) => e,
        }
    }
}
