use crate::error::MigrationError;
use connectors::sql::base::error::DbError;
use engine_core::retry::RetryDisposition;
use engine_runtime::error::ActivityError;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const TOO_MANY_CONNECTIONS: &str = "53300";
const OPERATOR_INTERVENTION: &str = "57000";
const QUERY_CANCELED: &str = "57014";
const ADMIN_SHUTDOWN: &str = "57P01";
const CRASH_SHUTDOWN: &str = "57P02";
const CANNOT_CONNECT_NOW: &str = "57P03";
const FDW_UNABLE_TO_ESTABLISH_CONNECTION: &str = "HV00N";

pub fn classify_db_error(err: &DbError) -> RetryDisposition {
    match err {
        DbError::Io(_) => RetryDisposition::Retry,
        DbError::Sql(sql_err) => classify_sqlx_error(sql_err),
        DbError::Json(_) => RetryDisposition::Stop,
        DbError::Write(_) => RetryDisposition::Stop,
    }
}

pub fn classify_sqlx_error(err: &sqlx::Error) -> RetryDisposition {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RetryDisposition::Retry,
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) if is_retryable_pg_code(&code) => RetryDisposition::Retry,
            _ => RetryDisposition::Stop,
        },
        _ => RetryDisposition::Stop,
    }
}

/// Turns a connector failure into an activity failure the host knows how to
/// retry.
pub fn to_activity_error(err: MigrationError) -> ActivityError {
    match classify_db_error(err.db_error()) {
        RetryDisposition::Retry => ActivityError::retryable(err),
        RetryDisposition::Stop => ActivityError::non_retryable(err),
    }
}

fn is_retryable_pg_code(code: &str) -> bool {
    // Class 08: connection exceptions.
    code.starts_with("08")
        || matches!(
            code,
            SERIALIZATION_FAILURE
                | DEADLOCK_DETECTED
                | LOCK_NOT_AVAILABLE
                | TOO_MANY_CONNECTIONS
                | OPERATOR_INTERVENTION
                | QUERY_CANCELED
                | ADMIN_SHUTDOWN
                | CRASH_SHUTDOWN
                | CANNOT_CONNECT_NOW
                | FDW_UNABLE_TO_ESTABLISH_CONNECTION
        )
}
