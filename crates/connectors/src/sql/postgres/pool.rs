use crate::sql::base::error::ConnectorError;
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::{str::FromStr, time::Duration};
use tracing::info;

/// Sizing of a shared connection pool. Activity invocations wait for a free
/// connection instead of opening new ones past `max_connections`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub async fn connect_pool(
    label: &str,
    url: &str,
    settings: &PoolSettings,
) -> Result<PgPool, ConnectorError> {
    let options =
        PgConnectOptions::from_str(url).map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;

    let pool = PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await?;

    info!(
        pool = label,
        min = settings.min_connections,
        max = settings.max_connections,
        "Postgres pool ready"
    );
    Ok(pool)
}
