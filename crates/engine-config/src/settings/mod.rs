//! Migration settings read from an environment map.
//!
//! Every value has a default except the connection strings, which only the
//! commands that touch a database ask for.

use std::{collections::HashMap, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use tracing::debug;

pub mod error;

pub use error::SettingsError;

pub const SRC_DSN: &str = "SRC_DSN";
pub const DST_DSN: &str = "DST_DSN";
pub const TABLE: &str = "TRAWL_TABLE";
pub const KEY_COLUMN: &str = "TRAWL_KEY_COLUMN";
pub const TASK_QUEUE: &str = "TRAWL_TASK_QUEUE";
pub const STATE_DIR: &str = "TRAWL_STATE_DIR";
pub const BATCH_SIZE: &str = "TRAWL_BATCH_SIZE";
pub const ACTIVITY_TIMEOUT_SECS: &str = "TRAWL_ACTIVITY_TIMEOUT_SECS";
pub const IDLE_INTERVAL_SECS: &str = "TRAWL_IDLE_INTERVAL_SECS";
pub const MAX_CONCURRENT_ACTIVITIES: &str = "TRAWL_MAX_CONCURRENT_ACTIVITIES";
pub const POOL_MIN: &str = "TRAWL_POOL_MIN";
pub const POOL_MAX: &str = "TRAWL_POOL_MAX";
pub const MAX_ATTEMPTS: &str = "TRAWL_MAX_ATTEMPTS";
pub const HISTORY_MAX_EVENTS: &str = "TRAWL_HISTORY_MAX_EVENTS";
pub const HISTORY_MAX_BYTES: &str = "TRAWL_HISTORY_MAX_BYTES";

const DEFAULT_TABLE: &str = "audio_downloads";
const DEFAULT_KEY_COLUMN: &str = "id";
const DEFAULT_TASK_QUEUE: &str = "migration-workers";
const STATE_SUBDIR: &str = ".trawl/state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub source_dsn: Option<String>,
    pub destination_dsn: Option<String>,
    pub table: String,
    pub key_column: String,
    pub task_queue: String,
    pub state_dir: PathBuf,
    pub batch_size: usize,
    /// Start-to-close bound of a single activity attempt.
    pub activity_timeout: Duration,
    /// How long the migration waits after finding no new rows.
    pub idle_interval: Duration,
    pub max_concurrent_activities: usize,
    pub pool_min: u32,
    pub pool_max: u32,
    pub max_attempts: u32,
    pub history_max_events: u64,
    pub history_max_bytes: u64,
}

impl MigrationSettings {
    pub fn from_env(vars: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let state_dir = match non_blank(vars, STATE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or(SettingsError::NoHomeDir)?
                .join(STATE_SUBDIR),
        };

        let settings = Self {
            source_dsn: non_blank(vars, SRC_DSN).map(str::to_string),
            destination_dsn: non_blank(vars, DST_DSN).map(str::to_string),
            table: non_blank(vars, TABLE).unwrap_or(DEFAULT_TABLE).to_string(),
            key_column: non_blank(vars, KEY_COLUMN)
                .unwrap_or(DEFAULT_KEY_COLUMN)
                .to_string(),
            task_queue: non_blank(vars, TASK_QUEUE)
                .unwrap_or(DEFAULT_TASK_QUEUE)
                .to_string(),
            state_dir,
            batch_size: positive(vars, BATCH_SIZE, 100)?,
            activity_timeout: Duration::from_secs(positive(vars, ACTIVITY_TIMEOUT_SECS, 300)?),
            idle_interval: Duration::from_secs(positive(vars, IDLE_INTERVAL_SECS, 600)?),
            max_concurrent_activities: positive(vars, MAX_CONCURRENT_ACTIVITIES, 10)?,
            pool_min: parse_or(vars, POOL_MIN, 2)?,
            pool_max: positive(vars, POOL_MAX, 10)?,
            max_attempts: positive(vars, MAX_ATTEMPTS, 10)?,
            history_max_events: positive(vars, HISTORY_MAX_EVENTS, 10_000)?,
            history_max_bytes: positive(vars, HISTORY_MAX_BYTES, 10 * 1024 * 1024)?,
        };

        if settings.pool_min > settings.pool_max {
            return Err(SettingsError::Inconsistent(format!(
                "{POOL_MIN} ({}) exceeds {POOL_MAX} ({})",
                settings.pool_min, settings.pool_max
            )));
        }

        debug!(
            table = %settings.table,
            task_queue = %settings.task_queue,
            state_dir = %settings.state_dir.display(),
            batch_size = settings.batch_size,
            "Loaded migration settings"
        );
        Ok(settings)
    }

    pub fn require_source_dsn(&self) -> Result<&str, SettingsError> {
        self.source_dsn.as_deref().ok_or(SettingsError::Missing(SRC_DSN))
    }

    pub fn require_destination_dsn(&self) -> Result<&str, SettingsError> {
        self.destination_dsn
            .as_deref()
            .ok_or(SettingsError::Missing(DST_DSN))
    }

    /// Directory for operator requests to a worker that holds the store.
    pub fn control_dir(&self) -> PathBuf {
        self.state_dir.with_extension("control")
    }
}

fn non_blank<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_blank(vars, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| SettingsError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn positive<T>(vars: &HashMap<String, String>, key: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: Display,
{
    let value = parse_or(vars, key, default)?;
    if value <= T::default() {
        return Err(SettingsError::Invalid {
            key,
            value: vars.get(key).cloned().unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = MigrationSettings::from_env(&env(&[(STATE_DIR, "/tmp/trawl")])).unwrap();

        assert_eq!(settings.table, "audio_downloads");
        assert_eq!(settings.key_column, "id");
        assert_eq!(settings.task_queue, "migration-workers");
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.activity_timeout, Duration::from_secs(300));
        assert_eq!(settings.idle_interval, Duration::from_secs(600));
        assert_eq!(settings.max_concurrent_activities, 10);
        assert_eq!((settings.pool_min, settings.pool_max), (2, 10));
        assert_eq!(settings.history_max_events, 10_000);
        assert_eq!(settings.control_dir(), PathBuf::from("/tmp/trawl.control"));
        assert_eq!(
            settings.require_source_dsn(),
            Err(SettingsError::Missing(SRC_DSN))
        );
    }

    #[test]
    fn reads_overrides() {
        let settings = MigrationSettings::from_env(&env(&[
            (STATE_DIR, "/var/lib/trawl"),
            (SRC_DSN, "postgres://src/db"),
            (DST_DSN, "postgres://dst/db"),
            (TABLE, "events"),
            (BATCH_SIZE, " 500 "),
            (IDLE_INTERVAL_SECS, "5"),
        ]))
        .unwrap();

        assert_eq!(settings.require_source_dsn(), Ok("postgres://src/db"));
        assert_eq!(settings.require_destination_dsn(), Ok("postgres://dst/db"));
        assert_eq!(settings.table, "events");
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.idle_interval, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unparsable_and_zero_values() {
        let err = MigrationSettings::from_env(&env(&[(STATE_DIR, "/tmp/t"), (BATCH_SIZE, "lots")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: BATCH_SIZE, .. }));

        let err = MigrationSettings::from_env(&env(&[(STATE_DIR, "/tmp/t"), (BATCH_SIZE, "0")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: BATCH_SIZE, .. }));
    }

    #[test]
    fn rejects_pool_bounds_out_of_order() {
        let err = MigrationSettings::from_env(&env(&[
            (STATE_DIR, "/tmp/t"),
            (POOL_MIN, "8"),
            (POOL_MAX, "4"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Inconsistent(_)));
    }
}
