use connectors::sql::base::error::ConnectorError;
use engine_config::settings::SettingsError;
use engine_core::error::StateStoreError;
use engine_runtime::error::HostError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to connect: {0}")]
    Connector(#[from] ConnectorError),

    #[error("State store error: {0}")]
    Store(#[from] StateStoreError),

    #[error("{0}")]
    Host(#[from] HostError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
