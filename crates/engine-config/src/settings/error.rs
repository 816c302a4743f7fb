use thiserror::Error;

/// Errors raised while reading migration settings from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// A required variable is not set or is blank.
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    /// A variable is set but does not parse.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Values that parse on their own but contradict each other.
    #[error("Inconsistent settings: {0}")]
    Inconsistent(String),

    #[error("Could not determine the home directory; set TRAWL_STATE_DIR")]
    NoHomeDir,
}
