use thiserror::Error;

use crate::schedule::error::ScheduleError;

/// Rejected configuration or persisted state. Nothing is applied when this is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed state document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
}
