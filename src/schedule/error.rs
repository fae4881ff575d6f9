use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("No schedule found for {0}")]
    NotFound(String),

    #[error("Invalid interval {interval:?} for {tool}: must be greater than zero")]
    InvalidInterval { tool: String, interval: Duration },
}
