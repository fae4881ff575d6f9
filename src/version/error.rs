use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a version check.
///
/// Cloneable so that every caller coalesced onto one in-flight check
/// receives the same error.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("Failed to check {tool}: {source}")]
    Network {
        tool: String,
        #[source]
        source: Arc<SourceError>,
    },

    #[error("Timed out after {timeout:?} while checking {tool}")]
    Timeout { tool: String, timeout: Duration },

    #[error("Check for {tool} was interrupted: {reason}")]
    Interrupted { tool: String, reason: String },
}

impl CheckError {
    pub fn network(tool: &str, source: SourceError) -> Self {
        Self::Network {
            tool: tool.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::Network { tool, .. } | Self::Timeout { tool, .. } | Self::Interrupted { tool, .. } => {
                tool
            }
        }
    }

    /// Network and timeout failures are transient and eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version string: {0}")]
pub struct VersionParseError(pub String);
