use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::version::error::{CheckError, VersionParseError};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Update already in progress for {0}")]
    ConcurrentUpdate(String),

    #[error("{0} is not updatable: no installation found")]
    NotUpdatable(String),

    #[error("Update of {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("Failed to install {tool}@{version}: {source}")]
    Install {
        tool: String,
        version: String,
        #[source]
        source: ExecutorError,
    },

    #[error("Verification failed for {tool}: expected {expected}, found {found:?}")]
    Verification {
        tool: String,
        expected: String,
        found: Option<String>,
    },

    #[error("Backup of {tool} failed: {source}")]
    Backup {
        tool: String,
        #[source]
        source: BackupError,
    },

    #[error(transparent)]
    VersionParse(#[from] VersionParseError),

    #[error(transparent)]
    Check(#[from] CheckError),
}

/// Failure reported by an [`UpdateExecutor`](crate::update::executor::UpdateExecutor)
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Command failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backup metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Backup {0:?} has no metadata describing where to restore it")]
    MissingMetadata(PathBuf),

    #[error("No backup found for {0}")]
    NoBackup(String),

    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),
}
