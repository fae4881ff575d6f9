//! Source trait for querying installed and published tool versions

use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::version::error::SourceError;

/// Trait for looking up version facts about a named tool
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait VersionSource: Send + Sync {
    /// Returns whether the tool is installed locally
    async fn is_installed(&self, tool: &str) -> Result<bool, SourceError>;

    /// Returns the locally installed version, or `None` if it cannot be determined
    async fn get_current_version(&self, tool: &str) -> Result<Option<String>, SourceError>;

    /// Fetches the latest published version
    ///
    /// # Arguments
    /// * `tool` - The tool name (e.g., "npm", "typescript")
    /// * `timeout` - Upper bound for the lookup, if the source enforces one itself
    async fn get_latest_version(&self, tool: &str, timeout: Duration)
    -> Result<String, SourceError>;

    /// URL of the release notes for `version`, if known
    fn get_release_notes_url(&self, _tool: &str, _version: &str) -> Option<String> {
        None
    }

    /// URL the given version can be downloaded from, if known
    fn get_download_url(&self, _tool: &str, _version: &str) -> Option<String> {
        None
    }
}
