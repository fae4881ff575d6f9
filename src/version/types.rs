//! Common types shared by the version layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version::compare::{CompareResult, compare_versions};

/// Snapshot of a tool's install and version state at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Tool name, also the cache key
    pub tool: String,
    /// Version reported by the local installation
    pub current_version: Option<String>,
    /// Latest version published upstream
    pub latest_version: Option<String>,
    /// Derived: installed, has a current version, and latest > current
    pub update_available: bool,
    pub installed: bool,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl VersionInfo {
    /// Builds a snapshot, deriving `update_available` from the other facts.
    pub fn new(
        tool: impl Into<String>,
        installed: bool,
        current_version: Option<String>,
        latest_version: Option<String>,
        last_checked: DateTime<Utc>,
    ) -> Self {
        let update_available = match (&current_version, &latest_version) {
            (Some(current), Some(latest)) if installed => {
                compare_versions(latest, current) == CompareResult::Greater
            }
            _ => false,
        };

        Self {
            tool: tool.into(),
            current_version,
            latest_version,
            update_available,
            installed,
            last_checked,
            release_notes_url: None,
            download_url: None,
        }
    }

    pub fn with_urls(mut self, release_notes_url: Option<String>, download_url: Option<String>) -> Self {
        self.release_notes_url = release_notes_url;
        self.download_url = download_url;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, Some("1.0.0"), Some("1.1.0"), true)]
    #[case(true, Some("1.1.0"), Some("1.1.0"), false)]
    #[case(true, Some("2.0.0"), Some("1.1.0"), false)]
    #[case(false, Some("1.0.0"), Some("1.1.0"), false)] // not installed
    #[case(true, None, Some("1.1.0"), false)] // version unknown
    #[case(true, Some("1.0.0"), None, false)] // latest unknown
    #[case(true, Some("garbage"), Some("1.1.0"), false)] // invalid comparison
    fn new_derives_update_available(
        #[case] installed: bool,
        #[case] current: Option<&str>,
        #[case] latest: Option<&str>,
        #[case] expected: bool,
    ) {
        let info = VersionInfo::new(
            "node",
            installed,
            current.map(str::to_string),
            latest.map(str::to_string),
            Utc::now(),
        );

        assert_eq!(info.update_available, expected);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let info = VersionInfo::new(
            "npm",
            true,
            Some("10.0.0".to_string()),
            Some("10.2.0".to_string()),
            Utc::now(),
        );

        let value = serde_json::to_value(&info).unwrap();

        assert_eq!(value["currentVersion"], "10.0.0");
        assert_eq!(value["updateAvailable"], true);
        assert!(value.get("releaseNotesUrl").is_none());
    }
}
