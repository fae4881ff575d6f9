//! npm registry API implementation

use std::collections::HashMap;
use std::time::Duration;

use semver::Version;
use serde::Deserialize;
use tracing::warn;

use crate::version::error::SourceError;
use crate::version::source::VersionSource;
use crate::version::sources::command::CommandVersionSource;
use crate::version::sources::package_name;

/// Default base URL for npm registry
pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

/// Response from npm registry API
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(default, rename = "dist-tags")]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, serde_json::Value>,
}

/// Source that resolves latest versions through the npm registry API.
///
/// Installed/current facts are delegated to a [`CommandVersionSource`].
pub struct NpmRegistrySource {
    client: reqwest::Client,
    base_url: String,
    local: CommandVersionSource,
}

impl NpmRegistrySource {
    /// Creates a new NpmRegistrySource with a custom base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("tool-version-manager")
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            local: CommandVersionSource::new(),
        }
    }

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            // Scoped package: @scope/name -> @scope%2Fname
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }

    /// Highest stable version, used when the registry has no `latest` tag
    fn highest_stable(versions: impl IntoIterator<Item = String>) -> Option<String> {
        versions
            .into_iter()
            .filter_map(|v| Version::parse(&v).ok().map(|parsed| (v, parsed)))
            .filter(|(_, parsed)| parsed.pre.is_empty())
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(v, _)| v)
    }
}

impl Default for NpmRegistrySource {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl VersionSource for NpmRegistrySource {
    async fn is_installed(&self, tool: &str) -> Result<bool, SourceError> {
        self.local.is_installed(tool).await
    }

    async fn get_current_version(&self, tool: &str) -> Result<Option<String>, SourceError> {
        self.local.get_current_version(tool).await
    }

    async fn get_latest_version(
        &self,
        tool: &str,
        timeout: Duration,
    ) -> Result<String, SourceError> {
        let package = package_name(tool);
        let url = format!("{}/{}", self.base_url, Self::encode_package_name(package));

        let response = self.client.get(&url).timeout(timeout).send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(package.to_string()));
        }

        if !status.is_success() {
            warn!("npm registry returned status {}: {}", status, url);
            return Err(SourceError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let mut package_info: NpmPackageResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            SourceError::InvalidResponse(e.to_string())
        })?;

        package_info
            .dist_tags
            .remove("latest")
            .or_else(|| Self::highest_stable(package_info.versions.into_keys()))
            .ok_or_else(|| SourceError::NotFound(format!("{package}: no published versions")))
    }

    fn get_release_notes_url(&self, tool: &str, version: &str) -> Option<String> {
        Some(format!(
            "https://www.npmjs.com/package/{}/v/{}",
            package_name(tool),
            version
        ))
    }

    fn get_download_url(&self, tool: &str, version: &str) -> Option<String> {
        let package = package_name(tool);
        let basename = package.rsplit('/').next().unwrap_or(package);
        Some(format!(
            "{}/{}/-/{}-{}.tgz",
            self.base_url, package, basename, version
        ))
    }
}
