//! Version source test utilities

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tool_version_manager::version::error::SourceError;
use tool_version_manager::version::source::VersionSource;

#[derive(Debug, Clone)]
struct FakeTool {
    current: Option<String>,
    /// `None` makes the latest-version lookup fail
    latest: Option<String>,
}

/// In-memory source with configurable tools, latency and failures
#[derive(Debug, Default)]
pub struct FakeSource {
    tools: Mutex<HashMap<String, FakeTool>>,
    delay: Duration,
    latest_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(self, tool: &str, current: Option<&str>, latest: &str) -> Self {
        self.tools.lock().unwrap().insert(
            tool.to_string(),
            FakeTool {
                current: current.map(str::to_string),
                latest: Some(latest.to_string()),
            },
        );
        self
    }

    /// Installed tool whose latest-version lookup always fails
    pub fn with_failing_tool(self, tool: &str, current: &str) -> Self {
        self.tools.lock().unwrap().insert(
            tool.to_string(),
            FakeTool {
                current: Some(current.to_string()),
                latest: None,
            },
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of latest-version lookups made so far
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn tool(&self, tool: &str) -> Option<FakeTool> {
        self.tools.lock().unwrap().get(tool).cloned()
    }
}

#[async_trait]
impl VersionSource for FakeSource {
    async fn is_installed(&self, tool: &str) -> Result<bool, SourceError> {
        Ok(self.tool(tool).is_some_and(|t| t.current.is_some()))
    }

    async fn get_current_version(&self, tool: &str) -> Result<Option<String>, SourceError> {
        Ok(self.tool(tool).and_then(|t| t.current))
    }

    async fn get_latest_version(
        &self,
        tool: &str,
        _timeout: Duration,
    ) -> Result<String, SourceError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match self.tool(tool) {
            Some(FakeTool {
                latest: Some(latest),
                ..
            }) => Ok(latest),
            Some(_) => Err(SourceError::Command(format!("{tool}: registry unreachable"))),
            None => Err(SourceError::NotFound(tool.to_string())),
        }
    }

    fn get_release_notes_url(&self, tool: &str, version: &str) -> Option<String> {
        Some(format!("https://example.com/{tool}/releases/{version}"))
    }
}
