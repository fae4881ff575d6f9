//! Update executor test utilities

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use tool_version_manager::update::error::ExecutorError;
use tool_version_manager::update::executor::UpdateExecutor;

/// Executor over plain files: `<dir>/<tool>` holds the installed version
pub struct FakeExecutor {
    dir: PathBuf,
    install_delay: Duration,
    fail_install: bool,
    installs: AtomicUsize,
}

impl FakeExecutor {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            install_delay: Duration::ZERO,
            fail_install: false,
            installs: AtomicUsize::new(0),
        }
    }

    pub fn with_install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = delay;
        self
    }

    /// Installs corrupt the artifact and then fail
    pub fn failing(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    fn artifact(&self, tool: &str) -> PathBuf {
        self.dir.join(tool)
    }
}

#[async_trait]
impl UpdateExecutor for FakeExecutor {
    async fn locate(&self, tool: &str) -> Option<PathBuf> {
        let path = self.artifact(tool);
        path.exists().then_some(path)
    }

    async fn install(&self, tool: &str, version: &str, _command: &str) -> Result<(), ExecutorError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.install_delay).await;

        if self.fail_install {
            tokio::fs::write(self.artifact(tool), "corrupt").await?;
            return Err(ExecutorError::Command(format!("installing {tool}@{version} failed")));
        }
        tokio::fs::write(self.artifact(tool), version).await?;
        Ok(())
    }

    async fn installed_version(&self, tool: &str) -> Option<String> {
        tokio::fs::read_to_string(self.artifact(tool)).await.ok()
    }
}

/// Temp directory with one installed artifact per `(tool, version)`
pub fn install_dir(installed: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    for (tool, version) in installed {
        std::fs::write(temp_dir.path().join(tool), version).unwrap();
    }
    temp_dir
}

pub fn read_artifact(dir: &Path, tool: &str) -> String {
    std::fs::read_to_string(dir.join(tool)).unwrap()
}
