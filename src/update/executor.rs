//! Executor trait for performing installs

use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::update::error::ExecutorError;
use crate::version::source::VersionSource;
use crate::version::sources::binary_name;
use crate::version::sources::command::{CommandVersionSource, run_shell};

/// Trait for the component that actually installs tools
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait UpdateExecutor: Send + Sync {
    /// Location of the installed artifact, or `None` if the tool is not installed
    async fn locate(&self, tool: &str) -> Option<PathBuf>;

    /// Installs `version` of `tool` by running `command`
    async fn install(&self, tool: &str, version: &str, command: &str) -> Result<(), ExecutorError>;

    /// Version reported by the installation after an install
    async fn installed_version(&self, tool: &str) -> Option<String>;
}

/// Executor that finds tools on `PATH` and runs install commands through the shell
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    versions: CommandVersionSource,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn candidates(binary: &str) -> Vec<String> {
        if cfg!(windows) {
            vec![
                format!("{binary}.exe"),
                format!("{binary}.cmd"),
                binary.to_string(),
            ]
        } else {
            vec![binary.to_string()]
        }
    }
}

#[async_trait::async_trait]
impl UpdateExecutor for ShellExecutor {
    async fn locate(&self, tool: &str) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        let names = Self::candidates(binary_name(tool));

        for dir in std::env::split_paths(&path) {
            for name in &names {
                let candidate = dir.join(name);
                if tokio::fs::metadata(&candidate)
                    .await
                    .is_ok_and(|metadata| metadata.is_file())
                {
                    debug!("Located {} at {:?}", tool, candidate);
                    return Some(candidate);
                }
            }
        }

        None
    }

    async fn install(&self, tool: &str, version: &str, command: &str) -> Result<(), ExecutorError> {
        info!("Installing {}@{}: {}", tool, version, command);

        let output = run_shell(command)
            .await
            .map_err(|e| ExecutorError::Command(e.to_string()))?;

        if output.success {
            Ok(())
        } else {
            Err(ExecutorError::Command(format!(
                "'{}' exited with {:?}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }

    async fn installed_version(&self, tool: &str) -> Option<String> {
        self.versions.get_current_version(tool).await.ok().flatten()
    }
}
