//! Version source backed by local commands

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::version::error::SourceError;
use crate::version::source::VersionSource;
use crate::version::sources::{binary_name, package_name};

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+(?:\.\d+)+)").expect("invalid version regex"));

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Run `program` with `args`.
///
/// Returns `Ok(None)` when the program does not exist. The child is killed
/// if the returned future is dropped, so callers may bound it with a timeout.
pub async fn run_command(program: &str, args: &[&str]) -> Result<Option<CommandOutput>, SourceError> {
    debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) => Ok(Some(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run a command line through the platform shell
pub async fn run_shell(command_line: &str) -> Result<CommandOutput, SourceError> {
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };

    run_command(shell, &[flag, command_line])
        .await?
        .ok_or_else(|| SourceError::Command(format!("shell '{shell}' not found")))
}

/// First dotted version number in `output`, without a leading `v`
///
/// Matches "v20.11.0", "tsc Version 5.4.2", "pnpm 9.1.0 (linux-x64)".
pub fn extract_version(output: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(output)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Source that asks the tool itself for its version and `npm view` for the latest one
#[derive(Debug, Clone, Default)]
pub struct CommandVersionSource;

impl CommandVersionSource {
    pub fn new() -> Self {
        Self
    }

    async fn probe(&self, tool: &str) -> Result<Option<CommandOutput>, SourceError> {
        let output = run_command(binary_name(tool), &["--version"]).await?;
        Ok(output.filter(|output| output.success))
    }
}

#[async_trait::async_trait]
impl VersionSource for CommandVersionSource {
    async fn is_installed(&self, tool: &str) -> Result<bool, SourceError> {
        Ok(self.probe(tool).await?.is_some())
    }

    async fn get_current_version(&self, tool: &str) -> Result<Option<String>, SourceError> {
        let Some(output) = self.probe(tool).await? else {
            return Ok(None);
        };

        Ok(extract_version(&output.stdout).or_else(|| extract_version(&output.stderr)))
    }

    async fn get_latest_version(
        &self,
        tool: &str,
        _timeout: Duration,
    ) -> Result<String, SourceError> {
        let package = package_name(tool);
        let output = run_command("npm", &["view", package, "version"])
            .await?
            .ok_or_else(|| SourceError::Command("npm is not installed".to_string()))?;

        if !output.success {
            if output.stderr.contains("E404") {
                return Err(SourceError::NotFound(package.to_string()));
            }
            return Err(SourceError::Command(format!(
                "npm view {} exited with {:?}: {}",
                package,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let version = output.stdout.trim();
        if version.is_empty() {
            return Err(SourceError::InvalidResponse(format!(
                "npm view {package} printed no version"
            )));
        }

        Ok(version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v20.11.0\n", Some("20.11.0"))]
    #[case("Version 5.4.2", Some("5.4.2"))]
    #[case("pnpm 9.1.0 (linux-x64)", Some("9.1.0"))]
    #[case("go version go1.22 linux/amd64", Some("1.22"))]
    #[case("no digits here", None)]
    #[case("build 42", None)] // single component is not a version
    fn extract_version_finds_first_dotted_number(
        #[case] output: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(extract_version(output).as_deref(), expected);
    }

    #[tokio::test]
    async fn run_command_returns_none_for_missing_program() {
        let output = run_command("definitely-not-an-installed-tool-9f2c", &["--version"])
            .await
            .unwrap();

        assert_eq!(output, None);
    }

    #[tokio::test]
    async fn missing_tool_is_reported_as_not_installed() {
        let source = CommandVersionSource::new();

        assert!(!source.is_installed("definitely-not-an-installed-tool-9f2c").await.unwrap());
        assert_eq!(
            source
                .get_current_version("definitely-not-an-installed-tool-9f2c")
                .await
                .unwrap(),
            None
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_shell_captures_output_and_exit_status() {
        let ok = run_shell("echo 1.2.3").await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "1.2.3");

        let failed = run_shell("echo oops >&2; exit 3").await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr.trim(), "oops");
    }
}
