//! Tracing subscriber setup for the binary
//!
//! Logs go to a file under the data directory through a non-blocking
//! writer, or to stderr. `RUST_LOG` overrides the default filter.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialised: {0}")]
    Init(#[from] TryInitError),
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level for this crate when `RUST_LOG` is unset
    pub level: String,
    /// Write to stderr instead of the log file
    pub stderr: bool,
    pub json: bool,
    pub file: PathBuf,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stderr: false,
            json: false,
            file: crate::config::log_path(),
        }
    }
}

fn default_directives(level: &str) -> String {
    format!("tool_version_manager={level},hyper=warn,reqwest=warn,h2=warn")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn file_writer(
    file: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), LoggingError> {
    let dir = file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let name = file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tool-version-manager.log"));
    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::never(dir, name),
    ))
}

/// Installs the global subscriber. The returned guard flushes the log file
/// when dropped and must be held for the life of the process.
pub fn init_logging(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = env_filter(&options.level);

    let (layer, guard) = if options.stderr {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        let layer = if options.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        };
        (layer, None)
    } else {
        let (writer, guard) = file_writer(&options.file)?;
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = if options.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        };
        (layer, Some(guard))
    };

    Registry::default().with(layer).with(filter).try_init()?;
    Ok(guard)
}
