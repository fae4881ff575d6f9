//! Update layer: installing new tool versions with backup and rollback
//!
//! # Modules
//!
//! - [`updater`]: the per-tool update state machine
//! - [`executor`]: trait for the component that performs installs
//! - [`command`]: install command lines per tool
//! - [`backup`]: timestamped backups of installed artifacts
//! - [`status`]: update states, statuses and progress reports
//! - [`error`]: error types for updates, installs and backups

pub mod backup;
pub mod command;
pub mod error;
pub mod executor;
pub mod status;
pub mod updater;
