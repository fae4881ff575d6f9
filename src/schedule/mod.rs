//! Schedule layer: periodic checks, auto-update and event notification
//!
//! # Modules
//!
//! - [`scheduler`]: the global ticker evaluating due schedules
//! - [`events`]: typed events and subscriber fan-out
//! - [`types`]: schedule configuration and scheduler statistics
//! - [`error`]: error types for schedule operations

pub mod error;
pub mod events;
pub mod scheduler;
pub mod types;
