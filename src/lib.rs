pub mod config;
pub mod logging;
pub mod schedule;
pub mod service;
pub mod update;
pub mod version;
