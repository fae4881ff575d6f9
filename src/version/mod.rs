//! Version layer: looking up, caching and comparing tool versions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │◀────│   Checker   │────▶│    Cache    │
//! │  (query)    │     │ (coalesce)  │     │ (LRU + TTL) │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │   Sources   │     │   Compare   │
//! │(command,npm)│     │(version cmp)│
//! └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: bounded in-memory cache with per-entry TTL and LRU eviction
//! - [`checker`]: version checks with request coalescing and batch checks
//! - [`compare`]: numeric dot-separated version comparison
//! - [`source`]: trait for querying installed and published versions
//! - [`sources`]: concrete sources (local commands, npm registry)
//! - [`error`]: error types for sources and checks
//! - [`types`]: common types like `VersionInfo`

pub mod cache;
pub mod checker;
pub mod compare;
pub mod error;
pub mod source;
pub mod sources;
pub mod types;
