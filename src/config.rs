use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default lifetime of a cached version check (1 hour)
pub const DEFAULT_CACHE_TTL_MS: u64 = 60 * 60 * 1000;

/// Default timeout for version source queries (30 seconds)
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 30_000;

/// Base delay for retry backoff; doubled on each attempt (1 second)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default timeout for a single install step (5 minutes)
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Period of the scheduler's global ticker (1 minute)
pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 60_000;

// =============================================================================
// Size-related constants
// =============================================================================

pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Serde adapter storing a [`Duration`] as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same encoding for `Option<Duration>`; `None` is `null`
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
        }
    }
}

/// Runtime configuration of the version service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(with = "duration_ms")]
    pub default_cache_ttl: Duration,
    pub max_cache_size: usize,
    /// Run batch checks concurrently; when false they run one after another
    pub enable_batch_checking: bool,
    #[serde(with = "duration_ms")]
    pub network_timeout: Duration,
    /// Total attempts for a single check, including the first
    pub retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    #[serde(with = "duration_ms")]
    pub update_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub scheduler_tick_interval: Duration,
    pub backup_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            enable_batch_checking: true,
            network_timeout: Duration::from_millis(DEFAULT_NETWORK_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            update_timeout: Duration::from_millis(DEFAULT_UPDATE_TIMEOUT_MS),
            scheduler_tick_interval: Duration::from_millis(DEFAULT_SCHEDULER_TICK_MS),
            backup_dir: backup_dir(),
        }
    }
}

impl ServiceConfig {
    /// Rejects values the service cannot operate with
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size == 0 {
            return Err("maxCacheSize must be at least 1".to_string());
        }
        if self.default_cache_ttl.is_zero() {
            return Err("defaultCacheTtl must be greater than zero".to_string());
        }
        if self.scheduler_tick_interval.is_zero() {
            return Err("schedulerTickInterval must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Applies the fields present in `patch`
    pub fn apply(&mut self, patch: ConfigPatch) {
        let ConfigPatch {
            default_cache_ttl,
            max_cache_size,
            enable_batch_checking,
            network_timeout,
            retry_attempts,
            retry_delay,
            update_timeout,
        } = patch;

        if let Some(ttl) = default_cache_ttl {
            self.default_cache_ttl = ttl;
        }
        if let Some(size) = max_cache_size {
            self.max_cache_size = size;
        }
        if let Some(enabled) = enable_batch_checking {
            self.enable_batch_checking = enabled;
        }
        if let Some(timeout) = network_timeout {
            self.network_timeout = timeout;
        }
        if let Some(attempts) = retry_attempts {
            self.retry_attempts = attempts;
        }
        if let Some(delay) = retry_delay {
            self.retry_delay = delay;
        }
        if let Some(timeout) = update_timeout {
            self.update_timeout = timeout;
        }
    }

    /// Whether switching to `other` changes the cache's size/TTL policy
    pub fn cache_policy_differs(&self, other: &ServiceConfig) -> bool {
        self.default_cache_ttl != other.default_cache_ttl
            || self.max_cache_size != other.max_cache_size
    }
}

/// Partial update of [`ServiceConfig`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub default_cache_ttl: Option<Duration>,
    pub max_cache_size: Option<usize>,
    pub enable_batch_checking: Option<bool>,
    pub network_timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub update_timeout: Option<Duration>,
}

/// Returns the path to the data directory for tool-version-manager.
/// Uses $XDG_DATA_HOME/tool-version-manager if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/tool-version-manager,
/// or ./tool-version-manager if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the directory holding pre-update backups.
pub fn backup_dir() -> PathBuf {
    data_dir().join("backups")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("tool-version-manager.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("tool-version-manager")
}
