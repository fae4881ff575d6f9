//! Version checking for tools
//!
//! A check composes three source queries (installed?, current version,
//! latest version) into one [`VersionInfo`], which is the only thing cached.
//! Concurrent checks for the same tool are coalesced: the first caller
//! launches the query as a background task and every caller that arrives
//! while it is running awaits the same shared result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_NETWORK_TIMEOUT_MS;
use crate::version::cache::VersionCache;
use crate::version::compare::{CompareResult, compare_versions};
use crate::version::error::{CheckError, SourceError};
use crate::version::source::VersionSource;
use crate::version::types::VersionInfo;

type SharedCheck = Shared<BoxFuture<'static, Result<VersionInfo, CheckError>>>;

/// Per-call options for [`VersionChecker::check_version`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Skip the cache lookup. Does not bypass coalescing with a check already in flight.
    pub force: bool,
    /// TTL for the cached result; the cache default when `None`
    pub cache_ttl: Option<Duration>,
    /// Bound on the source queries; the checker default when `None`
    pub timeout: Option<Duration>,
}

impl CheckOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// Outcome of [`VersionChecker::batch_check`]. Failures never abort siblings.
#[derive(Debug, Clone, Default)]
pub struct BatchCheckResult {
    pub results: HashMap<String, VersionInfo>,
    pub errors: HashMap<String, CheckError>,
    pub duration: Duration,
    /// Tools answered from cache
    pub cache_hits: usize,
    /// Source queries launched by this batch
    pub network_requests: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerStats {
    pub total_checks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_requests: u64,
    pub failed_checks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_checks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_requests: AtomicU64,
    failed_checks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOrigin {
    Cache,
    Network,
    Coalesced,
}

pub struct VersionChecker {
    source: Arc<dyn VersionSource>,
    cache: Arc<VersionCache>,
    in_flight: Arc<Mutex<HashMap<String, SharedCheck>>>,
    counters: Arc<Counters>,
    default_timeout_ms: AtomicU64,
}

fn lock_in_flight(
    in_flight: &Mutex<HashMap<String, SharedCheck>>,
) -> MutexGuard<'_, HashMap<String, SharedCheck>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VersionChecker {
    pub fn new(source: Arc<dyn VersionSource>, cache: Arc<VersionCache>) -> Self {
        Self {
            source,
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            default_timeout_ms: AtomicU64::new(DEFAULT_NETWORK_TIMEOUT_MS),
        }
    }

    pub fn with_default_timeout(self, timeout: Duration) -> Self {
        self.set_default_timeout(timeout);
        self
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.default_timeout_ms.store(millis, Ordering::Relaxed);
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    /// Drops the cached result for `tool` so the next check queries the source
    pub fn invalidate(&self, tool: &str) -> bool {
        self.cache.invalidate(tool)
    }

    /// Number of source queries currently running
    pub fn in_flight_count(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Check a single tool, consulting the cache unless `options.force` is set
    pub async fn check_version(
        &self,
        tool: &str,
        options: &CheckOptions,
    ) -> Result<VersionInfo, CheckError> {
        self.check_tracked(tool, options).await.0
    }

    async fn check_tracked(
        &self,
        tool: &str,
        options: &CheckOptions,
    ) -> (Result<VersionInfo, CheckError>, CheckOrigin) {
        Counters::bump(&self.counters.total_checks);

        if !options.force {
            if let Some(info) = self.cache.get(tool) {
                debug!("Cache hit for {}", tool);
                Counters::bump(&self.counters.cache_hits);
                return (Ok(info), CheckOrigin::Cache);
            }
            Counters::bump(&self.counters.cache_misses);
        }

        let timeout = options.timeout.unwrap_or_else(|| self.default_timeout());

        let (flight, origin) = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            match in_flight.get(tool) {
                Some(existing) => {
                    debug!("Joining in-flight check for {}", tool);
                    (existing.clone(), CheckOrigin::Coalesced)
                }
                None => {
                    let flight = self.launch(tool, options.cache_ttl, timeout);
                    in_flight.insert(tool.to_string(), flight.clone());
                    (flight, CheckOrigin::Network)
                }
            }
        };

        if origin == CheckOrigin::Network {
            return (flight.await, origin);
        }

        // A joining caller is bounded by its own timeout; the shared query keeps running
        let result = match tokio::time::timeout(timeout, flight).await {
            Ok(result) => result,
            Err(_) => {
                Counters::bump(&self.counters.failed_checks);
                warn!("Joined check for {} timed out after {:?}", tool, timeout);
                Err(CheckError::Timeout {
                    tool: tool.to_string(),
                    timeout,
                })
            }
        };

        (result, origin)
    }

    /// Spawns the source query. Must be called with the in-flight table locked.
    ///
    /// The task itself writes the cache and removes its in-flight entry, so
    /// the entry is cleared even if every awaiting caller is dropped.
    fn launch(&self, tool: &str, cache_ttl: Option<Duration>, timeout: Duration) -> SharedCheck {
        Counters::bump(&self.counters.network_requests);
        info!("Checking version of {}", tool);

        let source = self.source.clone();
        let cache = self.cache.clone();
        let counters = self.counters.clone();
        let in_flight = self.in_flight.clone();
        let key = tool.to_string();

        let handle = tokio::spawn(async move {
            let result = perform_check(source.as_ref(), &key, timeout).await;

            match &result {
                Ok(info) => cache.set(&key, info.clone(), cache_ttl),
                Err(e) => {
                    Counters::bump(&counters.failed_checks);
                    warn!("Version check failed for {}: {}", key, e);
                }
            }

            lock_in_flight(&in_flight).remove(&key);
            result
        });

        let tool = tool.to_string();
        async move {
            handle.await.unwrap_or_else(|e| {
                Err(CheckError::Interrupted {
                    tool,
                    reason: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Check every tool concurrently. Per-tool failures land in `errors`.
    pub async fn batch_check<S: AsRef<str>>(
        &self,
        tools: &[S],
        options: &CheckOptions,
    ) -> BatchCheckResult {
        let start = Instant::now();

        let outcomes = join_all(tools.iter().map(|tool| async move {
            let tool = tool.as_ref();
            (tool.to_string(), self.check_tracked(tool, options).await)
        }))
        .await;

        collect_batch(outcomes, start)
    }

    /// Same contract as [`VersionChecker::batch_check`], one tool at a time
    pub async fn batch_check_sequential<S: AsRef<str>>(
        &self,
        tools: &[S],
        options: &CheckOptions,
    ) -> BatchCheckResult {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(tools.len());
        for tool in tools {
            let tool = tool.as_ref();
            outcomes.push((tool.to_string(), self.check_tracked(tool, options).await));
        }

        collect_batch(outcomes, start)
    }

    pub async fn is_installed(&self, tool: &str) -> Result<bool, CheckError> {
        let timeout = self.default_timeout();
        bounded(tool, timeout, self.source.is_installed(tool)).await
    }

    pub async fn get_current_version(&self, tool: &str) -> Result<Option<String>, CheckError> {
        let timeout = self.default_timeout();
        bounded(tool, timeout, self.source.get_current_version(tool)).await
    }

    pub async fn get_latest_version(
        &self,
        tool: &str,
        timeout: Option<Duration>,
    ) -> Result<String, CheckError> {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        bounded(tool, timeout, self.source.get_latest_version(tool, timeout)).await
    }

    pub fn compare_versions(&self, a: &str, b: &str) -> CompareResult {
        compare_versions(a, b)
    }

    pub fn get_stats(&self) -> CheckerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CheckerStats {
            total_checks: load(&self.counters.total_checks),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
            network_requests: load(&self.counters.network_requests),
            failed_checks: load(&self.counters.failed_checks),
        }
    }

    pub fn reset_stats(&self) {
        for counter in [
            &self.counters.total_checks,
            &self.counters.cache_hits,
            &self.counters.cache_misses,
            &self.counters.network_requests,
            &self.counters.failed_checks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

async fn bounded<T, F>(tool: &str, timeout: Duration, query: F) -> Result<T, CheckError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    tokio::time::timeout(timeout, query)
        .await
        .map_err(|_| CheckError::Timeout {
            tool: tool.to_string(),
            timeout,
        })?
        .map_err(|e| CheckError::network(tool, e))
}

async fn perform_check(
    source: &dyn VersionSource,
    tool: &str,
    timeout: Duration,
) -> Result<VersionInfo, CheckError> {
    let local = async {
        let installed = source.is_installed(tool).await?;
        let current = if installed {
            source.get_current_version(tool).await?
        } else {
            None
        };
        Ok::<_, SourceError>((installed, current))
    };

    let query = async {
        let (local, latest) = tokio::join!(local, source.get_latest_version(tool, timeout));
        let (installed, current) = local?;
        Ok::<_, SourceError>((installed, current, latest?))
    };

    let (installed, current, latest) = bounded(tool, timeout, query).await?;

    let release_notes_url = source.get_release_notes_url(tool, &latest);
    let download_url = source.get_download_url(tool, &latest);

    debug!(
        "{}: installed={} current={:?} latest={}",
        tool, installed, current, latest
    );

    Ok(
        VersionInfo::new(tool, installed, current, Some(latest), Utc::now())
            .with_urls(release_notes_url, download_url),
    )
}

fn collect_batch(
    outcomes: Vec<(String, (Result<VersionInfo, CheckError>, CheckOrigin))>,
    start: Instant,
) -> BatchCheckResult {
    let mut batch = BatchCheckResult::default();

    for (tool, (result, origin)) in outcomes {
        match origin {
            CheckOrigin::Cache => batch.cache_hits += 1,
            CheckOrigin::Network => batch.network_requests += 1,
            CheckOrigin::Coalesced => {}
        }
        match result {
            Ok(info) => {
                batch.results.insert(tool, info);
            }
            Err(e) => {
                batch.errors.insert(tool, e);
            }
        }
    }

    batch.duration = start.elapsed();
    batch
}
