//! Statistics aggregated across checker, cache, updater and scheduler

use std::time::Duration;

use serde::Serialize;

use crate::config::duration_ms;
use crate::schedule::types::SchedulerStats;
use crate::update::updater::UpdaterStats;
use crate::version::cache::CacheStats;
use crate::version::checker::CheckerStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_checks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_requests: u64,
    pub failed_checks: u64,
    /// Hits over cache lookups made by checks
    pub cache_hit_rate: f64,
    /// Failed checks over all checks
    pub failure_rate: f64,
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub total_updates: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
    pub update_success_rate: f64,
    #[serde(with = "duration_ms")]
    pub average_update_time: Duration,
    pub scheduler: SchedulerStats,
}

impl ServiceStats {
    pub fn collect(
        checker: CheckerStats,
        cache: CacheStats,
        updater: UpdaterStats,
        scheduler: SchedulerStats,
    ) -> Self {
        Self {
            total_checks: checker.total_checks,
            cache_hits: checker.cache_hits,
            cache_misses: checker.cache_misses,
            network_requests: checker.network_requests,
            failed_checks: checker.failed_checks,
            cache_hit_rate: ratio(checker.cache_hits, checker.cache_hits + checker.cache_misses),
            failure_rate: ratio(checker.failed_checks, checker.total_checks),
            cache_size: cache.size,
            max_cache_size: cache.max_size,
            total_updates: updater.total_updates,
            successful_updates: updater.successful_updates,
            failed_updates: updater.failed_updates,
            update_success_rate: updater.success_rate,
            average_update_time: updater.average_update_time,
            scheduler,
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
