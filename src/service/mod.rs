//! Service facade composing cache, checker, updater and scheduler
//!
//! [`VersionService`] owns one instance of each component and is the entry
//! point for callers. It adds runtime configuration, retry with backoff on
//! single checks, statistics aggregation, event subscription and
//! export/import of cache and schedule state.
//!
//! # Modules
//!
//! - [`retry`]: retry with exponential backoff
//! - [`stats`]: aggregated statistics
//! - [`state`]: the export/import document
//! - [`error`]: configuration and import errors

pub mod error;
pub mod retry;
pub mod state;
pub mod stats;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::config::{ConfigPatch, ServiceConfig};
use crate::schedule::error::ScheduleError;
use crate::schedule::events::{EventBus, EventEmitter, EventFilter, VersionEvent};
use crate::schedule::scheduler::{VersionScheduler, update_with_events};
use crate::schedule::types::{ScheduleConfig, SchedulePatch};
use crate::service::error::ConfigError;
use crate::service::retry::{RetryPolicy, retry_with_backoff};
use crate::service::state::ExportedState;
use crate::service::stats::ServiceStats;
use crate::update::backup::BackupRecord;
use crate::update::error::{BackupError, UpdateError};
use crate::update::executor::UpdateExecutor;
use crate::update::status::UpdateStatus;
use crate::update::updater::{UpdateOptions, VersionUpdater};
use crate::version::cache::VersionCache;
use crate::version::checker::{BatchCheckResult, CheckOptions, VersionChecker};
use crate::version::compare::{CompareResult, require_version};
use crate::version::error::CheckError;
use crate::version::source::VersionSource;
use crate::version::types::VersionInfo;

pub struct VersionService {
    config: RwLock<ServiceConfig>,
    cache: Arc<VersionCache>,
    checker: Arc<VersionChecker>,
    updater: Arc<VersionUpdater>,
    scheduler: VersionScheduler,
    bus: Arc<EventBus>,
}

impl VersionService {
    /// Builds the service. Must be called inside a tokio runtime: the event
    /// forwarder is spawned here.
    pub fn new(
        config: ServiceConfig,
        source: Arc<dyn VersionSource>,
        executor: Arc<dyn UpdateExecutor>,
    ) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Invalid)?;

        let cache = Arc::new(VersionCache::new(
            config.max_cache_size,
            config.default_cache_ttl,
        ));
        let checker = Arc::new(
            VersionChecker::new(source, cache.clone()).with_default_timeout(config.network_timeout),
        );
        let updater = Arc::new(
            VersionUpdater::new(executor, config.backup_dir.clone())
                .with_default_timeout(config.update_timeout),
        );

        let (emitter, events) = EventEmitter::channel();
        let scheduler = VersionScheduler::with_emitter(
            checker.clone(),
            updater.clone(),
            config.scheduler_tick_interval,
            emitter,
        );

        let bus = Arc::new(EventBus::new());
        spawn_forwarder(events, bus.clone());

        info!(
            "Version service ready (cache {} entries, ttl {:?})",
            config.max_cache_size, config.default_cache_ttl
        );

        Ok(Self {
            config: RwLock::new(config),
            cache,
            checker,
            updater,
            scheduler,
            bus,
        })
    }

    fn read_config(&self) -> RwLockReadGuard<'_, ServiceConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> ServiceConfig {
        self.read_config().clone()
    }

    /// Applies a partial configuration update; the cache is rebuilt if its
    /// size or TTL policy changes
    pub fn update_config(&self, patch: ConfigPatch) -> Result<ServiceConfig, ConfigError> {
        let mut next = self.config();
        next.apply(patch);
        next.validate().map_err(ConfigError::Invalid)?;
        self.apply_config(next.clone());
        Ok(next)
    }

    /// Installs an already validated configuration. The backup directory and
    /// tick interval are fixed at construction and kept as they are.
    fn apply_config(&self, mut next: ServiceConfig) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);

        next.backup_dir = config.backup_dir.clone();
        next.scheduler_tick_interval = config.scheduler_tick_interval;

        if config.cache_policy_differs(&next) {
            info!(
                "Cache policy changed to {} entries / {:?}; rebuilding cache",
                next.max_cache_size, next.default_cache_ttl
            );
            self.cache.rebuild(next.max_cache_size, next.default_cache_ttl);
        }
        self.checker.set_default_timeout(next.network_timeout);
        self.updater.set_default_timeout(next.update_timeout);

        *config = next;
    }

    fn retry_policy(&self) -> RetryPolicy {
        let config = self.read_config();
        RetryPolicy::new(config.retry_attempts, config.retry_delay)
    }

    pub fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    pub fn checker(&self) -> &Arc<VersionChecker> {
        &self.checker
    }

    pub fn updater(&self) -> &Arc<VersionUpdater> {
        &self.updater
    }

    pub fn scheduler(&self) -> &VersionScheduler {
        &self.scheduler
    }

    // ---------------------------------------------------------------------
    // Checks
    // ---------------------------------------------------------------------

    /// Checks one tool, retrying transient failures with exponential backoff
    pub async fn check_version(
        &self,
        tool: &str,
        options: &CheckOptions,
    ) -> Result<VersionInfo, CheckError> {
        retry_with_backoff(self.retry_policy(), move || {
            self.checker.check_version(tool, options)
        })
        .await
    }

    /// Checks several tools without the extra retry layer. Runs them one at a
    /// time when batch checking is disabled.
    pub async fn batch_check<S: AsRef<str>>(
        &self,
        tools: &[S],
        options: &CheckOptions,
    ) -> BatchCheckResult {
        let concurrent = self.read_config().enable_batch_checking;
        let result = if concurrent {
            self.checker.batch_check(tools, options).await
        } else {
            self.checker.batch_check_sequential(tools, options).await
        };

        info!(
            "Batch check of {} tools: {} ok, {} failed in {:?}",
            tools.len(),
            result.results.len(),
            result.errors.len(),
            result.duration
        );
        result
    }

    pub async fn is_installed(&self, tool: &str) -> Result<bool, CheckError> {
        self.checker.is_installed(tool).await
    }

    pub async fn get_current_version(&self, tool: &str) -> Result<Option<String>, CheckError> {
        self.checker.get_current_version(tool).await
    }

    pub async fn get_latest_version(
        &self,
        tool: &str,
        timeout: Option<Duration>,
    ) -> Result<String, CheckError> {
        self.checker.get_latest_version(tool, timeout).await
    }

    pub fn compare_versions(&self, a: &str, b: &str) -> CompareResult {
        self.checker.compare_versions(a, b)
    }

    // ---------------------------------------------------------------------
    // Updates
    // ---------------------------------------------------------------------

    /// Updates `tool` to `version`, or to the latest version when `None`,
    /// returning the version installed. Never retried.
    pub async fn update_tool(
        &self,
        tool: &str,
        version: Option<&str>,
        mut options: UpdateOptions,
    ) -> Result<String, UpdateError> {
        let (current, target) = match version {
            Some(version) => {
                require_version(version)?;
                let current = self.checker.get_current_version(tool).await.ok().flatten();
                (current, version.to_string())
            }
            None => {
                let info = self.check_version(tool, &CheckOptions::forced()).await?;
                if !info.installed {
                    return Err(UpdateError::NotUpdatable(tool.to_string()));
                }
                let latest = info
                    .latest_version
                    .ok_or_else(|| UpdateError::NotUpdatable(tool.to_string()))?;
                (info.current_version, latest)
            }
        };

        if options.timeout.is_none() {
            options.timeout = Some(self.read_config().update_timeout);
        }

        update_with_events(
            &self.checker,
            &self.updater,
            self.scheduler.emitter(),
            tool,
            current,
            &target,
            options,
        )
        .await?;

        Ok(target)
    }

    pub fn get_update_command(&self, tool: &str, version: Option<&str>) -> String {
        self.updater.get_update_command(tool, version)
    }

    pub fn get_update_status(&self, tool: &str) -> Option<UpdateStatus> {
        self.updater.get_status(tool)
    }

    pub async fn list_backups(&self, tool: &str) -> Result<Vec<BackupRecord>, BackupError> {
        self.updater.list_backups(tool).await
    }

    pub async fn clean_backups(&self, tool: &str, keep_count: usize) -> Result<usize, BackupError> {
        self.updater.clean_backups(tool, keep_count).await
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    pub fn schedule_check(
        &self,
        tool: &str,
        interval: Duration,
        auto_update: bool,
    ) -> Result<ScheduleConfig, ScheduleError> {
        self.scheduler.schedule_check(tool, interval, auto_update)
    }

    pub fn cancel_schedule(&self, tool: &str) -> bool {
        self.scheduler.cancel_schedule(tool)
    }

    pub fn enable_schedule(&self, tool: &str) -> bool {
        self.scheduler.enable_schedule(tool)
    }

    pub fn disable_schedule(&self, tool: &str) -> bool {
        self.scheduler.disable_schedule(tool)
    }

    pub fn remove_schedule(&self, tool: &str) -> bool {
        self.scheduler.remove_schedule(tool)
    }

    pub fn update_schedule(
        &self,
        tool: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleConfig, ScheduleError> {
        self.scheduler.update_schedule(tool, patch)
    }

    pub fn get_schedules(&self) -> Vec<ScheduleConfig> {
        self.scheduler.get_all_schedules()
    }

    pub fn start_scheduler(&self) {
        self.scheduler.start();
    }

    pub fn stop_scheduler(&self) {
        self.scheduler.stop();
    }

    pub async fn trigger_check(&self, tool: &str) -> Result<(), ScheduleError> {
        self.scheduler.trigger_check(tool).await
    }

    /// Checks every enabled schedule now, returning how many ran
    pub async fn check_all_scheduled(&self) -> usize {
        self.scheduler.trigger_all_checks().await
    }

    // ---------------------------------------------------------------------
    // Events, statistics, state
    // ---------------------------------------------------------------------

    /// Receives every event matching `filter`, in emission order
    pub fn subscribe(&self, filter: impl Into<EventFilter>) -> UnboundedReceiver<VersionEvent> {
        self.bus.subscribe(filter)
    }

    pub fn get_statistics(&self) -> ServiceStats {
        ServiceStats::collect(
            self.checker.get_stats(),
            self.cache.get_stats(),
            self.updater.get_stats(),
            self.scheduler.get_stats(),
        )
    }

    pub fn reset_statistics(&self) {
        self.checker.reset_stats();
        self.cache.reset_stats();
        self.updater.reset_stats();
    }

    /// Serialises configuration, cache contents and schedules as one JSON document
    pub fn export_config(&self) -> Result<String, ConfigError> {
        ExportedState {
            config: self.config(),
            cache: self.cache.export(),
            schedules: self.scheduler.export_schedules(),
            exported_at: Utc::now(),
        }
        .to_json()
    }

    /// Replaces configuration, cache contents and schedules from a document
    /// produced by [`VersionService::export_config`]. The whole document is
    /// validated first; on error nothing is applied.
    pub fn import_config(&self, json: &str) -> Result<(), ConfigError> {
        let state = ExportedState::parse(json)?;

        self.apply_config(state.config);
        self.scheduler.import_schedules(state.schedules)?;
        let entries = state.cache.len();
        self.cache.import(state.cache);

        debug!("Imported state with {} cache entries", entries);
        Ok(())
    }
}

/// Republishes every event from the components' channel on the bus
fn spawn_forwarder(mut events: UnboundedReceiver<VersionEvent>, bus: Arc<EventBus>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            bus.publish(&event);
        }
        debug!("Event forwarder finished");
    });
}
