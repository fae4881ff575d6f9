//! Tool updates with progress reporting and rollback
//!
//! An update walks `idle(0) → checking(10) → downloading(30) →
//! installing(70) → installing(90) → completed(100)`, reporting every
//! transition to the optional progress callback. At most one update per
//! tool may be non-terminal; overlapping attempts are rejected, not queued.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{DEFAULT_UPDATE_TIMEOUT_MS, duration_ms};
use crate::update::backup::{BackupRecord, BackupStore};
use crate::update::command::get_update_command;
use crate::update::error::{BackupError, UpdateError};
use crate::update::executor::UpdateExecutor;
use crate::update::status::{ProgressCallback, UpdateState, UpdateStatus};

type StatusTable = Arc<Mutex<HashMap<String, UpdateStatus>>>;

fn lock_statuses(statuses: &StatusTable) -> MutexGuard<'_, HashMap<String, UpdateStatus>> {
    statuses.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct UpdateOptions {
    /// Back up the current installation and restore it if the update fails
    pub backup: bool,
    /// Bound on the install and verify steps; the updater default when `None`
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("backup", &self.backup)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStats {
    pub total_updates: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
    #[serde(with = "duration_ms")]
    pub total_update_time: Duration,
    #[serde(with = "duration_ms")]
    pub average_update_time: Duration,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct StatsState {
    total: u64,
    successful: u64,
    failed: u64,
    elapsed: Duration,
}

/// Handle on a registered update.
///
/// Dropping it before `complete`/`fail` marks the update failed, so a
/// cancelled update never blocks later attempts for the same tool.
struct ActiveUpdate {
    tool: String,
    statuses: StatusTable,
    on_progress: Option<ProgressCallback>,
    finished: bool,
    rollback_error: Option<String>,
}

impl ActiveUpdate {
    fn transition(&self, state: UpdateState, progress: u8, message: impl Into<String>) {
        let message = message.into();
        let snapshot = {
            let mut statuses = lock_statuses(&self.statuses);
            statuses.get_mut(&self.tool).map(|status| {
                status.state = state;
                status.progress = status.progress.max(progress);
                status.message = message;
                if state.is_terminal() {
                    status.finished_at = Some(Utc::now());
                }
                status.to_progress()
            })
        };

        if let (Some(callback), Some(progress)) = (&self.on_progress, snapshot) {
            callback(&progress);
        }
    }

    fn complete(mut self, message: String) {
        self.finished = true;
        self.transition(UpdateState::Completed, 100, message);
    }

    fn fail(mut self, error: &UpdateError) {
        self.finished = true;
        {
            let mut statuses = lock_statuses(&self.statuses);
            if let Some(status) = statuses.get_mut(&self.tool) {
                status.error = Some(error.to_string());
                status.rollback_error = self.rollback_error.take();
            }
        }
        self.transition(UpdateState::Failed, 0, error.to_string());
    }
}

impl Drop for ActiveUpdate {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut statuses = lock_statuses(&self.statuses);
        if let Some(status) = statuses.get_mut(&self.tool) {
            if !status.state.is_terminal() {
                warn!("Update of {} was cancelled", self.tool);
                status.state = UpdateState::Failed;
                status.message = "Update cancelled".to_string();
                status.error = Some("Update cancelled".to_string());
                status.finished_at = Some(Utc::now());
            }
        }
    }
}

pub struct VersionUpdater {
    executor: Arc<dyn UpdateExecutor>,
    backups: BackupStore,
    statuses: StatusTable,
    stats: Mutex<StatsState>,
    default_timeout_ms: AtomicU64,
}

impl VersionUpdater {
    pub fn new(executor: Arc<dyn UpdateExecutor>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            backups: BackupStore::new(backup_dir),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            stats: Mutex::new(StatsState::default()),
            default_timeout_ms: AtomicU64::new(DEFAULT_UPDATE_TIMEOUT_MS),
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

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Update `tool` to exactly `version`.
    ///
    /// Fails fast with [`UpdateError::ConcurrentUpdate`] if another update of
    /// the same tool has not finished. When a backup was taken and a later
    /// step fails, the backup is restored before the original error is
    /// returned; a failed restore is logged and recorded on the status.
    pub async fn update(
        &self,
        tool: &str,
        version: &str,
        options: &UpdateOptions,
    ) -> Result<(), UpdateError> {
        let mut active = self.register(tool, version, options.on_progress.clone())?;
        let started = Instant::now();

        let result = self.run(&mut active, tool, version, options).await;

        self.record(result.is_ok(), started.elapsed());
        match &result {
            Ok(()) => {
                info!("Updated {} to {}", tool, version);
                active.complete(format!("Updated {tool} to {version}"));
            }
            Err(e) => {
                error!("Update of {} to {} failed: {}", tool, version, e);
                active.fail(e);
            }
        }

        result
    }

    fn register(
        &self,
        tool: &str,
        version: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ActiveUpdate, UpdateError> {
        {
            let mut statuses = lock_statuses(&self.statuses);
            if statuses
                .get(tool)
                .is_some_and(|status| !status.state.is_terminal())
            {
                warn!("Rejecting update of {}: already in progress", tool);
                return Err(UpdateError::ConcurrentUpdate(tool.to_string()));
            }
            statuses.insert(tool.to_string(), UpdateStatus::new(tool, version));
        }

        let active = ActiveUpdate {
            tool: tool.to_string(),
            statuses: self.statuses.clone(),
            on_progress,
            finished: false,
            rollback_error: None,
        };
        active.transition(
            UpdateState::Idle,
            0,
            format!("Preparing update of {tool} to {version}"),
        );
        Ok(active)
    }

    async fn run(
        &self,
        active: &mut ActiveUpdate,
        tool: &str,
        version: &str,
        options: &UpdateOptions,
    ) -> Result<(), UpdateError> {
        active.transition(UpdateState::Checking, 10, format!("Locating {tool}"));
        let location = self
            .executor
            .locate(tool)
            .await
            .ok_or_else(|| UpdateError::NotUpdatable(tool.to_string()))?;

        let backup = if options.backup {
            active.transition(
                UpdateState::Downloading,
                30,
                format!("Backing up {tool} before downloading {version}"),
            );
            let record = self
                .backups
                .create(tool, &location)
                .await
                .map_err(|source| UpdateError::Backup {
                    tool: tool.to_string(),
                    source,
                })?;
            Some(record)
        } else {
            active.transition(
                UpdateState::Downloading,
                30,
                format!("Downloading {tool} {version}"),
            );
            None
        };

        let timeout = options.timeout.unwrap_or_else(|| self.default_timeout());
        let result = self.install_and_verify(active, tool, version, timeout).await;

        if let (Err(_), Some(record)) = (&result, &backup) {
            active.rollback_error = self
                .rollback(record)
                .await
                .err()
                .map(|e| e.to_string());
        }

        result
    }

    async fn install_and_verify(
        &self,
        active: &ActiveUpdate,
        tool: &str,
        version: &str,
        timeout: Duration,
    ) -> Result<(), UpdateError> {
        let timed_out = || UpdateError::Timeout {
            tool: tool.to_string(),
            timeout,
        };

        active.transition(
            UpdateState::Installing,
            70,
            format!("Installing {tool} {version}"),
        );
        let command = get_update_command(tool, Some(version));
        tokio::time::timeout(timeout, self.executor.install(tool, version, &command))
            .await
            .map_err(|_| timed_out())?
            .map_err(|source| UpdateError::Install {
                tool: tool.to_string(),
                version: version.to_string(),
                source,
            })?;

        active.transition(
            UpdateState::Installing,
            90,
            format!("Verifying {tool} {version}"),
        );
        let found = tokio::time::timeout(timeout, self.executor.installed_version(tool))
            .await
            .map_err(|_| timed_out())?;

        if found.as_deref() != Some(version) {
            return Err(UpdateError::Verification {
                tool: tool.to_string(),
                expected: version.to_string(),
                found,
            });
        }

        Ok(())
    }

    async fn rollback(&self, record: &BackupRecord) -> Result<(), BackupError> {
        warn!("Rolling back {} from {:?}", record.tool, record.backup_path);
        let result = self.backups.restore(record).await;
        if let Err(e) = &result {
            error!("Rollback of {} failed: {}", record.tool, e);
        }
        result
    }

    fn record(&self, success: bool, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total += 1;
        stats.elapsed += elapsed;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
    }

    pub fn get_update_command(&self, tool: &str, version: Option<&str>) -> String {
        get_update_command(tool, version)
    }

    pub fn get_status(&self, tool: &str) -> Option<UpdateStatus> {
        lock_statuses(&self.statuses).get(tool).cloned()
    }

    pub fn get_all_statuses(&self) -> Vec<UpdateStatus> {
        lock_statuses(&self.statuses).values().cloned().collect()
    }

    pub fn is_updating(&self, tool: &str) -> bool {
        lock_statuses(&self.statuses)
            .get(tool)
            .is_some_and(|status| !status.state.is_terminal())
    }

    /// Forgets completed and failed updates, returning how many were dropped
    pub fn clear_finished(&self) -> usize {
        let mut statuses = lock_statuses(&self.statuses);
        let before = statuses.len();
        statuses.retain(|_, status| !status.state.is_terminal());
        before - statuses.len()
    }

    pub async fn list_backups(&self, tool: &str) -> Result<Vec<BackupRecord>, BackupError> {
        self.backups.list(tool).await
    }

    pub async fn clean_backups(&self, tool: &str, keep_count: usize) -> Result<usize, BackupError> {
        self.backups.clean(tool, keep_count).await
    }

    pub fn get_stats(&self) -> UpdaterStats {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let average = u32::try_from(stats.total)
            .ok()
            .filter(|total| *total > 0)
            .map(|total| stats.elapsed / total)
            .unwrap_or_default();

        UpdaterStats {
            total_updates: stats.total,
            successful_updates: stats.successful,
            failed_updates: stats.failed,
            total_update_time: stats.elapsed,
            average_update_time: average,
            success_rate: if stats.total == 0 {
                0.0
            } else {
                stats.successful as f64 / stats.total as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = StatsState::default();
    }
}

/// Progress callback that collects every transition, for inspection
#[cfg(test)]
pub(crate) fn recording_callback() -> (
    ProgressCallback,
    Arc<Mutex<Vec<crate::update::status::UpdateProgress>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |progress: &crate::update::status::UpdateProgress| {
        sink.lock().unwrap().push(progress.clone());
    });
    (callback, seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::error::ExecutorError;
    use crate::update::executor::MockUpdateExecutor;
    use std::path::Path;
    use tempfile::TempDir;

    /// Executor over a real file: installing overwrites it with the version
    struct FileExecutor {
        artifact: PathBuf,
        install_delay: Duration,
        fail_install: bool,
    }

    impl FileExecutor {
        fn new(artifact: &Path) -> Self {
            Self {
                artifact: artifact.to_path_buf(),
                install_delay: Duration::ZERO,
                fail_install: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl UpdateExecutor for FileExecutor {
        async fn locate(&self, _tool: &str) -> Option<PathBuf> {
            self.artifact.exists().then(|| self.artifact.clone())
        }

        async fn install(
            &self,
            _tool: &str,
            version: &str,
            _command: &str,
        ) -> Result<(), ExecutorError> {
            tokio::time::sleep(self.install_delay).await;
            if self.fail_install {
                tokio::fs::write(&self.artifact, "half-written").await?;
                return Err(ExecutorError::Command("disk full".to_string()));
            }
            tokio::fs::write(&self.artifact, version).await?;
            Ok(())
        }

        async fn installed_version(&self, _tool: &str) -> Option<String> {
            tokio::fs::read_to_string(&self.artifact).await.ok()
        }
    }

    fn setup(contents: &str) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("tool");
        std::fs::write(&artifact, contents).unwrap();
        (temp_dir, artifact)
    }

    #[tokio::test]
    async fn successful_update_reports_every_transition_in_order() {
        let (temp_dir, artifact) = setup("1.0.0");
        let updater = VersionUpdater::new(
            Arc::new(FileExecutor::new(&artifact)),
            temp_dir.path().join("backups"),
        );
        let (callback, seen) = recording_callback();
        let options = UpdateOptions {
            on_progress: Some(callback),
            ..UpdateOptions::default()
        };

        updater.update("tool", "2.0.0", &options).await.unwrap();

        let seen = seen.lock().unwrap();
        let steps: Vec<_> = seen.iter().map(|p| (p.state, p.progress)).collect();
        assert_eq!(
            steps,
            vec![
                (UpdateState::Idle, 0),
                (UpdateState::Checking, 10),
                (UpdateState::Downloading, 30),
                (UpdateState::Installing, 70),
                (UpdateState::Installing, 90),
                (UpdateState::Completed, 100),
            ]
        );
        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "2.0.0");
        assert_eq!(
            updater.get_status("tool").map(|s| s.state),
            Some(UpdateState::Completed)
        );
    }

    #[tokio::test]
    async fn second_update_for_same_tool_is_rejected_while_first_runs() {
        let (temp_dir, artifact) = setup("1.0.0");
        let executor = FileExecutor {
            install_delay: Duration::from_millis(50),
            ..FileExecutor::new(&artifact)
        };
        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));
        let options = UpdateOptions::default();

        let (first, second) = tokio::join!(
            updater.update("tool", "2.0.0", &options),
            updater.update("tool", "2.0.0", &options),
        );

        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert!(matches!(err, UpdateError::ConcurrentUpdate(_)));
        assert!(err.to_string().contains("already in progress"));
        assert_eq!(updater.get_stats().total_updates, 1);
    }

    #[tokio::test]
    async fn failed_install_rolls_back_and_returns_install_error() {
        let (temp_dir, artifact) = setup("1.0.0");
        let executor = FileExecutor {
            fail_install: true,
            ..FileExecutor::new(&artifact)
        };
        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));
        let options = UpdateOptions {
            backup: true,
            ..UpdateOptions::default()
        };

        let err = updater.update("tool", "2.0.0", &options).await.unwrap_err();

        assert!(matches!(err, UpdateError::Install { .. }));
        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "1.0.0");
        let status = updater.get_status("tool").unwrap();
        assert_eq!(status.state, UpdateState::Failed);
        assert_eq!(status.rollback_error, None);
        assert_eq!(updater.list_backups("tool").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_rollback_keeps_original_error() {
        let (temp_dir, artifact) = setup("1.0.0");
        let backups = temp_dir.path().join("backups");
        let artifact_for_install = artifact.clone();
        let backups_for_install = backups.clone();

        let mut executor = MockUpdateExecutor::new();
        executor
            .expect_locate()
            .returning(move |_| Some(artifact.clone()));
        executor.expect_install().returning(move |_, _, _| {
            // Losing the backup directory makes the restore fail
            std::fs::remove_dir_all(&backups_for_install).unwrap();
            std::fs::write(&artifact_for_install, "half-written").unwrap();
            Err(ExecutorError::Command("exit 1".to_string()))
        });

        let updater = VersionUpdater::new(Arc::new(executor), backups);
        let options = UpdateOptions {
            backup: true,
            ..UpdateOptions::default()
        };

        let err = updater.update("tool", "2.0.0", &options).await.unwrap_err();

        assert!(matches!(err, UpdateError::Install { .. }));
        assert!(updater.get_status("tool").unwrap().rollback_error.is_some());
    }

    #[tokio::test]
    async fn version_mismatch_after_install_is_a_verification_error() {
        let (temp_dir, artifact) = setup("1.0.0");
        let mut executor = MockUpdateExecutor::new();
        executor
            .expect_locate()
            .returning(move |_| Some(artifact.clone()));
        executor.expect_install().returning(|_, _, _| Ok(()));
        executor
            .expect_installed_version()
            .returning(|_| Some("1.9.0".to_string()));

        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));

        let err = updater
            .update("tool", "2.0.0", &UpdateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::Verification { ref found, .. } if found.as_deref() == Some("1.9.0")
        ));
        assert_eq!(updater.get_stats().failed_updates, 1);
    }

    #[tokio::test]
    async fn missing_installation_is_not_updatable() {
        let temp_dir = TempDir::new().unwrap();
        let mut executor = MockUpdateExecutor::new();
        executor.expect_locate().returning(|_| None);
        executor.expect_install().times(0);

        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));
        let (callback, seen) = recording_callback();
        let options = UpdateOptions {
            on_progress: Some(callback),
            ..UpdateOptions::default()
        };

        let err = updater.update("ghost", "1.0.0", &options).await.unwrap_err();

        assert!(matches!(err, UpdateError::NotUpdatable(_)));
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.state, UpdateState::Failed);
        assert_eq!(last.progress, 10);
        assert!(!updater.is_updating("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_install_times_out_and_frees_the_tool() {
        let (temp_dir, artifact) = setup("1.0.0");
        let executor = FileExecutor {
            install_delay: Duration::from_secs(3600),
            ..FileExecutor::new(&artifact)
        };
        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));
        let options = UpdateOptions {
            timeout: Some(Duration::from_millis(100)),
            ..UpdateOptions::default()
        };

        let err = updater.update("tool", "2.0.0", &options).await.unwrap_err();

        assert!(matches!(err, UpdateError::Timeout { .. }));
        assert!(!updater.is_updating("tool"));
    }

    #[tokio::test]
    async fn dropped_update_is_marked_failed() {
        let (temp_dir, artifact) = setup("1.0.0");
        let executor = FileExecutor {
            install_delay: Duration::from_secs(3600),
            ..FileExecutor::new(&artifact)
        };
        let updater = VersionUpdater::new(Arc::new(executor), temp_dir.path().join("backups"));
        let options = UpdateOptions::default();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), updater.update("tool", "2.0.0", &options))
                .await;

        assert!(cancelled.is_err());
        assert_eq!(
            updater.get_status("tool").map(|s| s.state),
            Some(UpdateState::Failed)
        );
        assert!(!updater.is_updating("tool"));
    }

    #[tokio::test]
    async fn stats_and_housekeeping() {
        let (temp_dir, artifact) = setup("1.0.0");
        let updater = VersionUpdater::new(
            Arc::new(FileExecutor::new(&artifact)),
            temp_dir.path().join("backups"),
        );
        let options = UpdateOptions {
            backup: true,
            ..UpdateOptions::default()
        };

        updater.update("tool", "2.0.0", &options).await.unwrap();
        updater.update("tool", "3.0.0", &options).await.unwrap();

        let stats = updater.get_stats();
        assert_eq!(stats.total_updates, 2);
        assert_eq!(stats.successful_updates, 2);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

        assert_eq!(updater.clean_backups("tool", 1).await.unwrap(), 1);
        assert_eq!(updater.list_backups("tool").await.unwrap().len(), 1);
        assert_eq!(updater.clear_finished(), 1);
        assert!(updater.get_all_statuses().is_empty());
    }
}
