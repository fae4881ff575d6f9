//! Periodic version checks driven by one global ticker
//!
//! A single background task ticks every `tick_interval` and, on each tick,
//! checks every enabled schedule whose `next_check` has elapsed. Due
//! schedules are marked (last/next check) before their checks launch, so a
//! slow check is never launched twice by consecutive ticks. Checks for
//! different tools run concurrently and a failure of one never affects the
//! others; failures surface only as events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::schedule::error::ScheduleError;
use crate::schedule::events::{EventData, EventEmitter, EventKind, VersionEvent};
use crate::schedule::types::{ScheduleConfig, SchedulePatch, SchedulerStats, after};
use crate::update::error::UpdateError;
use crate::update::status::UpdateProgress;
use crate::update::updater::{UpdateOptions, VersionUpdater};
use crate::version::checker::{CheckOptions, VersionChecker};

struct Driver {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    checker: Arc<VersionChecker>,
    updater: Arc<VersionUpdater>,
    emitter: EventEmitter,
    schedules: Mutex<IndexMap<String, ScheduleConfig>>,
    tick_interval: Duration,
    driver: Mutex<Option<Driver>>,
}

pub struct VersionScheduler {
    inner: Arc<Inner>,
}

impl VersionScheduler {
    /// Creates a stopped scheduler and the receiving end of its event channel
    pub fn new(
        checker: Arc<VersionChecker>,
        updater: Arc<VersionUpdater>,
        tick_interval: Duration,
    ) -> (Self, UnboundedReceiver<VersionEvent>) {
        let (emitter, events) = EventEmitter::channel();
        let scheduler = Self::with_emitter(checker, updater, tick_interval, emitter);
        (scheduler, events)
    }

    /// Creates a stopped scheduler that emits into an existing channel
    pub fn with_emitter(
        checker: Arc<VersionChecker>,
        updater: Arc<VersionUpdater>,
        tick_interval: Duration,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                checker,
                updater,
                emitter,
                schedules: Mutex::new(IndexMap::new()),
                tick_interval,
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    pub fn tick_interval(&self) -> Duration {
        self.inner.tick_interval
    }

    /// Adds or replaces the schedule for `tool`; the first check is one interval away
    pub fn schedule_check(
        &self,
        tool: &str,
        interval: Duration,
        auto_update: bool,
    ) -> Result<ScheduleConfig, ScheduleError> {
        let schedule = ScheduleConfig::new(tool, interval, auto_update, Utc::now());
        schedule.validate()?;

        info!(
            "Scheduled {} every {:?} (auto-update: {})",
            tool, interval, auto_update
        );
        self.inner
            .schedules()
            .insert(tool.to_string(), schedule.clone());
        Ok(schedule)
    }

    /// Disables the schedule and forgets its next check
    pub fn cancel_schedule(&self, tool: &str) -> bool {
        self.inner.modify(tool, |schedule| {
            schedule.enabled = false;
            schedule.next_check = None;
        })
    }

    /// Disables the schedule, keeping its bookkeeping
    pub fn disable_schedule(&self, tool: &str) -> bool {
        self.inner.modify(tool, |schedule| schedule.enabled = false)
    }

    /// Re-enables the schedule. If it has no next check, it gets one an interval from now.
    pub fn enable_schedule(&self, tool: &str) -> bool {
        let now = Utc::now();
        self.inner.modify(tool, |schedule| {
            schedule.enabled = true;
            schedule
                .next_check
                .get_or_insert_with(|| after(now, schedule.interval));
        })
    }

    pub fn remove_schedule(&self, tool: &str) -> bool {
        self.inner.schedules().shift_remove(tool).is_some()
    }

    /// Applies a partial update. A new interval reschedules the next check from now.
    pub fn update_schedule(
        &self,
        tool: &str,
        patch: SchedulePatch,
    ) -> Result<ScheduleConfig, ScheduleError> {
        let mut schedules = self.inner.schedules();
        let schedule = schedules
            .get_mut(tool)
            .ok_or_else(|| ScheduleError::NotFound(tool.to_string()))?;

        let now = Utc::now();
        let mut updated = schedule.clone();
        if let Some(interval) = patch.interval {
            updated.interval = interval;
            updated.next_check = Some(after(now, interval));
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
            if enabled {
                updated
                    .next_check
                    .get_or_insert_with(|| after(now, updated.interval));
            }
        }
        if let Some(auto_update) = patch.auto_update {
            updated.auto_update = auto_update;
        }
        updated.validate()?;

        *schedule = updated.clone();
        Ok(updated)
    }

    pub fn get_schedule(&self, tool: &str) -> Option<ScheduleConfig> {
        self.inner.schedules().get(tool).cloned()
    }

    pub fn get_all_schedules(&self) -> Vec<ScheduleConfig> {
        self.inner.schedules().values().cloned().collect()
    }

    pub fn get_enabled_schedules(&self) -> Vec<ScheduleConfig> {
        self.inner
            .schedules()
            .values()
            .filter(|schedule| schedule.enabled)
            .cloned()
            .collect()
    }

    /// Starts the ticker. Does nothing if it is already running.
    pub fn start(&self) {
        let mut driver = self.inner.driver();
        if driver
            .as_ref()
            .is_some_and(|driver| !driver.handle.is_finished())
        {
            debug!("Scheduler already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::spawn(inner.clone().run_due_checks());
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Scheduler ticker shutting down");
                        break;
                    }
                }
            }
        });

        info!("Scheduler started (tick {:?})", self.inner.tick_interval);
        *driver = Some(Driver { shutdown, handle });
    }

    /// Stops the ticker. Does nothing if it is not running. Checks already
    /// launched run to completion.
    pub fn stop(&self) {
        if let Some(driver) = self.inner.driver().take() {
            let _ = driver.shutdown.send(());
            info!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .driver()
            .as_ref()
            .is_some_and(|driver| !driver.handle.is_finished())
    }

    /// Runs one tick: checks every due schedule and returns how many ran
    pub async fn run_due_checks(&self) -> usize {
        self.inner.clone().run_due_checks().await
    }

    /// Checks `tool` now, with the same bookkeeping as a scheduled firing
    pub async fn trigger_check(&self, tool: &str) -> Result<(), ScheduleError> {
        let auto_update = {
            let mut schedules = self.inner.schedules();
            let schedule = schedules
                .get_mut(tool)
                .ok_or_else(|| ScheduleError::NotFound(tool.to_string()))?;
            schedule.mark_checked(Utc::now());
            schedule.auto_update
        };

        self.inner.run_check(tool, auto_update).await;
        Ok(())
    }

    /// Checks every enabled schedule now, due or not, returning how many ran
    pub async fn trigger_all_checks(&self) -> usize {
        let now = Utc::now();
        let targets = self.inner.mark(|schedule| schedule.enabled, now);
        self.inner.run_checks(targets).await
    }

    /// Time left until the next check; `None` if unscheduled or disabled
    pub fn get_time_until_next_check(&self, tool: &str) -> Option<Duration> {
        let schedules = self.inner.schedules();
        let schedule = schedules.get(tool).filter(|schedule| schedule.enabled)?;
        let next = schedule.next_check?;
        Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn export_schedules(&self) -> Vec<ScheduleConfig> {
        self.get_all_schedules()
    }

    /// Replaces every schedule. Nothing changes if any schedule is invalid.
    pub fn import_schedules(&self, schedules: Vec<ScheduleConfig>) -> Result<(), ScheduleError> {
        for schedule in &schedules {
            schedule.validate()?;
        }

        let mut table = self.inner.schedules();
        table.clear();
        table.extend(
            schedules
                .into_iter()
                .map(|schedule| (schedule.tool.clone(), schedule)),
        );
        info!("Imported {} schedules", table.len());
        Ok(())
    }

    pub fn get_stats(&self) -> SchedulerStats {
        let running = self.is_running();
        let schedules = self.inner.schedules();
        let enabled = schedules.values().filter(|s| s.enabled).count();

        SchedulerStats {
            total_schedules: schedules.len(),
            enabled_schedules: enabled,
            disabled_schedules: schedules.len() - enabled,
            auto_update_enabled: schedules.values().filter(|s| s.auto_update).count(),
            running,
        }
    }
}

impl Drop for VersionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn schedules(&self) -> MutexGuard<'_, IndexMap<String, ScheduleConfig>> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn driver(&self) -> MutexGuard<'_, Option<Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn modify(&self, tool: &str, change: impl FnOnce(&mut ScheduleConfig)) -> bool {
        match self.schedules().get_mut(tool) {
            Some(schedule) => {
                change(schedule);
                true
            }
            None => false,
        }
    }

    /// Marks every schedule selected by `select` as checked at `now`,
    /// returning `(tool, auto_update)` for each
    fn mark(
        &self,
        select: impl Fn(&ScheduleConfig) -> bool,
        now: DateTime<Utc>,
    ) -> Vec<(String, bool)> {
        self.schedules()
            .values_mut()
            .filter(|schedule| select(schedule))
            .map(|schedule| {
                schedule.mark_checked(now);
                (schedule.tool.clone(), schedule.auto_update)
            })
            .collect()
    }

    async fn run_due_checks(self: Arc<Self>) -> usize {
        let now = Utc::now();
        let due = self.mark(|schedule| schedule.is_due(now), now);
        if !due.is_empty() {
            debug!("{} scheduled checks due", due.len());
        }
        self.run_checks(due).await
    }

    async fn run_checks(&self, targets: Vec<(String, bool)>) -> usize {
        let count = targets.len();
        join_all(
            targets
                .iter()
                .map(|(tool, auto_update)| self.run_check(tool, *auto_update)),
        )
        .await;
        count
    }

    /// Checks one tool, reporting only through events
    async fn run_check(&self, tool: &str, auto_update: bool) {
        let emitter = &self.emitter;
        emitter.emit(EventKind::CheckStarted, tool, None);

        let info = match self
            .checker
            .check_version(tool, &CheckOptions::forced())
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!("Scheduled check of {} failed: {}", tool, e);
                emitter.emit(
                    EventKind::CheckFailed,
                    tool,
                    Some(EventData::Error {
                        message: e.to_string(),
                    }),
                );
                return;
            }
        };

        emitter.emit(
            EventKind::CheckCompleted,
            tool,
            Some(EventData::Info(info.clone())),
        );

        let Some(latest) = info.latest_version.as_deref().filter(|_| info.update_available) else {
            return;
        };

        info!(
            "Update available for {}: {:?} -> {}",
            tool, info.current_version, latest
        );
        emitter.emit(
            EventKind::UpdateAvailable,
            tool,
            Some(EventData::Update {
                current_version: info.current_version.clone(),
                target_version: latest.to_string(),
            }),
        );

        if auto_update {
            let options = UpdateOptions {
                backup: true,
                ..UpdateOptions::default()
            };
            // Failures are already reported as update-failed
            let _ = update_with_events(
                &self.checker,
                &self.updater,
                emitter,
                tool,
                info.current_version.clone(),
                latest,
                options,
            )
            .await;
        }
    }
}

/// Runs an update, reporting start, every progress transition and the
/// outcome as events, then drops the tool's cached check result.
pub(crate) async fn update_with_events(
    checker: &VersionChecker,
    updater: &VersionUpdater,
    emitter: &EventEmitter,
    tool: &str,
    current_version: Option<String>,
    target_version: &str,
    mut options: UpdateOptions,
) -> Result<(), UpdateError> {
    let transition = EventData::Update {
        current_version,
        target_version: target_version.to_string(),
    };
    emitter.emit(EventKind::UpdateStarted, tool, Some(transition.clone()));

    let progress_emitter = emitter.clone();
    let caller_callback = options.on_progress.take();
    options.on_progress = Some(Arc::new(move |progress: &UpdateProgress| {
        progress_emitter.emit(
            EventKind::UpdateProgress,
            &progress.tool,
            Some(EventData::Progress(progress.clone())),
        );
        if let Some(callback) = &caller_callback {
            callback(progress);
        }
    }));

    let result = updater.update(tool, target_version, &options).await;
    checker.invalidate(tool);

    match &result {
        Ok(()) => emitter.emit(EventKind::UpdateCompleted, tool, Some(transition)),
        Err(e) => emitter.emit(
            EventKind::UpdateFailed,
            tool,
            Some(EventData::Error {
                message: e.to_string(),
            }),
        ),
    }

    result
}
