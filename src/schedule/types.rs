//! Schedule configuration and scheduler statistics

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::schedule::error::ScheduleError;

/// Periodic check configuration for one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub tool: String,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    pub enabled: bool,
    /// Update immediately when a scheduled check finds a newer version
    pub auto_update: bool,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_check: Option<DateTime<Utc>>,
}

impl ScheduleConfig {
    /// An enabled schedule whose first check is one interval from `now`
    pub fn new(tool: &str, interval: Duration, auto_update: bool, now: DateTime<Utc>) -> Self {
        Self {
            tool: tool.to_string(),
            interval,
            enabled: true,
            auto_update,
            last_check: None,
            next_check: Some(after(now, interval)),
        }
    }

    /// Enabled and its next check has elapsed. An enabled schedule without a
    /// next check is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_check.is_none_or(|next| next <= now)
    }

    /// Records a check at `now` and pushes the next one out by one interval
    pub(crate) fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_check = Some(now);
        self.next_check = Some(after(now, self.interval));
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.interval.is_zero() {
            return Err(ScheduleError::InvalidInterval {
                tool: self.tool.clone(),
                interval: self.interval,
            });
        }
        Ok(())
    }
}

/// Partial update for [`ScheduleConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(with = "duration_ms::option")]
    pub interval: Option<Duration>,
    pub enabled: Option<bool>,
    pub auto_update: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub disabled_schedules: usize,
    pub auto_update_enabled: usize,
    pub running: bool,
}

/// `now + interval`, saturating at the largest representable time
pub(crate) fn after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, Some(-1), true)]
    #[case(true, Some(0), true)]
    #[case(true, Some(1), false)]
    #[case(true, None, true)]
    #[case(false, Some(-1), false)]
    #[case(false, None, false)]
    fn is_due_requires_enabled_and_elapsed(
        #[case] enabled: bool,
        #[case] next_offset_secs: Option<i64>,
        #[case] expected: bool,
    ) {
        let now = Utc::now();
        let schedule = ScheduleConfig {
            enabled,
            next_check: next_offset_secs.map(|secs| now + TimeDelta::seconds(secs)),
            ..ScheduleConfig::new("node", Duration::from_secs(60), false, now)
        };

        assert_eq!(schedule.is_due(now), expected);
    }

    #[test]
    fn mark_checked_moves_next_check_one_interval_ahead() {
        let now = Utc::now();
        let mut schedule = ScheduleConfig::new("node", Duration::from_secs(90), false, now);

        schedule.mark_checked(now);

        assert_eq!(schedule.last_check, Some(now));
        assert_eq!(schedule.next_check, Some(now + TimeDelta::seconds(90)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let schedule = ScheduleConfig::new("node", Duration::ZERO, false, Utc::now());

        assert!(matches!(
            schedule.validate(),
            Err(ScheduleError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn schedule_round_trips_with_millisecond_interval() {
        let json = serde_json::json!({
            "tool": "deno",
            "interval": 1500,
            "enabled": false,
            "autoUpdate": true
        });

        let schedule: ScheduleConfig = serde_json::from_value(json).unwrap();

        assert_eq!(schedule.interval, Duration::from_millis(1500));
        assert!(schedule.auto_update);
        assert_eq!(schedule.next_check, None);
    }
}
