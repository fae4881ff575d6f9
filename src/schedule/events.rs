//! Typed events emitted by scheduled checks and updates
//!
//! Producers write into one [`EventEmitter`] channel. The service drains it
//! and fans every event out through an [`EventBus`] to subscribers, which
//! keeps events for one tool in emission order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::update::status::UpdateProgress;
use crate::version::types::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CheckStarted,
    CheckCompleted,
    CheckFailed,
    UpdateAvailable,
    UpdateStarted,
    UpdateProgress,
    UpdateCompleted,
    UpdateFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckStarted => "check-started",
            Self::CheckCompleted => "check-completed",
            Self::CheckFailed => "check-failed",
            Self::UpdateAvailable => "update-available",
            Self::UpdateStarted => "update-started",
            Self::UpdateProgress => "update-progress",
            Self::UpdateCompleted => "update-completed",
            Self::UpdateFailed => "update-failed",
        }
    }
}

/// Payload of a [`VersionEvent`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Info(VersionInfo),
    Progress(UpdateProgress),
    #[serde(rename_all = "camelCase")]
    Update {
        current_version: Option<String>,
        target_version: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
    pub timestamp: DateTime<Utc>,
}

impl VersionEvent {
    pub fn new(kind: EventKind, tool: &str, data: Option<EventData>) -> Self {
        Self {
            kind,
            tool: tool.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Sending half of the event channel shared by the scheduler and the service
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: UnboundedSender<VersionEvent>,
}

impl EventEmitter {
    pub fn channel() -> (Self, UnboundedReceiver<VersionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event. Nobody listening is not an error.
    pub fn emit(&self, kind: EventKind, tool: &str, data: Option<EventData>) {
        if self.tx.send(VersionEvent::new(kind, tool, data)).is_err() {
            debug!("Dropped {} event for {}: no receiver", kind.as_str(), tool);
        }
    }
}

/// Which events a subscriber receives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Kind(EventKind),
}

impl EventFilter {
    pub fn matches(self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kind(wanted) => wanted == kind,
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

/// Fan-out to subscribers; closed subscribers are pruned on publish
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(EventFilter, UnboundedSender<VersionEvent>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(EventFilter, UnboundedSender<VersionEvent>)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, filter: impl Into<EventFilter>) -> UnboundedReceiver<VersionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((filter.into(), tx));
        rx
    }

    pub fn publish(&self, event: &VersionEvent) {
        self.lock().retain(|(filter, tx)| {
            if !filter.matches(event.kind) {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
