//! Update state machine and progress reporting

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `idle → checking → downloading → installing → completed`, with `failed`
/// reachable from any non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    Idle,
    Checking,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl UpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One transition, as delivered to progress callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgress {
    pub tool: String,
    pub state: UpdateState,
    /// Percentage, never decreasing within one update
    pub progress: u8,
    pub message: String,
}

pub type ProgressCallback = Arc<dyn Fn(&UpdateProgress) + Send + Sync>;

/// Registry entry for an update, kept after it finishes for inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub tool: String,
    pub target_version: String,
    pub state: UpdateState,
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
}

impl UpdateStatus {
    pub(crate) fn new(tool: &str, target_version: &str) -> Self {
        Self {
            tool: tool.to_string(),
            target_version: target_version.to_string(),
            state: UpdateState::Idle,
            progress: 0,
            message: format!("Preparing update of {tool} to {target_version}"),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            rollback_error: None,
        }
    }

    pub fn to_progress(&self) -> UpdateProgress {
        UpdateProgress {
            tool: self.tool.clone(),
            state: self.state,
            progress: self.progress,
            message: self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let terminal: Vec<_> = [
            UpdateState::Idle,
            UpdateState::Checking,
            UpdateState::Downloading,
            UpdateState::Installing,
            UpdateState::Completed,
            UpdateState::Failed,
        ]
        .into_iter()
        .filter(|state| state.is_terminal())
        .collect();

        assert_eq!(terminal, vec![UpdateState::Completed, UpdateState::Failed]);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(UpdateState::Downloading).unwrap(),
            serde_json::json!("downloading")
        );
    }
}
