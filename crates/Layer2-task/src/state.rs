//! Target state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Possible states of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Nothing running
    #[default]
    Idle,

    /// An execution is in flight
    Running,

    /// Last execution failed
    Error,

    /// Todo execution was stopped by the user
    Paused,
}

impl TargetState {
    /// Check if an execution is in flight
    pub fn is_running(&self) -> bool {
        matches!(self, TargetState::Running)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TargetState::Idle => "Idle",
            TargetState::Running => "Running",
            TargetState::Error => "Error",
            TargetState::Paused => "Paused",
        }
    }

    /// Get a symbol for the state (for TUI)
    pub fn symbol(&self) -> &'static str {
        match self {
            TargetState::Idle => "◯",
            TargetState::Running => "⟳",
            TargetState::Error => "✗",
            TargetState::Paused => "⏸",
        }
    }
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// In-memory status of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub target_id: String,
    pub state: TargetState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
}

impl TargetStatus {
    pub fn idle(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            state: TargetState::Idle,
            start_time: None,
            error: None,
            log_file: None,
            last_completed: None,
            history_id: None,
        }
    }

    /// Mark as running for a new execution
    pub fn begin(&mut self, history_id: impl Into<String>, log_file: PathBuf, start: DateTime<Utc>) {
        self.state = TargetState::Running;
        self.start_time = Some(start);
        self.error = None;
        self.log_file = Some(log_file);
        self.history_id = Some(history_id.into());
    }

    /// Mark the current execution as finished in `state`
    pub fn finish(&mut self, state: TargetState, error: Option<String>) {
        self.state = state;
        self.error = error;
        self.last_completed = Some(Utc::now());
    }

    /// Whether this status belongs to the given execution
    pub fn is_run(&self, history_id: &str) -> bool {
        self.history_id.as_deref() == Some(history_id)
    }
}
