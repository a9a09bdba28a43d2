use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status as reported by the cluster resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_UNREACHABLE")]
    Unreachable,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
    #[serde(rename = "TASK_FAILED")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "TASK_STAGING",
            Self::Starting => "TASK_STARTING",
            Self::Running => "TASK_RUNNING",
            Self::Unreachable => "TASK_UNREACHABLE",
            Self::Killed => "TASK_KILLED",
            Self::Lost => "TASK_LOST",
            Self::Failed => "TASK_FAILED",
        }
    }

    /// Check if the task is gone for good on the agent side
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Killed | Self::Lost | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that can move an instance through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InstanceEvent {
    /// Status report for the instance's current task
    Report(TaskStatus),
    /// Orchestrator decided to kill the instance
    Kill,
    /// `inactiveAfter` elapsed while unreachable
    MarkInactive,
    /// Remove the instance permanently without waiting for the agent
    Expunge,
}

impl InstanceEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Report(_) => "report",
            Self::Kill => "kill",
            Self::MarkInactive => "mark_inactive",
            Self::Expunge => "expunge",
        }
    }
}
