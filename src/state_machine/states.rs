use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle condition of an instance as tracked by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    /// Orchestrator committed to launching the instance
    Staged,
    /// Task reported starting on its agent
    Starting,
    /// Task reported running
    Running,
    /// Orchestrator asked the agent to kill the task
    Killing,
    /// Instance removed from the active set for good
    Killed,
    /// Agent stopped reporting; instance retained
    Unreachable,
    /// Unreachable past `inactiveAfter`; a replacement may be launched
    UnreachableInactive,
    /// Task reported lost by the resource manager
    Lost,
    /// Task failed before or while running
    Failed,
}

impl Condition {
    /// Check if this is a terminal condition (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Killed | Self::Failed)
    }

    /// Check if the instance is still part of the app's instance set
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable | Self::UnreachableInactive)
    }

    /// Check if the instance occupies one of the app's desired-count slots.
    /// Inactive unreachable instances have handed their slot to a replacement,
    /// and killing instances are on their way out.
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            Self::Staged | Self::Starting | Self::Running | Self::Unreachable
        )
    }

    /// Check if the instance still consumes cluster capacity
    pub fn consumes_capacity(&self) -> bool {
        matches!(
            self,
            Self::Staged | Self::Starting | Self::Running | Self::Killing | Self::Unreachable
        )
    }

    pub fn is_launching(&self) -> bool {
        matches!(self, Self::Staged | Self::Starting)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Staged => "Staged",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Killing => "Killing",
            Self::Killed => "Killed",
            Self::Unreachable => "Unreachable",
            Self::UnreachableInactive => "UnreachableInactive",
            Self::Lost => "Lost",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Staged" => Ok(Self::Staged),
            "Starting" => Ok(Self::Starting),
            "Running" => Ok(Self::Running),
            "Killing" => Ok(Self::Killing),
            "Killed" => Ok(Self::Killed),
            "Unreachable" => Ok(Self::Unreachable),
            "UnreachableInactive" => Ok(Self::UnreachableInactive),
            "Lost" => Ok(Self::Lost),
            "Failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid instance condition: {s}")),
        }
    }
}

/// Default condition for new instances
impl Default for Condition {
    fn default() -> Self {
        Self::Staged
    }
}
