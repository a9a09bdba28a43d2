//! # Instances
//!
//! An [`Instance`] is one desired running copy of an App. It belongs to the App
//! version it was launched for, lives on one agent, and is backed by one task
//! at a time (`task_id` + `incarnation`). Its [`Condition`] only changes through
//! [`crate::state_machine::InstanceStateMachine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::app::AppDefinition;
use crate::models::ids::{AgentId, AppId, InstanceId, TaskId};
use crate::state_machine::{Condition, TaskStatus};

/// Agent (cluster node) a task runs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(id),
            hostname: hostname.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Value of a constraint field on this agent.
    pub fn field_value(&self, field: &str) -> Option<&str> {
        match field {
            "hostname" => Some(self.hostname.as_str()),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Last task status applied to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStamp {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub app_id: AppId,
    /// App version the instance was launched for.
    pub run_spec_version: DateTime<Utc>,
    /// Last config change of that version; instances with a different value
    /// must be replaced by a restart.
    pub config_version: DateTime<Utc>,
    pub agent: AgentInfo,
    pub task_id: TaskId,
    pub incarnation: u32,
    pub condition: Condition,
    pub condition_since: DateTime<Utc>,
    pub last_status: Option<StatusStamp>,
    pub unreachable_since: Option<DateTime<Utc>>,
    /// Bumped whenever pending unreachable timers become stale.
    pub timer_generation: u64,
    pub health: HealthState,
    pub consecutive_health_failures: u32,
    pub staged_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Unreachable original this instance was launched to stand in for.
    pub replaces: Option<InstanceId>,
}

impl Instance {
    pub fn staged(
        id: InstanceId,
        app: &AppDefinition,
        agent: AgentInfo,
        at: DateTime<Utc>,
        replaces: Option<InstanceId>,
    ) -> Self {
        let task_id = TaskId::for_instance(&id, 1);
        Self {
            id,
            app_id: app.id.clone(),
            run_spec_version: app.version,
            config_version: app.version_info.last_config_change_at,
            agent,
            task_id,
            incarnation: 1,
            condition: Condition::Staged,
            condition_since: at,
            last_status: None,
            unreachable_since: None,
            timer_generation: 0,
            health: HealthState::Unknown,
            consecutive_health_failures: 0,
            staged_at: at,
            started_at: None,
            replaces,
        }
    }

    /// Running, and healthy when the app defines health checks.
    pub fn is_ready(&self, has_health_checks: bool) -> bool {
        self.condition == Condition::Running
            && (!has_health_checks || self.health == HealthState::Healthy)
    }

    pub fn matches_config(&self, app: &AppDefinition) -> bool {
        self.config_version == app.version_info.last_config_change_at
    }
}
