//! # Event Types
//!
//! Versioned, structured lifecycle events. Each event is a [`FleetEvent`]
//! envelope around one [`EventPayload`]; on the wire it reads
//!
//! ```json
//! {"schemaVersion": 1, "sequence": 7, "timestamp": "...",
//!  "eventType": "instance_changed_event", "info": {"condition": "Running", ...}}
//! ```
//!
//! Consumers match on `eventType` and the typed `info` payload; string
//! rendering for external clients is a presentation concern outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::deployment::{DeploymentAction, DeploymentPlan, DeploymentStep};
use crate::models::ids::{AgentId, AppId, InstanceId, TaskId};
use crate::state_machine::{Condition, TaskStatus};

/// Current envelope schema version.
pub const SCHEMA_VERSION: u32 = 1;

pub mod constants {
    pub const STATUS_UPDATE: &str = "status_update_event";
    pub const INSTANCE_CHANGED: &str = "instance_changed_event";
    pub const HEALTH_STATUS_CHANGED: &str = "health_status_changed_event";
    pub const DEPLOYMENT_INFO: &str = "deployment_info";
    pub const DEPLOYMENT_STEP_SUCCESS: &str = "deployment_step_success";
    pub const DEPLOYMENT_SUCCESS: &str = "deployment_success";
    pub const DEPLOYMENT_FAILED: &str = "deployment_failed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub app_id: AppId,
    pub instance_id: InstanceId,
    pub task_id: TaskId,
    pub task_status: TaskStatus,
    pub agent_id: AgentId,
    pub host: String,
    pub version: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceChanged {
    pub app_id: AppId,
    pub instance_id: InstanceId,
    pub condition: Condition,
    /// Absent for the initial `Staged` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_condition: Option<Condition>,
    pub host: String,
    pub run_spec_version: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatusChanged {
    pub app_id: AppId,
    pub instance_id: InstanceId,
    pub version: DateTime<Utc>,
    pub alive: bool,
}

/// Plan as seen by event consumers: id, target version, and the
/// `action`/`app` pairs of every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: Uuid,
    pub app_id: AppId,
    pub version: DateTime<Utc>,
    pub steps: Vec<DeploymentStep>,
}

impl From<&DeploymentPlan> for PlanSummary {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            id: plan.id,
            app_id: plan.app_id.clone(),
            version: plan.target.version,
            steps: plan.steps.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStepInfo {
    pub plan: PlanSummary,
    pub step_index: usize,
    pub current_step: DeploymentStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSuccess {
    pub id: Uuid,
    pub plan: PlanSummary,
    /// Flat list of executed actions.
    pub actions: Vec<DeploymentAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFailed {
    pub id: Uuid,
    pub plan: PlanSummary,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "info")]
pub enum EventPayload {
    #[serde(rename = "status_update_event")]
    StatusUpdate(StatusUpdate),
    #[serde(rename = "instance_changed_event")]
    InstanceChanged(InstanceChanged),
    #[serde(rename = "health_status_changed_event")]
    HealthStatusChanged(HealthStatusChanged),
    #[serde(rename = "deployment_info")]
    DeploymentInfo(DeploymentStepInfo),
    #[serde(rename = "deployment_step_success")]
    DeploymentStepSuccess(DeploymentStepInfo),
    #[serde(rename = "deployment_success")]
    DeploymentSuccess(DeploymentSuccess),
    #[serde(rename = "deployment_failed")]
    DeploymentFailed(DeploymentFailed),
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusUpdate(_) => constants::STATUS_UPDATE,
            Self::InstanceChanged(_) => constants::INSTANCE_CHANGED,
            Self::HealthStatusChanged(_) => constants::HEALTH_STATUS_CHANGED,
            Self::DeploymentInfo(_) => constants::DEPLOYMENT_INFO,
            Self::DeploymentStepSuccess(_) => constants::DEPLOYMENT_STEP_SUCCESS,
            Self::DeploymentSuccess(_) => constants::DEPLOYMENT_SUCCESS,
            Self::DeploymentFailed(_) => constants::DEPLOYMENT_FAILED,
        }
    }

    /// Deployment id for deployment events.
    pub fn deployment_id(&self) -> Option<Uuid> {
        match self {
            Self::DeploymentInfo(info) | Self::DeploymentStepSuccess(info) => Some(info.plan.id),
            Self::DeploymentSuccess(success) => Some(success.id),
            Self::DeploymentFailed(failed) => Some(failed.id),
            _ => None,
        }
    }

    /// Instance the event is about, for instance-level events.
    pub fn instance_id(&self) -> Option<&InstanceId> {
        match self {
            Self::StatusUpdate(update) => Some(&update.instance_id),
            Self::InstanceChanged(changed) => Some(&changed.instance_id),
            Self::HealthStatusChanged(health) => Some(&health.instance_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetEvent {
    pub schema_version: u32,
    /// Monotonically increasing per publisher.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl FleetEvent {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
