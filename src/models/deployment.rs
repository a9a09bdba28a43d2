//! # Deployment plans
//!
//! A [`DeploymentPlan`] moves one App from its original version to a target
//! version through an ordered list of steps. Progress (`current_step`,
//! `step_started_at`) is persisted so a new leader resumes the plan where the
//! previous one stopped instead of replaying it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::app::AppDefinition;
use crate::models::ids::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentActionKind {
    StartApplication,
    ScaleApplication,
    RestartApplication,
    StopApplication,
}

impl fmt::Display for DeploymentActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartApplication => "StartApplication",
            Self::ScaleApplication => "ScaleApplication",
            Self::RestartApplication => "RestartApplication",
            Self::StopApplication => "StopApplication",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAction {
    pub action: DeploymentActionKind,
    pub app: AppId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub actions: Vec<DeploymentAction>,
}

impl DeploymentStep {
    pub fn single(action: DeploymentActionKind, app: &AppId) -> Self {
        Self {
            actions: vec![DeploymentAction {
                action,
                app: app.clone(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    /// In-progress and failed plans still hold the app.
    pub fn holds_app(&self) -> bool {
        matches!(self, Self::InProgress | Self::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub id: Uuid,
    pub app_id: AppId,
    pub original: Option<AppDefinition>,
    /// Desired end state. For a stop plan this is the last version scaled to zero.
    pub target: AppDefinition,
    pub steps: Vec<DeploymentStep>,
    pub current_step: usize,
    pub step_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: DeploymentStatus,
    pub failure_reason: Option<String>,
}

impl DeploymentPlan {
    pub fn current(&self) -> Option<&DeploymentStep> {
        self.steps.get(self.current_step)
    }

    pub fn is_finished(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    pub fn is_stop(&self) -> bool {
        self.steps.iter().any(|step| {
            step.actions
                .iter()
                .any(|a| a.action == DeploymentActionKind::StopApplication)
        })
    }

    /// `(action, app)` pairs across all steps, in execution order.
    pub fn actions(&self) -> Vec<DeploymentAction> {
        self.steps
            .iter()
            .flat_map(|step| step.actions.iter().cloned())
            .collect()
    }
}

/// Reference returned to API callers that triggered a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRef {
    pub deployment_id: Uuid,
    pub version: DateTime<Utc>,
}
