//! # Cluster boundary
//!
//! The orchestrator never talks to agents directly. It asks a
//! [`ClusterDriver`] which agents are currently offered, launches tasks on an
//! agent it picked with [`placement::select_agent`], and kills tasks. Task
//! status flows back asynchronously as [`TaskStatusReport`]s handed to
//! `FleetOrchestrator::handle_task_status`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FleetResult;
use crate::models::app::AppDefinition;
use crate::models::ids::{AgentId, AppId, InstanceId, TaskId};
use crate::models::instance::{AgentInfo, Instance};
use crate::state_machine::TaskStatus;

pub mod placement;

pub use placement::select_agent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub instance_id: InstanceId,
    pub task_id: TaskId,
    pub app_id: AppId,
    pub agent_id: AgentId,
    pub cmd: Option<String>,
    pub cpus: f64,
    pub mem: f64,
    pub run_spec_version: DateTime<Utc>,
}

impl LaunchRequest {
    pub fn for_instance(instance: &Instance, app: &AppDefinition) -> Self {
        Self {
            instance_id: instance.id.clone(),
            task_id: instance.task_id.clone(),
            app_id: instance.app_id.clone(),
            agent_id: instance.agent.id.clone(),
            cmd: app.cmd.clone(),
            cpus: app.cpus,
            mem: app.mem,
            run_spec_version: app.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub instance_id: InstanceId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
}

impl From<&Instance> for TaskRef {
    fn from(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            task_id: instance.task_id.clone(),
            agent_id: instance.agent.id.clone(),
        }
    }
}

/// One task status update from the cluster resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub instance_id: InstanceId,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub agent_id: AgentId,
    pub hostname: String,
    /// When the resource manager observed the status; used for ordering.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskStatusReport {
    pub fn new(instance: &Instance, status: TaskStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance.id.clone(),
            task_id: instance.task_id.clone(),
            status,
            agent_id: instance.agent.id.clone(),
            hostname: instance.agent.hostname.clone(),
            timestamp,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            instance_id: self.instance_id.clone(),
            task_id: self.task_id.clone(),
            agent_id: self.agent_id.clone(),
        }
    }
}

#[async_trait]
pub trait ClusterDriver: Send + Sync + fmt::Debug {
    /// Agents currently offering resources. Partitioned agents are absent.
    async fn agents(&self) -> FleetResult<Vec<AgentInfo>>;

    async fn launch(&self, request: LaunchRequest) -> FleetResult<()>;

    /// Ask the agent to kill a task. Killing an unknown task is not an error.
    async fn kill(&self, task: TaskRef) -> FleetResult<()>;
}
