//! Identifier types and id generation.
//!
//! App ids are path-like (`/group/web`). Instance ids embed the app's safe name
//! so they are readable in logs (`group_web.instance-<suffix>`), and task ids
//! embed the instance id plus an incarnation counter, so one instance can be
//! backed by a sequence of tasks over its life.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};

/// Path-like application identifier, always absolute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

impl AppId {
    /// Parse and normalize an app id. A missing leading slash is added;
    /// each segment must be lowercase alphanumerics, `-` or `.`.
    pub fn parse(raw: &str) -> FleetResult<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let path = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if path.is_empty() {
            return Err(FleetError::Validation(format!(
                "App id '{raw}' must contain at least one path segment"
            )));
        }
        for segment in path.split('/') {
            let valid = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
                && !segment.starts_with('-')
                && !segment.ends_with('-');
            if !valid {
                return Err(FleetError::Validation(format!(
                    "Invalid path segment '{segment}' in app id '{raw}'"
                )));
            }
        }
        Ok(Self(format!("/{path}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id without the leading slash and with `/` replaced by `_`.
    pub fn safe_name(&self) -> String {
        self.0.trim_start_matches('/').replace('/', "_")
    }
}

impl TryFrom<String> for AppId {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppId> for String {
    fn from(id: AppId) -> Self {
        id.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(app_id: &AppId, suffix: &str) -> Self {
        Self(format!("{}.instance-{}", app_id.safe_name(), suffix))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn for_instance(instance_id: &InstanceId, incarnation: u32) -> Self {
        Self(format!("{instance_id}._app.{incarnation}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh instance suffixes and deployment ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn instance_suffix(&self) -> String;
    fn deployment_id(&self) -> Uuid;
}

#[derive(Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn instance_suffix(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn deployment_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Counter-based ids for reproducible runs.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn instance_suffix(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{n:08}")
    }

    fn deployment_id(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u128(u128::from(n))
    }
}
