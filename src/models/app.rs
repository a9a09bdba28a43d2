//! # App definitions
//!
//! An [`AppDefinition`] is one immutable version of an application's desired
//! state. Each create/update stores a new version stamped with the clock time;
//! `version_info` tracks whether the last change was a configuration change
//! (instances must be restarted) or only a scaling change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FleetError, FleetResult};
use crate::models::ids::AppId;

/// Capacity bounds a deployment must respect while replacing or scaling instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStrategy {
    /// Fraction of the desired count that must stay ready throughout a deployment.
    pub minimum_health_capacity: f64,
    /// Fraction of the desired count that may run in addition during a deployment.
    pub maximum_over_capacity: f64,
}

impl UpgradeStrategy {
    pub fn new(minimum_health_capacity: f64, maximum_over_capacity: f64) -> Self {
        Self {
            minimum_health_capacity,
            maximum_over_capacity,
        }
    }

    pub fn validate(&self) -> FleetResult<()> {
        if !(0.0..=1.0).contains(&self.minimum_health_capacity) {
            return Err(FleetError::Configuration(format!(
                "minimumHealthCapacity must be within [0, 1], got {}",
                self.minimum_health_capacity
            )));
        }
        if !self.maximum_over_capacity.is_finite() || self.maximum_over_capacity < 0.0 {
            return Err(FleetError::Configuration(format!(
                "maximumOverCapacity must be >= 0, got {}",
                self.maximum_over_capacity
            )));
        }
        Ok(())
    }
}

impl Default for UpgradeStrategy {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Policy for instances whose agent stopped reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnreachableStrategy {
    /// Unreachable instances are kept as they are until they come back or are killed.
    Disabled,
    #[serde(rename_all = "camelCase")]
    Enabled {
        inactive_after_seconds: u64,
        expunge_after_seconds: u64,
    },
}

impl UnreachableStrategy {
    /// Build an enabled strategy, rejecting `expunge_after < inactive_after`.
    pub fn new(inactive_after_seconds: u64, expunge_after_seconds: u64) -> FleetResult<Self> {
        let strategy = Self::Enabled {
            inactive_after_seconds,
            expunge_after_seconds,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if let Self::Enabled {
            inactive_after_seconds,
            expunge_after_seconds,
        } = self
        {
            if expunge_after_seconds < inactive_after_seconds {
                return Err(FleetError::Configuration(format!(
                    "unreachableStrategy.expungeAfterSeconds ({expunge_after_seconds}) must be >= \
                     inactiveAfterSeconds ({inactive_after_seconds})"
                )));
            }
        }
        Ok(())
    }

    pub fn inactive_after(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Enabled {
                inactive_after_seconds,
                ..
            } => Some(seconds(*inactive_after_seconds)),
        }
    }

    pub fn expunge_after(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Enabled {
                expunge_after_seconds,
                ..
            } => Some(seconds(*expunge_after_seconds)),
        }
    }
}

fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintOperator {
    /// Every instance must have a distinct value for the field.
    Unique,
    /// Every instance must run where the field equals the value.
    Cluster,
    /// At most `value` instances per distinct field value.
    MaxPer,
}

/// Placement constraint over an agent field (`hostname` or an agent attribute).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub field: String,
    pub operator: ConstraintOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Constraint {
    pub fn unique_hostname() -> Self {
        Self {
            field: "hostname".to_string(),
            operator: ConstraintOperator::Unique,
            value: None,
        }
    }

    pub fn cluster(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: ConstraintOperator::Cluster,
            value: Some(value.into()),
        }
    }

    pub fn max_per(field: impl Into<String>, limit: u32) -> Self {
        Self {
            field: field.into(),
            operator: ConstraintOperator::MaxPer,
            value: Some(limit.to_string()),
        }
    }

    /// Parsed limit for `MAX_PER` constraints.
    pub fn max_per_limit(&self) -> Option<usize> {
        match self.operator {
            ConstraintOperator::MaxPer => self.value.as_deref().and_then(|v| v.parse().ok()),
            _ => None,
        }
    }

    fn validate(&self) -> FleetResult<()> {
        if self.field.trim().is_empty() {
            return Err(FleetError::Validation(
                "constraint field must not be empty".to_string(),
            ));
        }
        match self.operator {
            ConstraintOperator::Unique => Ok(()),
            ConstraintOperator::Cluster if self.value.is_some() => Ok(()),
            ConstraintOperator::Cluster => Err(FleetError::Validation(format!(
                "CLUSTER constraint on '{}' requires a value",
                self.field
            ))),
            ConstraintOperator::MaxPer => match self.max_per_limit() {
                Some(limit) if limit > 0 => Ok(()),
                _ => Err(FleetError::Validation(format!(
                    "MAX_PER constraint on '{}' requires a positive integer value",
                    self.field
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCheckProtocol {
    Http {
        path: String,
        #[serde(rename = "portIndex")]
        port_index: usize,
    },
    Tcp {
        #[serde(rename = "portIndex")]
        port_index: usize,
    },
    Command {
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(flatten)]
    pub protocol: HealthCheckProtocol,
    /// Failures are ignored this long after the task started, until it is first healthy.
    pub grace_period_seconds: u64,
    pub interval_seconds: u64,
    /// Consecutive failures that get the instance killed; 0 never kills.
    pub max_consecutive_failures: u32,
}

impl HealthCheck {
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            protocol: HealthCheckProtocol::Http {
                path: path.into(),
                port_index: 0,
            },
            grace_period_seconds: 300,
            interval_seconds: 60,
            max_consecutive_failures: 3,
        }
    }

    pub fn command(value: impl Into<String>) -> Self {
        Self {
            protocol: HealthCheckProtocol::Command {
                value: value.into(),
            },
            grace_period_seconds: 300,
            interval_seconds: 60,
            max_consecutive_failures: 3,
        }
    }

    pub fn grace_period(&self) -> Duration {
        seconds(self.grace_period_seconds)
    }

    fn validate(&self) -> FleetResult<()> {
        if self.interval_seconds == 0 {
            return Err(FleetError::Validation(
                "health check intervalSeconds must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDefinition {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub last_scaling_at: DateTime<Utc>,
    pub last_config_change_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition {
    pub id: AppId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    pub instances: u32,
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub port_definitions: Vec<PortDefinition>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    #[serde(default)]
    pub upgrade_strategy: UpgradeStrategy,
    pub unreachable_strategy: UnreachableStrategy,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Stamped when the version is stored.
    pub version: DateTime<Utc>,
    pub version_info: VersionInfo,
}

impl AppDefinition {
    /// New definition with default resources and a default unreachable strategy
    /// of 5 minutes inactive / 10 minutes expunge.
    pub fn new(id: AppId, instances: u32) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id,
            cmd: None,
            instances,
            cpus: 0.1,
            mem: 32.0,
            port_definitions: Vec::new(),
            health_checks: Vec::new(),
            upgrade_strategy: UpgradeStrategy::default(),
            unreachable_strategy: UnreachableStrategy::Enabled {
                inactive_after_seconds: 300,
                expunge_after_seconds: 600,
            },
            constraints: Vec::new(),
            labels: BTreeMap::new(),
            version: epoch,
            version_info: VersionInfo {
                last_scaling_at: epoch,
                last_config_change_at: epoch,
            },
        }
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_checks.push(check);
        self
    }

    pub fn with_upgrade_strategy(mut self, strategy: UpgradeStrategy) -> Self {
        self.upgrade_strategy = strategy;
        self
    }

    pub fn with_unreachable_strategy(mut self, strategy: UnreachableStrategy) -> Self {
        self.unreachable_strategy = strategy;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port_definitions.push(PortDefinition { port, name: None });
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn has_health_checks(&self) -> bool {
        !self.health_checks.is_empty()
    }

    /// Boundary validation for create/update. Nothing is stored when this fails.
    pub fn validate(&self) -> FleetResult<()> {
        if !(self.cpus.is_finite() && self.cpus > 0.0) {
            return Err(FleetError::Validation(format!(
                "cpus must be > 0 for {}",
                self.id
            )));
        }
        if !(self.mem.is_finite() && self.mem >= 0.0) {
            return Err(FleetError::Validation(format!(
                "mem must be >= 0 for {}",
                self.id
            )));
        }
        self.upgrade_strategy.validate()?;
        self.unreachable_strategy.validate()?;
        for check in &self.health_checks {
            check.validate()?;
        }
        for constraint in &self.constraints {
            constraint.validate()?;
        }
        Ok(())
    }

    /// True when running instances of `self` cannot serve as instances of `target`.
    ///
    /// Instance count and the upgrade/unreachable strategies do not affect a
    /// running task, so changing only those is not a restart.
    pub fn requires_restart_for(&self, target: &AppDefinition) -> bool {
        self.cmd != target.cmd
            || self.cpus != target.cpus
            || self.mem != target.mem
            || self.port_definitions != target.port_definitions
            || self.health_checks != target.health_checks
            || self.constraints != target.constraints
            || self.labels != target.labels
    }

    /// Stamp this definition as a new version following `previous`.
    pub fn stamped(mut self, previous: Option<&AppDefinition>, at: DateTime<Utc>) -> Self {
        self.version = at;
        self.version_info = match previous {
            None => VersionInfo {
                last_scaling_at: at,
                last_config_change_at: at,
            },
            Some(prev) if prev.requires_restart_for(&self) => VersionInfo {
                last_scaling_at: at,
                last_config_change_at: at,
            },
            Some(prev) => VersionInfo {
                last_scaling_at: if prev.instances != self.instances {
                    at
                } else {
                    prev.version_info.last_scaling_at
                },
                last_config_change_at: prev.version_info.last_config_change_at,
            },
        };
        self
    }

    /// Instances that must be ready at all times during a deployment to `self`.
    pub fn minimum_healthy(&self) -> usize {
        let instances = u64::from(self.instances);
        let scaled = instances * parts_per_million(self.upgrade_strategy.minimum_health_capacity);
        scaled.div_ceil(PARTS_PER_MILLION) as usize
    }

    /// Total instances allowed to exist at once during a deployment to `self`.
    pub fn maximum_capacity(&self) -> usize {
        let instances = u64::from(self.instances);
        let over = instances * parts_per_million(self.upgrade_strategy.maximum_over_capacity);
        (instances + over / PARTS_PER_MILLION) as usize
    }
}

const PARTS_PER_MILLION: u64 = 1_000_000;

/// Capacity fractions are applied in integer millionths so products such as
/// `100 * 0.07` round the way they read.
fn parts_per_million(fraction: f64) -> u64 {
    (fraction * PARTS_PER_MILLION as f64).round() as u64
}
