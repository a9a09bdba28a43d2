//! # Fleet Configuration
//!
//! Process-level settings for the orchestrator core. App-level policy (upgrade
//! and unreachable strategies) lives on each App version; the values here are
//! the defaults new App templates start from.
//!
//! ## Architecture
//!
//! - **Layered**: built-in defaults, then an optional TOML file, then
//!   `FLEET__SECTION__KEY` environment overrides (see [`ConfigManager`]).
//! - **Explicit Validation**: nonsensical values are rejected, never clamped.
//!
//! ## Example
//!
//! ```toml
//! [reconciliation]
//! interval_ms = 1000
//!
//! [unreachable]
//! inactive_after_seconds = 300
//! expunge_after_seconds = 600
//!
//! [leadership]
//! node_id = "fleet-1"
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::app::{AppDefinition, HealthCheck, UnreachableStrategy, UpgradeStrategy};
use crate::models::ids::AppId;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub reconciliation: ReconciliationConfig,
    pub unreachable: UnreachableConfig,
    pub deployment: DeploymentConfig,
    pub events: EventsConfig,
    pub leadership: LeadershipConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Run the background loop while leader. Tests drive cycles by hand.
    pub enabled: bool,
    pub interval_ms: u64,
    /// Kills not confirmed after this long are sent again.
    pub kill_retry_seconds: u64,
    /// Staged instances that never report are killed after this long.
    pub launch_timeout_seconds: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            kill_retry_seconds: 30,
            launch_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnreachableConfig {
    pub inactive_after_seconds: u64,
    pub expunge_after_seconds: u64,
}

impl Default for UnreachableConfig {
    fn default() -> Self {
        Self {
            inactive_after_seconds: 300,
            expunge_after_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// A step that makes no progress for this long fails its deployment.
    pub step_timeout_seconds: u64,
    pub minimum_health_capacity: f64,
    pub maximum_over_capacity: f64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            step_timeout_seconds: 600,
            minimum_health_capacity: 1.0,
            maximum_over_capacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadershipConfig {
    pub node_id: String,
    /// Pause between relinquishing the seat and campaigning again.
    pub campaign_backoff_ms: u64,
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            node_id: "fleet-node".to_string(),
            campaign_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub default_grace_period_seconds: u64,
    pub default_interval_seconds: u64,
    pub default_max_consecutive_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_grace_period_seconds: 300,
            default_interval_seconds: 60,
            default_max_consecutive_failures: 3,
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.reconciliation.interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.interval_ms",
                self.reconciliation.interval_ms,
                "must be > 0",
            ));
        }
        if self.unreachable.expunge_after_seconds < self.unreachable.inactive_after_seconds {
            return Err(ConfigurationError::invalid_value(
                "unreachable.expunge_after_seconds",
                self.unreachable.expunge_after_seconds,
                format!(
                    "must be >= unreachable.inactive_after_seconds ({})",
                    self.unreachable.inactive_after_seconds
                ),
            ));
        }
        if self.deployment.step_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "deployment.step_timeout_seconds",
                self.deployment.step_timeout_seconds,
                "must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.deployment.minimum_health_capacity) {
            return Err(ConfigurationError::invalid_value(
                "deployment.minimum_health_capacity",
                self.deployment.minimum_health_capacity,
                "must be within [0, 1]",
            ));
        }
        if !self.deployment.maximum_over_capacity.is_finite()
            || self.deployment.maximum_over_capacity < 0.0
        {
            return Err(ConfigurationError::invalid_value(
                "deployment.maximum_over_capacity",
                self.deployment.maximum_over_capacity,
                "must be >= 0",
            ));
        }
        if self.events.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.buffer_size",
                self.events.buffer_size,
                "must be > 0",
            ));
        }
        if self.leadership.node_id.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "leadership.node_id",
                &self.leadership.node_id,
                "must not be empty",
            ));
        }
        if self.health.default_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.default_interval_seconds",
                self.health.default_interval_seconds,
                "must be > 0",
            ));
        }
        Ok(())
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.reconciliation.interval_ms)
    }

    pub fn kill_retry(&self) -> chrono::Duration {
        chrono_seconds(self.reconciliation.kill_retry_seconds)
    }

    pub fn launch_timeout(&self) -> chrono::Duration {
        chrono_seconds(self.reconciliation.launch_timeout_seconds)
    }

    pub fn campaign_backoff(&self) -> Duration {
        Duration::from_millis(self.leadership.campaign_backoff_ms)
    }

    pub fn step_timeout(&self) -> chrono::Duration {
        chrono_seconds(self.deployment.step_timeout_seconds)
    }

    pub fn default_unreachable_strategy(&self) -> UnreachableStrategy {
        UnreachableStrategy::Enabled {
            inactive_after_seconds: self.unreachable.inactive_after_seconds,
            expunge_after_seconds: self.unreachable.expunge_after_seconds,
        }
    }

    pub fn default_upgrade_strategy(&self) -> UpgradeStrategy {
        UpgradeStrategy::new(
            self.deployment.minimum_health_capacity,
            self.deployment.maximum_over_capacity,
        )
    }

    /// App definition pre-filled with this process's default strategies.
    pub fn app_template(&self, id: AppId, instances: u32) -> AppDefinition {
        AppDefinition::new(id, instances)
            .with_upgrade_strategy(self.default_upgrade_strategy())
            .with_unreachable_strategy(self.default_unreachable_strategy())
    }

    /// HTTP health check with this process's default timings.
    pub fn http_health_check(&self, path: impl Into<String>) -> HealthCheck {
        let mut check = HealthCheck::http(path);
        check.grace_period_seconds = self.health.default_grace_period_seconds;
        check.interval_seconds = self.health.default_interval_seconds;
        check.max_consecutive_failures = self.health.default_max_consecutive_failures;
        check
    }
}

fn chrono_seconds(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
