//! Layered configuration as a process sees it: file, environment, and the
//! defaults new Apps inherit.

use ::config::Map;
use anyhow::Result;
use fleet_core::clock::{Clock, ManualClock};
use fleet_core::config::{ConfigManager, ConfigurationError, FleetConfig};
use fleet_core::error::FleetError;
use fleet_core::models::{AppId, UnreachableStrategy};
use fleet_core::orchestration::{FleetContext, FleetOrchestrator};
use fleet_core::state_machine::Condition;
use fleet_core::test_helpers::{agents, SimulatedCluster, TestFleet};
use std::io::Write;
use std::sync::Arc;

fn toml_file(contents: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn test_full_file_loads_every_section() -> Result<()> {
    let file = toml_file(
        r#"
        [reconciliation]
        enabled = false
        interval_ms = 200
        kill_retry_seconds = 10
        launch_timeout_seconds = 90

        [unreachable]
        inactive_after_seconds = 30
        expunge_after_seconds = 90

        [deployment]
        step_timeout_seconds = 120
        minimum_health_capacity = 0.5
        maximum_over_capacity = 0.25

        [events]
        buffer_size = 64

        [leadership]
        node_id = "fleet-east-1"
        campaign_backoff_ms = 100

        [health]
        default_grace_period_seconds = 60
        default_interval_seconds = 10
        default_max_consecutive_failures = 5
        "#,
    )?;

    let manager = ConfigManager::load_with_env(Some(file.path()), Some(Map::new()))?;
    let config = manager.config();
    assert_eq!(manager.source(), Some(file.path()));
    assert!(!config.reconciliation.enabled);
    assert_eq!(config.kill_retry(), chrono::Duration::seconds(10));
    assert_eq!(config.launch_timeout(), chrono::Duration::seconds(90));
    assert_eq!(config.step_timeout(), chrono::Duration::seconds(120));
    assert_eq!(config.events.buffer_size, 64);
    assert_eq!(config.leadership.node_id, "fleet-east-1");
    assert_eq!(
        config.default_unreachable_strategy(),
        UnreachableStrategy::Enabled {
            inactive_after_seconds: 30,
            expunge_after_seconds: 90,
        }
    );

    let check = config.http_health_check("/ping");
    assert_eq!(check.grace_period_seconds, 60);
    assert_eq!(check.interval_seconds, 10);
    assert_eq!(check.max_consecutive_failures, 5);
    Ok(())
}

#[test]
fn test_environment_wins_over_file() -> Result<()> {
    let file = toml_file("[leadership]\nnode_id = \"from-file\"\n")?;
    let mut env = Map::new();
    env.insert(
        "FLEET__LEADERSHIP__NODE_ID".to_string(),
        "from-env".to_string(),
    );
    env.insert(
        "FLEET__RECONCILIATION__INTERVAL_MS".to_string(),
        "50".to_string(),
    );

    let manager = ConfigManager::load_with_env(Some(file.path()), Some(env))?;
    assert_eq!(manager.config().leadership.node_id, "from-env");
    assert_eq!(manager.config().reconciliation.interval_ms, 50);
    Ok(())
}

#[test]
fn test_malformed_file_is_a_load_error() -> Result<()> {
    let file = toml_file("[reconciliation]\ninterval_ms = \"soon\"\n")?;
    let err = ConfigManager::load_with_env(Some(file.path()), Some(Map::new()))
        .expect_err("a string is not an interval");
    assert!(matches!(err, ConfigurationError::LoadError { .. }));
    Ok(())
}

#[test]
fn test_zero_values_are_rejected_not_clamped() {
    let mut config = FleetConfig::default();
    config.events.buffer_size = 0;
    let err = ConfigManager::from_config(config).expect_err("zero buffer accepted");
    assert!(err.to_string().contains("events.buffer_size"));

    let mut config = FleetConfig::default();
    config.leadership.node_id = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_orchestrator_refuses_invalid_config() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
    let cluster = Arc::new(SimulatedCluster::new(clock.clone()));
    let mut config = FleetConfig::default();
    config.reconciliation.interval_ms = 0;
    let context = FleetContext::in_memory(&FleetConfig::default(), cluster, clock);

    let err = FleetOrchestrator::new(config, context).expect_err("invalid config accepted");
    assert!(matches!(err, FleetError::Configuration(_)));
}

#[tokio::test]
async fn test_app_template_carries_configured_unreachable_timing() -> Result<()> {
    let mut config = FleetConfig::default();
    config.reconciliation.enabled = false;
    config.unreachable.inactive_after_seconds = 30;
    config.unreachable.expunge_after_seconds = 90;
    let fleet = TestFleet::with(agents(2), config.clone()).await?;

    let web = config
        .app_template(AppId::parse("/web")?, 2)
        .with_cmd("sleep 1000");
    let app_id = web.id.clone();
    fleet.orchestrator.create_app(&fleet.term, web).await?;
    fleet.deliver().await?;

    let original = fleet.instances(&app_id).await?.remove(0);
    fleet.cluster.partition(&original.agent.id);
    fleet.deliver().await?;

    fleet.advance_secs(30);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 1);
    assert_eq!(
        fleet.orchestrator.instance(&original.id).await?.condition,
        Condition::UnreachableInactive
    );
    Ok(())
}
