//! Reconciliation cycles: drift correction, stragglers and the background loop.

use anyhow::Result;
use fleet_core::cluster::ClusterDriver;
use fleet_core::state_machine::Condition;
use fleet_core::storage::Repository;
use fleet_core::test_helpers::{agents, app, test_config, TestFleet};
use std::time::Duration;

#[tokio::test]
async fn test_quiet_cycle_reports_nothing() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let report = fleet.reconcile().await?;
    assert_eq!(report.apps_checked, 1);
    assert!(report.is_quiet());
    Ok(())
}

#[tokio::test]
async fn test_launch_timeout_kills_silent_instances() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Staged).await?.len(), 2);

    fleet.advance_secs(299);
    let report = fleet.reconcile().await?;
    assert_eq!(report.instances_killed, 0);

    fleet.advance_secs(1);
    let report = fleet.reconcile().await?;
    assert_eq!(report.instances_killed, 2);
    assert_eq!(fleet.cluster.launches().len(), 4);
    assert_eq!(fleet.in_condition(&app_id, Condition::Staged).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unconfirmed_kill_is_resent() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.deliver().await?;
    let instance = fleet.instances(&app_id).await?.remove(0);

    fleet
        .orchestrator
        .kill_instance(&fleet.term, &instance.id, false)
        .await?;
    // The Killed report goes missing.
    fleet.cluster.drain_reports();
    assert_eq!(fleet.cluster.kills().len(), 1);

    fleet.advance_secs(30);
    fleet.orchestrator.reconcile(&fleet.term).await?;
    assert_eq!(fleet.cluster.kills().len(), 2);

    fleet.deliver().await?;
    assert!(fleet.orchestrator.instance(&instance.id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_instances_of_deleted_app_are_killed() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.deliver().await?;

    // Remove the App behind the orchestrator's back.
    fleet.context.repository.delete_app(&app_id).await?;

    let report = fleet.reconcile().await?;
    assert_eq!(report.apps_checked, 0);
    assert_eq!(report.orphans_killed, 1);
    assert!(fleet.instances(&app_id).await?.is_empty());
    assert_eq!(fleet.cluster.task_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_agent_outage_defers_launches() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    for agent in fleet.cluster.agents().await? {
        fleet.cluster.partition(&agent.id);
    }
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    assert!(fleet.instances(&app_id).await?.is_empty());

    for agent in agents(2) {
        fleet.cluster.heal(&agent.id);
    }
    fleet.reconcile().await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_background_loop_converges_without_manual_cycles() -> Result<()> {
    let mut config = test_config("node-a");
    config.reconciliation.enabled = true;
    config.reconciliation.interval_ms = 10;
    let fleet = TestFleet::with(agents(2), config).await?;
    let app_id = app("/web", 1).id;
    fleet.cluster.set_reject_launches(true);
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.cluster.set_reject_launches(false);

    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !fleet.orchestrator.instances(&app_id).await?.is_empty() {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "loop never launched the instance");

    fleet.orchestrator.relinquish().await;
    assert!(fleet.orchestrator.active_term().is_none());
    Ok(())
}
