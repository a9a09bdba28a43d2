//! Deployment plans driven end to end: create, scale, restart, stop, cancel
//! and forced supersession.

use anyhow::Result;
use fleet_core::error::FleetError;
use fleet_core::events::{constants, EventPayload, FleetEvent};
use fleet_core::models::{
    AppDefinition, Constraint, DeploymentStatus, HealthCheck, HealthState, Instance, InstanceId,
    UnreachableStrategy,
};
use fleet_core::state_machine::Condition;
use fleet_core::storage::Repository;
use fleet_core::test_helpers::{app, event_types, TestFleet};

fn count(events: &[FleetEvent], event_type: &str) -> usize {
    event_types(events)
        .into_iter()
        .filter(|t| *t == event_type)
        .count()
}

/// Old instances still running plus new instances that passed a health check.
fn ready(instances: &[Instance], old: &[InstanceId]) -> usize {
    instances
        .iter()
        .filter(|instance| instance.condition == Condition::Running)
        .filter(|instance| {
            old.contains(&instance.id)
                || instance.health == HealthState::Healthy
        })
        .count()
}

#[tokio::test]
async fn test_create_app_reaches_desired_count() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let web = app("/web", 2);
    let app_id = web.id.clone();

    let deployment = fleet.orchestrator.create_app(&fleet.term, web).await?;
    assert_eq!(fleet.cluster.launches().len(), 2);
    assert_eq!(fleet.orchestrator.deployments().await?.len(), 1);

    fleet.deliver().await?;

    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 2);
    // Spread across both agents.
    assert_ne!(running[0].agent.id, running[1].agent.id);
    assert!(fleet.orchestrator.deployments().await?.is_empty());

    let events = fleet.drain_events();
    assert_eq!(event_types(&events).first(), Some(&constants::DEPLOYMENT_INFO));
    assert_eq!(count(&events, constants::DEPLOYMENT_SUCCESS), 1);
    let success = events
        .iter()
        .find_map(|event| match &event.payload {
            EventPayload::DeploymentSuccess(success) => Some(success),
            _ => None,
        })
        .expect("deployment_success published");
    assert_eq!(success.id, deployment.deployment_id);
    assert_eq!(success.actions.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_create_existing_app_conflicts() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;

    let err = fleet
        .orchestrator
        .create_app(&fleet.term, app("/web", 3))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Conflict(_)));
    assert_eq!(fleet.orchestrator.app_versions(&app("/web", 1).id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_app_leaves_no_trace() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let broken = app("/web", 1).with_health_check(HealthCheck {
        interval_seconds: 0,
        ..HealthCheck::http("/health")
    });

    let err = fleet
        .orchestrator
        .create_app(&fleet.term, broken)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
    assert!(fleet.orchestrator.apps().await?.is_empty());
    assert!(fleet.cluster.launches().is_empty());
    assert!(fleet.drain_events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rolling_restart_keeps_minimum_healthy() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;
    fleet.drain_events();

    let old: Vec<InstanceId> = fleet
        .instances(&app_id)
        .await?
        .into_iter()
        .map(|instance| instance.id)
        .collect();

    fleet.advance_secs(60);
    let updated = app("/web", 2).with_health_check(HealthCheck::http("/health"));
    fleet
        .orchestrator
        .update_app(&fleet.term, updated, false)
        .await?;
    fleet.deliver().await?;

    // Both new instances run next to the old ones; nothing is killed until
    // a new instance is healthy.
    let instances = fleet.instances(&app_id).await?;
    assert_eq!(instances.len(), 4);
    assert_eq!(ready(&instances, &old), 2);
    let mut new: Vec<InstanceId> = instances
        .iter()
        .filter(|instance| !old.contains(&instance.id))
        .map(|instance| instance.id.clone())
        .collect();
    new.sort();
    assert_eq!(new.len(), 2);

    for (healthy, id) in new.iter().enumerate() {
        fleet.orchestrator.report_health(&fleet.term, id, true).await?;
        let instances = fleet.instances(&app_id).await?;
        assert!(ready(&instances, &old) >= 2);
        let killing = instances
            .iter()
            .filter(|instance| instance.condition == Condition::Killing)
            .count();
        assert_eq!(killing, 1, "one old instance per healthy new one");

        fleet.deliver().await?;
        let remaining_old = fleet
            .instances(&app_id)
            .await?
            .iter()
            .filter(|instance| old.contains(&instance.id))
            .count();
        assert_eq!(remaining_old, old.len() - healthy - 1);
    }

    let mut remaining: Vec<InstanceId> = fleet
        .instances(&app_id)
        .await?
        .into_iter()
        .map(|instance| instance.id)
        .collect();
    remaining.sort();
    assert_eq!(remaining, new);
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    assert_eq!(count(&fleet.drain_events(), constants::DEPLOYMENT_SUCCESS), 1);
    Ok(())
}

#[tokio::test]
async fn test_scale_down_kills_unreachable_first() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let victim = fleet.instances(&app_id).await?.remove(0);
    fleet.advance_secs(10);
    fleet.cluster.partition(&victim.agent.id);
    fleet.deliver().await?;
    assert_eq!(
        fleet.orchestrator.instance(&victim.id).await?.condition,
        Condition::Unreachable
    );
    fleet.drain_events();

    fleet.advance_secs(10);
    fleet
        .orchestrator
        .update_app(&fleet.term, app("/web", 1), false)
        .await?;

    let remaining = fleet.instances(&app_id).await?;
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id, victim.id);
    assert_eq!(remaining[0].condition, Condition::Running);
    assert!(fleet.orchestrator.deployments().await?.is_empty());

    let events = fleet.drain_events();
    let victim_killed = events.iter().any(|event| match &event.payload {
        EventPayload::InstanceChanged(changed) => {
            changed.instance_id == victim.id
                && changed.condition == Condition::Killed
                && changed.previous_condition == Some(Condition::Unreachable)
        }
        _ => false,
    });
    assert!(victim_killed);
    assert_eq!(count(&events, constants::DEPLOYMENT_SUCCESS), 1);
    // The partitioned agent is never asked to kill.
    assert!(fleet.cluster.kills().is_empty());
    Ok(())
}

fn unique_host_app(instances: u32) -> AppDefinition {
    app("/web", instances)
        .with_constraint(Constraint::unique_hostname())
        .with_unreachable_strategy(UnreachableStrategy::Enabled {
            inactive_after_seconds: 300,
            expunge_after_seconds: 600,
        })
}

#[tokio::test]
async fn test_unique_host_scale_down_expunges_unreachable_instance() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = unique_host_app(2).id;
    fleet.orchestrator.create_app(&fleet.term, unique_host_app(2)).await?;
    fleet.deliver().await?;

    let instances = fleet.instances(&app_id).await?;
    assert_eq!(instances.len(), 2);
    assert_ne!(instances[0].agent.hostname, instances[1].agent.hostname);

    let victim = instances[0].clone();
    fleet.advance_secs(10);
    fleet.cluster.partition(&victim.agent.id);
    fleet.deliver().await?;
    fleet.drain_events();

    // Still inside the inactive window.
    fleet.advance_secs(60);
    fleet
        .orchestrator
        .update_app(&fleet.term, unique_host_app(1), false)
        .await?;
    fleet.deliver().await?;

    let remaining = fleet.instances(&app_id).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, instances[1].id);
    assert_eq!(remaining[0].condition, Condition::Running);
    assert!(fleet.orchestrator.instance(&victim.id).await.is_err());
    assert!(fleet.orchestrator.repository().is_expunged(&victim.id).await?);
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    assert_eq!(fleet.orchestrator.armed_timers(), 0);
    assert_eq!(count(&fleet.drain_events(), constants::DEPLOYMENT_SUCCESS), 1);
    Ok(())
}

#[tokio::test]
async fn test_delete_app_stops_instances_then_removes_app() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;
    fleet.drain_events();

    fleet
        .orchestrator
        .delete_app(&fleet.term, &app_id, false)
        .await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Killing).await?.len(), 2);
    assert!(fleet.orchestrator.app(&app_id).await.is_ok());

    fleet.deliver().await?;

    assert!(fleet.instances(&app_id).await?.is_empty());
    assert!(matches!(
        fleet.orchestrator.app(&app_id).await,
        Err(FleetError::NotFound { .. })
    ));
    assert_eq!(fleet.cluster.task_count(), 0);
    assert_eq!(count(&fleet.drain_events(), constants::DEPLOYMENT_SUCCESS), 1);
    Ok(())
}

#[tokio::test]
async fn test_update_while_deploying_is_locked_unless_forced() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let first = fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;

    let err = fleet
        .orchestrator
        .update_app(&fleet.term, app("/web", 3), false)
        .await
        .unwrap_err();
    match err {
        FleetError::AppLocked { deployments, .. } => {
            assert_eq!(deployments, vec![first.deployment_id]);
        }
        other => panic!("expected AppLocked, got {other:?}"),
    }
    fleet.drain_events();

    let second = fleet
        .orchestrator
        .update_app(&fleet.term, app("/web", 3), true)
        .await?;

    let plans = fleet.orchestrator.deployments().await?;
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].id, second.deployment_id);

    let events = fleet.drain_events();
    let superseded = events.iter().find_map(|event| match &event.payload {
        EventPayload::DeploymentFailed(failed) => Some(failed),
        _ => None,
    });
    let superseded = superseded.expect("first plan reported as failed");
    assert_eq!(superseded.id, first.deployment_id);
    assert!(superseded.reason.contains("superseded"));

    // Scaling to three only adds the missing instance.
    assert_eq!(fleet.cluster.launches().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_cancel_deployment_keeps_progress() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 2).id;
    let deployment = fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.drain_events();

    fleet
        .orchestrator
        .cancel_deployment(&fleet.term, deployment.deployment_id)
        .await?;

    assert!(fleet.orchestrator.deployments().await?.is_empty());
    assert_eq!(fleet.in_condition(&app_id, Condition::Staged).await?.len(), 2);
    let events = fleet.drain_events();
    assert_eq!(event_types(&events), vec![constants::DEPLOYMENT_FAILED]);

    let err = fleet
        .orchestrator
        .cancel_deployment(&fleet.term, deployment.deployment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_stuck_deployment_fails_and_freezes_app() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    fleet.cluster.set_reject_launches(true);
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    assert!(fleet.instances(&app_id).await?.is_empty());

    fleet.advance_secs(601);
    fleet.reconcile().await?;

    let plans = fleet.orchestrator.deployments().await?;
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].status, DeploymentStatus::Failed);
    let reason = plans[0].failure_reason.clone().unwrap_or_default();
    assert!(reason.contains("did not converge"), "{reason}");
    assert_eq!(count(&fleet.drain_events(), constants::DEPLOYMENT_FAILED), 1);

    // Frozen: no drift correction even once launches would succeed.
    fleet.cluster.set_reject_launches(false);
    let attempts = fleet.cluster.launches().len();
    fleet.reconcile().await?;
    assert_eq!(fleet.cluster.launches().len(), attempts);

    let locked = fleet
        .orchestrator
        .update_app(&fleet.term, app("/web", 2).with_cmd("sleep 2000"), false)
        .await;
    assert!(matches!(locked, Err(FleetError::AppLocked { .. })));

    fleet
        .orchestrator
        .update_app(&fleet.term, app("/web", 2).with_cmd("sleep 2000"), true)
        .await?;
    fleet.deliver().await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_kill_instance_with_and_without_scaling() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;
    let ids: Vec<InstanceId> = fleet
        .instances(&app_id)
        .await?
        .into_iter()
        .map(|instance| instance.id)
        .collect();

    let killed = fleet
        .orchestrator
        .kill_instance(&fleet.term, &ids[0], false)
        .await?;
    assert_eq!(killed.condition, Condition::Killing);
    fleet.deliver().await?;

    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 2);
    assert!(running.iter().all(|instance| instance.id != ids[0]));

    fleet
        .orchestrator
        .kill_instance(&fleet.term, &ids[1], true)
        .await?;
    fleet.deliver().await?;

    assert_eq!(fleet.orchestrator.app(&app_id).await?.instances, 1);
    assert_eq!(fleet.orchestrator.app_versions(&app_id).await?.len(), 2);
    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 1);
    assert_ne!(running[0].id, ids[1]);
    Ok(())
}
