//! Leader handover: a standby reloads stored state and finishes what the
//! previous leader started, while the previous leader's term is refused.

use anyhow::Result;
use fleet_core::error::FleetError;
use fleet_core::events::{constants, FleetEvent};
use fleet_core::models::deployment::DeploymentStatus;
use fleet_core::state_machine::Condition;
use fleet_core::test_helpers::{agents, app, test_config, Fault, RepositoryOp, TestFleet};
use uuid::Uuid;

fn successes_for(events: &[FleetEvent], deployment_id: Uuid) -> usize {
    events
        .iter()
        .filter(|event| event.event_type() == constants::DEPLOYMENT_SUCCESS)
        .filter(|event| event.payload.deployment_id() == Some(deployment_id))
        .count()
}

#[tokio::test]
async fn test_standby_resumes_in_flight_deployment() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 2).id;
    let created = fleet
        .orchestrator
        .create_app(&fleet.term, app("/web", 2))
        .await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Staged).await?.len(), 2);
    fleet.drain_events();

    fleet.context.election.resign(&fleet.term).await?;
    let refused = fleet
        .orchestrator
        .create_app(&fleet.term, app("/api", 1))
        .await;
    assert!(matches!(refused, Err(FleetError::LeadershipLost { epoch: 1 })));
    assert!(fleet.orchestrator.reconcile(&fleet.term).await.is_err());

    let standby = fleet.standby("node-b")?;
    let term = fleet.context.election.campaign("node-b").await?;
    assert_eq!(term.epoch(), 2);
    standby.take_leadership(term.clone()).await?;

    let plans = standby.deployments().await?;
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].id, created.deployment_id);

    for instance in fleet.instances(&app_id).await? {
        assert!(fleet.cluster.run_task(&instance.id));
    }
    fleet.deliver_to(&standby, &term).await?;

    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);
    assert!(standby.deployments().await?.is_empty());

    let events = fleet.drain_events();
    let successes: Vec<_> = events
        .iter()
        .filter(|event| event.event_type() == constants::DEPLOYMENT_SUCCESS)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].payload.deployment_id(), Some(created.deployment_id));
    Ok(())
}

#[tokio::test]
async fn test_new_leader_rearms_unreachable_timers() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let original = fleet.instances(&app_id).await?.remove(0);
    fleet.advance_secs(10);
    fleet.cluster.partition(&original.agent.id);
    fleet.deliver().await?;
    assert_eq!(fleet.orchestrator.armed_timers(), 2);

    fleet.orchestrator.relinquish().await;
    assert_eq!(fleet.orchestrator.armed_timers(), 0);
    fleet.context.election.resign(&fleet.term).await?;

    let standby = fleet.standby("node-b")?;
    let term = fleet.context.election.campaign("node-b").await?;
    standby.take_leadership(term.clone()).await?;
    assert_eq!(standby.armed_timers(), 2);

    // Deadlines run from the stored unreachable timestamp, not from the
    // handover.
    fleet.advance_secs(300);
    let report = standby.reconcile(&term).await?;
    assert_eq!(report.timers_fired, 1);
    fleet.deliver_to(&standby, &term).await?;

    assert_eq!(
        standby.instance(&original.id).await?.condition,
        Condition::UnreachableInactive
    );
    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stale_leader_cannot_apply_reports() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    let instance = fleet.instances(&app_id).await?.remove(0);

    fleet.context.election.resign(&fleet.term).await?;
    assert!(fleet.cluster.run_task(&instance.id));
    let report = fleet.cluster.drain_reports().remove(0);

    let refused = fleet
        .orchestrator
        .handle_task_status(&fleet.term, report)
        .await;
    assert!(refused.is_err_and(|error| error.is_leadership_loss()));
    assert_eq!(
        fleet.orchestrator.instance(&instance.id).await?.condition,
        Condition::Staged
    );
    Ok(())
}

#[tokio::test]
async fn test_term_lost_while_removing_finished_plan_reports_success_once() -> Result<()> {
    let (mut fleet, faults) = TestFleet::with_faults(agents(2), test_config("node-a")).await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 2).id;
    let created = fleet
        .orchestrator
        .create_app(&fleet.term, app("/web", 2))
        .await?;
    fleet.drain_events();

    faults.arm(
        RepositoryOp::DeleteDeployment,
        Fault::LoseTerm(fleet.term.clone()),
    );
    for instance in fleet.instances(&app_id).await? {
        assert!(fleet.cluster.run_task(&instance.id));
    }
    let _ = fleet.deliver().await;
    assert_eq!(faults.armed(), 0);
    assert!(!fleet.context.election.is_current(&fleet.term));

    let standby = fleet.standby("node-b")?;
    let term = fleet.context.election.campaign("node-b").await?;
    standby.take_leadership(term.clone()).await?;
    standby.reconcile(&term).await?;

    assert!(standby.deployments().await?.is_empty());
    assert_eq!(successes_for(&fleet.drain_events(), created.deployment_id), 1);
    Ok(())
}

#[tokio::test]
async fn test_next_leader_finishes_plan_stored_as_succeeded() -> Result<()> {
    let (mut fleet, faults) = TestFleet::with_faults(agents(2), test_config("node-a")).await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 2).id;
    let created = fleet
        .orchestrator
        .create_app(&fleet.term, app("/web", 2))
        .await?;
    fleet.drain_events();

    // The lease runs out while the finished plan is being written, so the
    // success event cannot go out under the old term.
    faults.arm(
        RepositoryOp::StoreDeployment(DeploymentStatus::Succeeded),
        Fault::LoseTerm(fleet.term.clone()),
    );
    for instance in fleet.instances(&app_id).await? {
        assert!(fleet.cluster.run_task(&instance.id));
    }
    let refused = fleet.deliver().await;
    assert!(refused.is_err());
    assert_eq!(successes_for(&fleet.drain_events(), created.deployment_id), 0);

    let standby = fleet.standby("node-b")?;
    let term = fleet.context.election.campaign("node-b").await?;
    standby.take_leadership(term.clone()).await?;
    let plans = standby.deployments().await?;
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].status, DeploymentStatus::Succeeded);

    let report = standby.reconcile(&term).await?;
    assert_eq!(report.deployments_advanced, 1);
    assert!(standby.deployments().await?.is_empty());
    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);

    standby.reconcile(&term).await?;
    assert_eq!(successes_for(&fleet.drain_events(), created.deployment_id), 1);
    Ok(())
}
