//! Unreachable instances: inactive replacement, recovery, expunge and the
//! disabled strategy.

use anyhow::Result;
use fleet_core::events::{EventPayload, FleetEvent};
use fleet_core::models::{Instance, UnreachableStrategy};
use fleet_core::state_machine::Condition;
use fleet_core::error::FleetError;
use fleet_core::test_helpers::{agents, app, test_config, Fault, RepositoryOp, TestFleet};

async fn partitioned_fleet(strategy: Option<UnreachableStrategy>) -> Result<(TestFleet, Instance)> {
    let fleet = TestFleet::start().await?;
    let mut web = app("/web", 2);
    if let Some(strategy) = strategy {
        web = web.with_unreachable_strategy(strategy);
    }
    let app_id = web.id.clone();
    fleet.orchestrator.create_app(&fleet.term, web).await?;
    fleet.deliver().await?;

    let original = fleet.instances(&app_id).await?.remove(0);
    fleet.advance_secs(10);
    fleet.cluster.partition(&original.agent.id);
    fleet.deliver().await?;
    Ok((fleet, original))
}

fn transitions_of(events: &[FleetEvent], instance: &Instance) -> Vec<Condition> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::InstanceChanged(changed) if changed.instance_id == instance.id => {
                Some(changed.condition)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_inactive_instance_is_replaced_and_stand_in_retired_on_recovery() -> Result<()> {
    let (mut fleet, original) = partitioned_fleet(None).await?;
    let app_id = original.app_id.clone();

    let unreachable = fleet.orchestrator.instance(&original.id).await?;
    assert_eq!(unreachable.condition, Condition::Unreachable);
    assert!(unreachable.unreachable_since.is_some());
    assert_eq!(fleet.orchestrator.armed_timers(), 2);

    // Still counted while merely unreachable.
    fleet.advance_secs(299);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 0);
    assert_eq!(report.instances_launched, 0);

    fleet.advance_secs(1);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 1);
    assert_eq!(
        fleet.orchestrator.instance(&original.id).await?.condition,
        Condition::UnreachableInactive
    );

    let stand_in = fleet
        .instances(&app_id)
        .await?
        .into_iter()
        .find(|instance| instance.replaces.as_ref() == Some(&original.id))
        .expect("replacement launched for the inactive instance");
    assert_eq!(stand_in.condition, Condition::Running);
    assert_ne!(stand_in.agent.id, original.agent.id);
    fleet.drain_events();

    fleet.advance_secs(10);
    fleet.cluster.heal(&original.agent.id);
    fleet.deliver().await?;

    let instances = fleet.instances(&app_id).await?;
    assert_eq!(instances.len(), 2);
    assert!(instances
        .iter()
        .all(|instance| instance.condition == Condition::Running));
    assert!(instances.iter().any(|instance| instance.id == original.id));
    assert!(instances.iter().all(|instance| instance.id != stand_in.id));
    assert_eq!(fleet.orchestrator.armed_timers(), 0);

    let events = fleet.drain_events();
    assert_eq!(transitions_of(&events, &original), vec![Condition::Running]);
    assert_eq!(
        transitions_of(&events, &stand_in),
        vec![Condition::Killing, Condition::Killed]
    );
    Ok(())
}

#[tokio::test]
async fn test_recovery_before_deadline_cancels_timers() -> Result<()> {
    let (fleet, original) = partitioned_fleet(None).await?;

    fleet.advance_secs(100);
    fleet.cluster.heal(&original.agent.id);
    fleet.deliver().await?;
    assert_eq!(
        fleet.orchestrator.instance(&original.id).await?.condition,
        Condition::Running
    );
    assert_eq!(fleet.orchestrator.armed_timers(), 0);

    fleet.advance_secs(600);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 0);
    assert_eq!(fleet.cluster.launches().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_expunge_deadline_removes_instance() -> Result<()> {
    let (mut fleet, original) = partitioned_fleet(None).await?;
    let app_id = original.app_id.clone();
    fleet.drain_events();

    fleet.advance_secs(600);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 1);

    assert!(fleet.orchestrator.instance(&original.id).await.is_err());
    assert_eq!(fleet.orchestrator.armed_timers(), 0);
    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 2);

    let events = fleet.drain_events();
    assert_eq!(transitions_of(&events, &original), vec![Condition::Killed]);
    Ok(())
}

#[tokio::test]
async fn test_disabled_strategy_waits_indefinitely() -> Result<()> {
    let (fleet, original) = partitioned_fleet(Some(UnreachableStrategy::Disabled)).await?;
    assert_eq!(fleet.orchestrator.armed_timers(), 0);

    fleet.advance_secs(86_400);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 0);
    assert_eq!(report.instances_launched, 0);
    assert_eq!(
        fleet.orchestrator.instance(&original.id).await?.condition,
        Condition::Unreachable
    );
    Ok(())
}

#[tokio::test]
async fn test_strategy_change_applies_to_unreachable_instances() -> Result<()> {
    let (fleet, original) = partitioned_fleet(Some(UnreachableStrategy::Disabled)).await?;
    assert_eq!(fleet.orchestrator.armed_timers(), 0);

    let tightened = app("/web", 2).with_unreachable_strategy(UnreachableStrategy::new(60, 120)?);
    fleet
        .orchestrator
        .update_app(&fleet.term, tightened, false)
        .await?;
    assert_eq!(fleet.orchestrator.armed_timers(), 2);

    // Deadlines count from when the instance became unreachable, not from
    // the update.
    fleet.advance_secs(60);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 1);
    assert_eq!(
        fleet.orchestrator.instance(&original.id).await?.condition,
        Condition::UnreachableInactive
    );
    assert_eq!(
        fleet
            .in_condition(&original.app_id, Condition::Running)
            .await?
            .len(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_due_timers_survive_a_failed_cycle() -> Result<()> {
    let (fleet, faults) = TestFleet::with_faults(agents(3), test_config("node-a")).await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let originals = fleet.instances(&app_id).await?;
    fleet.advance_secs(10);
    for instance in &originals {
        fleet.cluster.partition(&instance.agent.id);
    }
    fleet.deliver().await?;
    assert_eq!(fleet.orchestrator.armed_timers(), 4);

    // Both inactive deadlines are due; the store fails on the first one.
    fleet.advance_secs(300);
    faults.arm(RepositoryOp::Instance, Fault::Fail);
    let failed = fleet.orchestrator.reconcile(&fleet.term).await;
    assert!(matches!(failed, Err(FleetError::Storage(_))));
    assert_eq!(fleet.orchestrator.armed_timers(), 4);

    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 2);
    for instance in &originals {
        assert_eq!(
            fleet.orchestrator.instance(&instance.id).await?.condition,
            Condition::UnreachableInactive
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_single_instance_fails_over_to_alternate_agent() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let web = app("/web", 1).with_unreachable_strategy(UnreachableStrategy::Enabled {
        inactive_after_seconds: 10,
        expunge_after_seconds: 300,
    });
    let app_id = web.id.clone();
    fleet.orchestrator.create_app(&fleet.term, web).await?;
    fleet.deliver().await?;
    let original = fleet.instances(&app_id).await?.remove(0);
    fleet.drain_events();

    fleet.advance_secs(5);
    fleet.cluster.partition(&original.agent.id);
    fleet.deliver().await?;
    assert_eq!(
        transitions_of(&fleet.drain_events(), &original),
        vec![Condition::Unreachable]
    );

    fleet.advance_secs(10);
    let report = fleet.reconcile().await?;
    assert_eq!(report.timers_fired, 1);
    let stand_in = fleet
        .in_condition(&app_id, Condition::Running)
        .await?
        .into_iter()
        .find(|instance| instance.replaces.as_ref() == Some(&original.id))
        .expect("replacement running on the other agent");
    assert_ne!(stand_in.agent.id, original.agent.id);
    assert_eq!(
        transitions_of(&fleet.drain_events(), &original),
        vec![Condition::UnreachableInactive]
    );

    fleet.advance_secs(5);
    fleet.cluster.heal(&original.agent.id);
    fleet.deliver().await?;

    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, original.id);
    let events = fleet.drain_events();
    assert_eq!(transitions_of(&events, &original), vec![Condition::Running]);
    assert_eq!(
        transitions_of(&events, &stand_in),
        vec![Condition::Killing, Condition::Killed]
    );
    Ok(())
}
