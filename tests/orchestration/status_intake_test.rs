//! Status report intake: ordering, duplicates, orphans and task failures.

use anyhow::Result;
use chrono::Duration;
use fleet_core::clock::Clock;
use fleet_core::cluster::TaskStatusReport;
use fleet_core::models::{AgentId, InstanceId, TaskId};
use fleet_core::orchestration::ReportOutcome;
use fleet_core::state_machine::{Condition, TaskStatus};
use fleet_core::test_helpers::{app, TestFleet};

#[tokio::test]
async fn test_duplicate_report_changes_nothing() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.deliver().await?;
    fleet.drain_events();

    let instance = fleet.instances(&app_id).await?.remove(0);
    let last = instance.last_status.clone().expect("running report recorded");
    let repeat = TaskStatusReport::new(&instance, last.status, last.at);

    let outcome = fleet
        .orchestrator
        .handle_task_status(&fleet.term, repeat)
        .await?;
    assert_eq!(outcome, ReportOutcome::Duplicate);
    assert!(fleet.drain_events().is_empty());
    assert_eq!(fleet.orchestrator.instance(&instance.id).await?, instance);
    Ok(())
}

#[tokio::test]
async fn test_stale_report_is_ignored() -> Result<()> {
    let mut fleet = TestFleet::start().await?;
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.deliver().await?;
    fleet.drain_events();

    let instance = fleet.instances(&app_id).await?.remove(0);
    let earlier = fleet.clock.now() - Duration::seconds(1);
    let stale = TaskStatusReport::new(&instance, TaskStatus::Killed, earlier);

    let outcome = fleet
        .orchestrator
        .handle_task_status(&fleet.term, stale)
        .await?;
    assert_eq!(outcome, ReportOutcome::Stale);
    assert_eq!(
        fleet.orchestrator.instance(&instance.id).await?.condition,
        Condition::Running
    );
    assert!(fleet.drain_events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_same_timestamp_different_status_is_applied() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;

    let instance = fleet.instances(&app_id).await?.remove(0);
    let at = fleet.clock.now();
    let starting = TaskStatusReport::new(&instance, TaskStatus::Starting, at);
    let running = TaskStatusReport::new(&instance, TaskStatus::Running, at);

    assert_eq!(
        fleet
            .orchestrator
            .handle_task_status(&fleet.term, starting)
            .await?,
        ReportOutcome::Applied { transitions: 1 }
    );
    assert_eq!(
        fleet
            .orchestrator
            .handle_task_status(&fleet.term, running)
            .await?,
        ReportOutcome::Applied { transitions: 1 }
    );
    assert_eq!(
        fleet.orchestrator.instance(&instance.id).await?.condition,
        Condition::Running
    );
    Ok(())
}

#[tokio::test]
async fn test_running_report_skips_starting() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    let instance = fleet.instances(&app_id).await?.remove(0);

    let outcome = fleet
        .orchestrator
        .handle_task_status(
            &fleet.term,
            TaskStatusReport::new(&instance, TaskStatus::Running, fleet.clock.now()),
        )
        .await?;
    assert_eq!(outcome, ReportOutcome::Applied { transitions: 2 });
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_orphan_task_is_killed() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let ghost = TaskStatusReport {
        instance_id: InstanceId::from_raw("ghost.instance-9"),
        task_id: TaskId::from_raw("ghost.instance-9._app.1"),
        status: TaskStatus::Running,
        agent_id: AgentId::new("agent-1"),
        hostname: "host-1".to_string(),
        timestamp: fleet.clock.now(),
        message: None,
    };

    let outcome = fleet
        .orchestrator
        .handle_task_status(&fleet.term, ghost.clone())
        .await?;
    assert_eq!(outcome, ReportOutcome::Orphan);
    assert_eq!(fleet.cluster.kills(), vec![ghost.task_ref()]);

    // A task that already ended needs no kill.
    let ended = TaskStatusReport {
        status: TaskStatus::Killed,
        ..ghost
    };
    let outcome = fleet
        .orchestrator
        .handle_task_status(&fleet.term, ended)
        .await?;
    assert_eq!(outcome, ReportOutcome::Orphan);
    assert_eq!(fleet.cluster.kills().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_report_for_superseded_task_is_orphaned() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 1).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 1)).await?;
    fleet.deliver().await?;

    let instance = fleet.instances(&app_id).await?.remove(0);
    let mut report = TaskStatusReport::new(&instance, TaskStatus::Running, fleet.clock.now());
    report.task_id = TaskId::for_instance(&instance.id, instance.incarnation + 1);

    let outcome = fleet
        .orchestrator
        .handle_task_status(&fleet.term, report)
        .await?;
    assert_eq!(outcome, ReportOutcome::Orphan);
    assert_eq!(
        fleet.orchestrator.instance(&instance.id).await?.condition,
        Condition::Running
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_task_is_replaced() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let failing = fleet.instances(&app_id).await?.remove(0);
    fleet.advance_secs(30);
    assert!(fleet.cluster.fail_task(&failing.id));
    fleet.deliver().await?;

    let running = fleet.in_condition(&app_id, Condition::Running).await?;
    assert_eq!(running.len(), 2);
    assert!(running.iter().all(|instance| instance.id != failing.id));
    assert_eq!(fleet.cluster.launches().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_lost_task_is_replaced_then_collected() -> Result<()> {
    let fleet = TestFleet::start().await?;
    let app_id = app("/web", 2).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 2)).await?;
    fleet.deliver().await?;

    let lost = fleet.instances(&app_id).await?.remove(0);
    fleet.advance_secs(30);
    assert!(fleet.cluster.lose_task(&lost.id));
    fleet.deliver().await?;

    assert_eq!(
        fleet.orchestrator.instance(&lost.id).await?.condition,
        Condition::Lost
    );
    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 2);

    let report = fleet.reconcile().await?;
    assert_eq!(report.instances_killed, 1);
    assert!(fleet.orchestrator.instance(&lost.id).await.is_err());
    assert_eq!(fleet.instances(&app_id).await?.len(), 2);
    Ok(())
}
