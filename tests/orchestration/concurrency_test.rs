//! Concurrent operations across Apps: per-App serialization must not leak
//! between Apps, and the event stream stays totally ordered.

use anyhow::Result;
use fleet_core::events::constants;
use fleet_core::state_machine::Condition;
use fleet_core::test_helpers::{agents, app, test_config, TestFleet};
use futures::future::join_all;
use std::sync::Arc;

const APPS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_converge_independently() -> Result<()> {
    let mut fleet = TestFleet::with(agents(4), test_config("node-a")).await?;

    let creates = (0..APPS).map(|n| {
        let orchestrator = Arc::clone(&fleet.orchestrator);
        let term = fleet.term.clone();
        tokio::spawn(async move { orchestrator.create_app(&term, app(&format!("/svc-{n}"), 3)).await })
    });
    for created in join_all(creates).await {
        created??;
    }
    fleet.deliver().await?;

    for n in 0..APPS {
        let app_id = app(&format!("/svc-{n}"), 3).id;
        assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 3);
    }
    assert!(fleet.orchestrator.deployments().await?.is_empty());

    let events = fleet.drain_events();
    assert!(events
        .windows(2)
        .all(|pair| pair[0].sequence < pair[1].sequence));
    let successes = events
        .iter()
        .filter(|event| event.event_type() == constants::DEPLOYMENT_SUCCESS)
        .count();
    assert_eq!(successes, APPS);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_for_one_app_are_serialized() -> Result<()> {
    let fleet = TestFleet::start().await?;
    fleet.cluster.set_auto_run(false);
    let app_id = app("/web", 6).id;
    fleet.orchestrator.create_app(&fleet.term, app("/web", 6)).await?;
    assert_eq!(fleet.in_condition(&app_id, Condition::Staged).await?.len(), 6);

    for instance in fleet.instances(&app_id).await? {
        assert!(fleet.cluster.run_task(&instance.id));
    }
    let deliveries = fleet.cluster.drain_reports().into_iter().map(|report| {
        let orchestrator = Arc::clone(&fleet.orchestrator);
        let term = fleet.term.clone();
        tokio::spawn(async move { orchestrator.handle_task_status(&term, report).await })
    });
    for delivered in join_all(deliveries).await {
        delivered??;
    }

    assert_eq!(fleet.in_condition(&app_id, Condition::Running).await?.len(), 6);
    assert!(fleet.orchestrator.deployments().await?.is_empty());
    assert_eq!(fleet.cluster.launches().len(), 6);
    Ok(())
}
