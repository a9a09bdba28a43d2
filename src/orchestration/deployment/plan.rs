//! Deployment plan computation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::app::AppDefinition;
use crate::models::deployment::{
    DeploymentActionKind, DeploymentPlan, DeploymentStatus, DeploymentStep,
};

/// Turns an `(original, target)` pair of App versions into an ordered plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentPlanner;

impl DeploymentPlanner {
    /// Plan for creating (`original == None`) or updating an App.
    ///
    /// - new App: `StartApplication`, then `ScaleApplication` to the target count
    /// - config change: a single `RestartApplication` step
    /// - count change only: a single `ScaleApplication` step
    /// - nothing changed: no steps; the plan completes immediately
    pub fn compute(
        id: Uuid,
        original: Option<&AppDefinition>,
        target: &AppDefinition,
        now: DateTime<Utc>,
    ) -> DeploymentPlan {
        let app_id = &target.id;
        let steps = match original {
            None => vec![
                DeploymentStep::single(DeploymentActionKind::StartApplication, app_id),
                DeploymentStep::single(DeploymentActionKind::ScaleApplication, app_id),
            ],
            Some(current) if current.requires_restart_for(target) => vec![DeploymentStep::single(
                DeploymentActionKind::RestartApplication,
                app_id,
            )],
            Some(current) if current.instances != target.instances => vec![DeploymentStep::single(
                DeploymentActionKind::ScaleApplication,
                app_id,
            )],
            Some(_) => Vec::new(),
        };

        Self::plan(id, original.cloned(), target.clone(), steps, now)
    }

    /// Plan that kills every instance; the App is removed when it completes.
    pub fn compute_stop(id: Uuid, current: &AppDefinition, now: DateTime<Utc>) -> DeploymentPlan {
        let target = current.clone().with_instances(0);
        let steps = vec![DeploymentStep::single(
            DeploymentActionKind::StopApplication,
            &current.id,
        )];
        Self::plan(id, Some(current.clone()), target, steps, now)
    }

    fn plan(
        id: Uuid,
        original: Option<AppDefinition>,
        target: AppDefinition,
        steps: Vec<DeploymentStep>,
        now: DateTime<Utc>,
    ) -> DeploymentPlan {
        DeploymentPlan {
            id,
            app_id: target.id.clone(),
            original,
            target,
            steps,
            current_step: 0,
            step_started_at: now,
            created_at: now,
            status: DeploymentStatus::InProgress,
            failure_reason: None,
        }
    }
}
