//! # Deployment Plan Executor
//!
//! Drives a [`DeploymentPlan`] forward one step at a time. Execution is
//! re-entrant: [`FleetOrchestrator::advance_plan`] is called after every
//! status report, health result and reconciliation cycle for the App, looks
//! at the instances as they are now, issues the kills and launches the
//! current step still needs, and moves on once the step has converged.
//!
//! Progress is stored after every completed step, so a new leader continues
//! the plan at `current_step` instead of replaying it.

use opentelemetry::KeyValue;
use tracing::{debug, instrument, warn};

use super::capacity::{
    restart_decision, scale_decision, stop_decision, unreplaced_originals, StepDecision,
};
use crate::error::{FleetError, FleetResult};
use crate::events::{
    DeploymentFailed, DeploymentStepInfo, DeploymentSuccess, EventPayload, PlanSummary,
};
use crate::leadership::LeadershipTerm;
use crate::logging::log_deployment_operation;
use crate::metrics;
use crate::models::app::AppDefinition;
use crate::models::deployment::{DeploymentActionKind, DeploymentPlan, DeploymentStatus};
use crate::models::instance::Instance;
use crate::orchestration::core::FleetOrchestrator;

/// Where a plan stands after an [`FleetOrchestrator::advance_plan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanProgress {
    /// The current step is still converging.
    InProgress,
    Succeeded,
    /// The current step missed its deadline; the plan now holds the App frozen.
    Failed,
    /// The plan was no longer in progress when called.
    Halted,
}

/// Counts of the actions one convergence pass issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergeOutcome {
    pub launched: usize,
    pub killed: usize,
    pub complete: bool,
}

impl FleetOrchestrator {
    /// Advance `plan` as far as the current instances allow. Callers hold the
    /// App's lock.
    #[instrument(skip(self, term, plan), fields(deployment_id = %plan.id, app_id = %plan.app_id))]
    pub(crate) async fn advance_plan(
        &self,
        term: &LeadershipTerm,
        mut plan: DeploymentPlan,
    ) -> FleetResult<PlanProgress> {
        loop {
            if plan.status != DeploymentStatus::InProgress {
                return Ok(PlanProgress::Halted);
            }
            if plan.is_finished() {
                self.complete_plan(term, plan).await?;
                return Ok(PlanProgress::Succeeded);
            }

            if self.execute_step(term, &plan).await? {
                self.ensure_active(term)?;
                self.publish(
                    term,
                    EventPayload::DeploymentStepSuccess(step_info(&plan)),
                )?;
                plan.current_step += 1;
                plan.step_started_at = self.clock.now();
                self.repo.store_deployment(&plan).await?;
                log_deployment_operation(
                    "step_completed",
                    &plan.id.to_string(),
                    plan.app_id.as_str(),
                    Some(plan.current_step - 1),
                    "in_progress",
                    None,
                );
                if plan.current().is_some() {
                    self.publish(term, EventPayload::DeploymentInfo(step_info(&plan)))?;
                }
                continue;
            }

            let waited = self.clock.now() - plan.step_started_at;
            if waited >= self.config.step_timeout() {
                let stuck = FleetError::DeploymentStuck {
                    deployment_id: plan.id,
                    reason: format!(
                        "step {} did not converge within {}s",
                        plan.current_step + 1,
                        self.config.deployment.step_timeout_seconds
                    ),
                };
                self.fail_plan(term, plan, stuck.to_string(), "step_timeout")
                    .await?;
                return Ok(PlanProgress::Failed);
            }

            debug!(step = plan.current_step, "Deployment step still converging");
            return Ok(PlanProgress::InProgress);
        }
    }

    /// Run every action of the current step once. True when all have converged.
    async fn execute_step(&self, term: &LeadershipTerm, plan: &DeploymentPlan) -> FleetResult<bool> {
        let Some(step) = plan.current() else {
            return Ok(true);
        };
        let mut complete = true;
        for action in &step.actions {
            let outcome = self.converge(term, &plan.target, action.action).await?;
            complete &= outcome.complete;
        }
        Ok(complete)
    }

    /// Issue the kills and launches `kind` calls for on `target`'s instances,
    /// then report whether the App has converged. Callers hold the App's lock.
    pub(crate) async fn converge(
        &self,
        term: &LeadershipTerm,
        target: &AppDefinition,
        kind: DeploymentActionKind,
    ) -> FleetResult<ConvergeOutcome> {
        let instances = self.repo.instances_for(&target.id).await?;
        let decision = decide(kind, target, &instances);
        if decision.is_noop() {
            return Ok(ConvergeOutcome {
                complete: decision.complete,
                ..ConvergeOutcome::default()
            });
        }

        let (launched, killed) = self
            .apply_decision(term, target, &instances, &decision, kind)
            .await?;
        let instances = self.repo.instances_for(&target.id).await?;
        Ok(ConvergeOutcome {
            launched,
            killed,
            complete: decide(kind, target, &instances).complete,
        })
    }

    async fn apply_decision(
        &self,
        term: &LeadershipTerm,
        target: &AppDefinition,
        instances: &[Instance],
        decision: &StepDecision,
        kind: DeploymentActionKind,
    ) -> FleetResult<(usize, usize)> {
        let mut killed = 0;
        for id in &decision.kill {
            let Some(instance) = instances.iter().find(|instance| &instance.id == id) else {
                continue;
            };
            self.kill_instance_locked(term, instance.clone(), kill_reason(kind))
                .await?;
            killed += 1;
        }

        let mut originals = unreplaced_originals(instances).into_iter();
        let mut launched = 0;
        for _ in 0..decision.start {
            let replaces = originals.next();
            let reason = if replaces.is_some() {
                "replacement"
            } else {
                "deployment"
            };
            match self.launch_instance(term, target, replaces, reason).await? {
                Some(_) => launched += 1,
                None => break,
            }
        }
        Ok((launched, killed))
    }

    /// Finish a plan whose steps have all converged. The plan is stored as
    /// succeeded before `deployment_success` goes out and removed only after,
    /// so a leader that loses its term in between leaves the plan for the next
    /// leader to finish instead of dropping the event.
    pub(crate) async fn complete_plan(
        &self,
        term: &LeadershipTerm,
        mut plan: DeploymentPlan,
    ) -> FleetResult<()> {
        self.ensure_active(term)?;
        if plan.status != DeploymentStatus::Succeeded {
            plan.status = DeploymentStatus::Succeeded;
            self.repo.store_deployment(&plan).await?;
        }
        if plan.is_stop() {
            self.repo.delete_app(&plan.app_id).await?;
        }
        self.publish(
            term,
            EventPayload::DeploymentSuccess(DeploymentSuccess {
                id: plan.id,
                plan: PlanSummary::from(&plan),
                actions: plan.actions(),
            }),
        )?;
        self.repo.delete_deployment(plan.id).await?;

        metrics::deployments_succeeded_total().add(1, &[]);
        log_deployment_operation(
            "completed",
            &plan.id.to_string(),
            plan.app_id.as_str(),
            None,
            "succeeded",
            None,
        );
        Ok(())
    }

    /// Publish and remove plans a previous term stored as succeeded but did
    /// not get to remove.
    pub(crate) async fn finish_succeeded_plans(&self, term: &LeadershipTerm) -> FleetResult<usize> {
        let succeeded: Vec<DeploymentPlan> = self
            .repo
            .deployments()
            .await?
            .into_iter()
            .filter(|plan| plan.status == DeploymentStatus::Succeeded)
            .collect();
        let mut finished = 0;
        for plan in succeeded {
            let _guard = self.lock_app(&plan.app_id).await;
            if self.repo.deployment(plan.id).await?.is_none() {
                continue;
            }
            debug!(deployment_id = %plan.id, "Finishing plan left succeeded by an earlier term");
            self.complete_plan(term, plan).await?;
            finished += 1;
        }
        Ok(finished)
    }

    /// Mark the plan failed. It keeps holding the App so no drift correction
    /// runs until the plan is cancelled or superseded.
    pub(crate) async fn fail_plan(
        &self,
        term: &LeadershipTerm,
        mut plan: DeploymentPlan,
        reason: String,
        label: &'static str,
    ) -> FleetResult<()> {
        plan.status = DeploymentStatus::Failed;
        plan.failure_reason = Some(reason.clone());
        self.ensure_active(term)?;
        self.repo.store_deployment(&plan).await?;
        self.publish(term, deployment_failed(&plan, reason.clone()))?;

        metrics::deployments_failed_total().add(1, &[KeyValue::new("reason", label)]);
        warn!(deployment_id = %plan.id, reason = %reason, "🚫 DEPLOYMENT: Failed");
        log_deployment_operation(
            "failed",
            &plan.id.to_string(),
            plan.app_id.as_str(),
            Some(plan.current_step),
            "failed",
            Some(&reason),
        );
        Ok(())
    }

    /// Remove a plan without rolling anything back.
    pub(crate) async fn cancel_plan_locked(
        &self,
        term: &LeadershipTerm,
        mut plan: DeploymentPlan,
        reason: &str,
        label: &'static str,
    ) -> FleetResult<()> {
        plan.status = DeploymentStatus::Cancelled;
        plan.failure_reason = Some(reason.to_string());
        self.ensure_active(term)?;
        self.repo.delete_deployment(plan.id).await?;
        self.publish(term, deployment_failed(&plan, reason.to_string()))?;

        metrics::deployments_failed_total().add(1, &[KeyValue::new("reason", label)]);
        log_deployment_operation(
            "cancelled",
            &plan.id.to_string(),
            plan.app_id.as_str(),
            Some(plan.current_step),
            "cancelled",
            Some(reason),
        );
        Ok(())
    }
}

fn decide(kind: DeploymentActionKind, target: &AppDefinition, instances: &[Instance]) -> StepDecision {
    match kind {
        DeploymentActionKind::StartApplication => StepDecision {
            complete: true,
            ..StepDecision::default()
        },
        DeploymentActionKind::ScaleApplication => scale_decision(target, instances),
        DeploymentActionKind::RestartApplication => restart_decision(target, instances),
        DeploymentActionKind::StopApplication => stop_decision(instances),
    }
}

fn kill_reason(kind: DeploymentActionKind) -> &'static str {
    match kind {
        DeploymentActionKind::RestartApplication => "replaced by new version",
        DeploymentActionKind::StopApplication => "app stopped",
        _ => "scaled down",
    }
}

pub(crate) fn step_info(plan: &DeploymentPlan) -> DeploymentStepInfo {
    DeploymentStepInfo {
        plan: PlanSummary::from(plan),
        step_index: plan.current_step,
        current_step: plan.current().cloned().unwrap_or_default(),
    }
}

pub(crate) fn deployment_failed(plan: &DeploymentPlan, reason: String) -> EventPayload {
    EventPayload::DeploymentFailed(DeploymentFailed {
        id: plan.id,
        plan: PlanSummary::from(plan),
        reason,
    })
}
