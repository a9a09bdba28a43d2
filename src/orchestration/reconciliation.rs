//! # Reconciliation
//!
//! Periodically compares desired state (App versions, deployment plans) with
//! observed state (instances) and corrects drift:
//!
//! 1. Fires due unreachable timers (inactive and expunge deadlines).
//! 2. Advances in-progress deployments and finishes plans an earlier term
//!    stored as succeeded but did not remove.
//! 3. For Apps no plan holds: launches or kills instances until the
//!    slot-occupying count matches the desired count, removes lost instances,
//!    re-sends unconfirmed kills and gives up on launches that never reported.
//! 4. Kills instances whose App no longer exists.
//!
//! An App held by a failed plan is frozen: nothing is launched or killed for it
//! until the plan is cancelled or superseded.
//!
//! [`ReconciliationLoop`] runs cycles on an interval while the process leads.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::deployment::ConvergeOutcome;
use crate::error::FleetResult;
use crate::leadership::LeadershipTerm;
use crate::metrics;
use crate::models::deployment::{DeploymentActionKind, DeploymentStatus};
use crate::models::ids::AppId;
use crate::models::instance::Instance;
use crate::orchestration::core::FleetOrchestrator;
use crate::state_machine::{Condition, InstanceEvent};
use crate::unreachable::{TimerEntry, UnreachableDecision, UnreachableEvaluator};

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub apps_checked: usize,
    pub timers_fired: usize,
    pub instances_launched: usize,
    pub instances_killed: usize,
    pub orphans_killed: usize,
    pub deployments_advanced: usize,
}

impl ReconciliationReport {
    pub fn is_quiet(&self) -> bool {
        self.timers_fired == 0
            && self.instances_launched == 0
            && self.instances_killed == 0
            && self.orphans_killed == 0
    }

    fn absorb(&mut self, settled: Settled) {
        match settled {
            Settled::Advanced => self.deployments_advanced += 1,
            Settled::Converged(outcome) => {
                self.instances_launched += outcome.launched;
                self.instances_killed += outcome.killed;
            }
            Settled::Frozen | Settled::Absent => {}
        }
    }
}

/// What [`FleetOrchestrator::settle_app`] did for an App.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    /// An in-progress plan was advanced.
    Advanced,
    /// No plan holds the App; drift was corrected.
    Converged(ConvergeOutcome),
    /// A failed plan holds the App.
    Frozen,
    /// The App no longer exists.
    Absent,
}

impl FleetOrchestrator {
    /// Run one reconciliation cycle.
    #[instrument(skip(self, term), fields(term = %term))]
    pub async fn reconcile(&self, term: &LeadershipTerm) -> FleetResult<ReconciliationReport> {
        let started = std::time::Instant::now();
        self.ensure_active(term)?;

        let mut report = ReconciliationReport {
            timers_fired: self.fire_due_timers(term).await?,
            deployments_advanced: self.finish_succeeded_plans(term).await?,
            ..ReconciliationReport::default()
        };

        let apps = self.repo.apps().await?;
        for app in &apps {
            self.reconcile_app(term, &app.id, &mut report).await?;
            report.apps_checked += 1;
        }

        let known: HashSet<&AppId> = apps.iter().map(|app| &app.id).collect();
        let orphaned: Vec<Instance> = self
            .repo
            .all_instances()
            .await?
            .into_iter()
            .filter(|instance| !known.contains(&instance.app_id))
            .collect();
        for instance in orphaned {
            let _guard = self.lock_app(&instance.app_id).await;
            self.ensure_active(term)?;
            if let Some(current) = self.repo.instance(&instance.id).await? {
                if current.condition != Condition::Killing || self.kill_overdue(&current) {
                    self.kill_instance_locked(term, current, "app no longer exists")
                        .await?;
                    report.orphans_killed += 1;
                }
            }
        }

        metrics::reconciliation_cycle_duration().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("apps", apps.len() as i64)],
        );
        if report.is_quiet() {
            debug!(apps = report.apps_checked, "No drift this cycle");
        } else {
            info!(
                apps = report.apps_checked,
                timers_fired = report.timers_fired,
                launched = report.instances_launched,
                killed = report.instances_killed,
                orphans_killed = report.orphans_killed,
                deployments_advanced = report.deployments_advanced,
                "🔄 RECONCILIATION: Drift corrected"
            );
        }
        Ok(report)
    }

    async fn reconcile_app(
        &self,
        term: &LeadershipTerm,
        app_id: &AppId,
        report: &mut ReconciliationReport,
    ) -> FleetResult<()> {
        let _guard = self.lock_app(app_id).await;
        self.ensure_active(term)?;

        let held = self.held_plans(app_id).await?;
        let frozen = held
            .iter()
            .any(|plan| plan.status == DeploymentStatus::Failed);
        if !frozen {
            report.instances_killed += self.collect_stragglers(term, app_id).await?;
        }
        let settled = self.settle_app(term, app_id).await?;
        if settled == Settled::Frozen {
            debug!(app_id = %app_id, "App held by a failed deployment; left as is");
        }
        report.absorb(settled);
        Ok(())
    }

    /// Remove lost instances, re-send unconfirmed kills and kill launches that
    /// never reported back.
    async fn collect_stragglers(&self, term: &LeadershipTerm, app_id: &AppId) -> FleetResult<usize> {
        let now = self.clock.now();
        let mut killed = 0;
        for instance in self.repo.instances_for(app_id).await? {
            let reason = match instance.condition {
                Condition::Lost => "task lost",
                Condition::Killing if self.kill_overdue(&instance) => "kill not confirmed",
                Condition::Staged if now - instance.staged_at >= self.config.launch_timeout() => {
                    "launch timed out"
                }
                _ => continue,
            };
            self.kill_instance_locked(term, instance, reason).await?;
            killed += 1;
        }
        Ok(killed)
    }

    fn kill_overdue(&self, instance: &Instance) -> bool {
        self.clock.now() - instance.condition_since >= self.config.kill_retry()
    }

    /// Let the App's in-progress plan react to a change or, when no plan holds
    /// the App, correct drift towards its latest version. Callers hold the
    /// App's lock.
    pub(crate) async fn settle_app(&self, term: &LeadershipTerm, app_id: &AppId) -> FleetResult<Settled> {
        let held = self.held_plans(app_id).await?;
        if let Some(plan) = held
            .iter()
            .find(|plan| plan.status == DeploymentStatus::InProgress)
        {
            self.advance_plan(term, plan.clone()).await?;
            return Ok(Settled::Advanced);
        }
        if !held.is_empty() {
            return Ok(Settled::Frozen);
        }
        let Some(app) = self.repo.app(app_id).await? else {
            return Ok(Settled::Absent);
        };
        let outcome = self
            .converge(term, &app, DeploymentActionKind::ScaleApplication)
            .await?;
        Ok(Settled::Converged(outcome))
    }

    /// Fire every unreachable timer due by now. Returns how many changed an
    /// instance. On error the entries not yet handled go back on the queue
    /// for the next cycle.
    async fn fire_due_timers(&self, term: &LeadershipTerm) -> FleetResult<usize> {
        let mut pending = self.timers.lock().pop_due(self.clock.now()).into_iter();
        let mut fired = 0;
        while let Some(entry) = pending.next() {
            match self.fire_timer(term, &entry).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(error) => {
                    let mut timers = self.timers.lock();
                    let rearmed = std::iter::once(entry)
                        .chain(pending)
                        .filter(|entry| timers.arm(entry.clone()))
                        .count();
                    warn!(
                        error = %error,
                        rearmed = rearmed,
                        "⏰ UNREACHABLE: Timer batch interrupted, re-armed for next cycle"
                    );
                    return Err(error);
                }
            }
        }
        Ok(fired)
    }

    async fn fire_timer(&self, term: &LeadershipTerm, entry: &TimerEntry) -> FleetResult<bool> {
        let _guard = self.lock_app(&entry.app_id).await;
        self.ensure_active(term)?;

        let Some(mut instance) = self.repo.instance(&entry.instance_id).await? else {
            return Ok(false);
        };
        if instance.timer_generation != entry.generation {
            debug!(instance_id = %instance.id, "Stale unreachable timer ignored");
            return Ok(false);
        }

        let strategy = self.strategy_for(&instance.app_id).await?;
        let now: DateTime<Utc> = self.clock.now();
        let event = match UnreachableEvaluator::evaluate(&strategy, &instance, now) {
            UnreachableDecision::MarkInactive => InstanceEvent::MarkInactive,
            UnreachableDecision::Expunge => InstanceEvent::Expunge,
            UnreachableDecision::Wait | UnreachableDecision::NotUnreachable => return Ok(false),
        };

        self.transition(term, &mut instance, event, now).await?;
        if event == InstanceEvent::Expunge {
            metrics::instances_expunged_total().add(1, &[]);
        }
        info!(
            instance_id = %instance.id,
            condition = %instance.condition,
            "⏰ UNREACHABLE: Deadline reached"
        );
        self.settle_app(term, &instance.app_id).await?;
        Ok(true)
    }
}

/// Runs [`FleetOrchestrator::reconcile`] on an interval for one leadership term.
pub struct ReconciliationLoop {
    orchestrator: Arc<FleetOrchestrator>,
    term: LeadershipTerm,
    period: Duration,
}

impl ReconciliationLoop {
    pub fn new(orchestrator: Arc<FleetOrchestrator>, term: LeadershipTerm, period: Duration) -> Self {
        Self {
            orchestrator,
            term,
            period,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run until shutdown is signalled or the term is lost. A failed cycle is
    /// logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            term = %self.term,
            interval_ms = self.period.as_millis() as u64,
            "🔄 RECONCILIATION: Loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.orchestrator.reconcile(&self.term).await {
                Ok(_) => {}
                Err(e) if e.is_leadership_loss() => {
                    info!(term = %self.term, "Leadership lost; reconciliation loop exiting");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation cycle failed");
                }
            }
        }

        info!(term = %self.term, "🔄 RECONCILIATION: Loop stopped");
    }
}
