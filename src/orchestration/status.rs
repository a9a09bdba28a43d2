//! Task status intake.
//!
//! Reports arrive from the cluster at least once and possibly out of order.
//! A report is applied only if it is newer than the last one applied to the
//! instance; an identical repeat is a duplicate and changes nothing. Reports
//! for tasks the orchestrator no longer tracks are answered with a kill.

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cluster::TaskStatusReport;
use crate::error::FleetResult;
use crate::events::{EventPayload, StatusUpdate};
use crate::leadership::LeadershipTerm;
use crate::metrics;
use crate::models::instance::{Instance, StatusStamp};
use crate::orchestration::core::FleetOrchestrator;
use crate::state_machine::{Condition, InstanceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReportOutcome {
    /// The report was newer than anything seen; `transitions` condition changes followed.
    Applied { transitions: usize },
    /// Same status and timestamp as the last applied report.
    Duplicate,
    /// Older than the last applied report.
    Stale,
    /// No live instance owns the task; a kill was sent unless it already ended.
    Orphan,
}

impl ReportOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
            Self::Orphan => "orphan",
        }
    }
}

impl FleetOrchestrator {
    /// Apply one task status report from the cluster.
    #[instrument(skip(self, term, report), fields(instance_id = %report.instance_id, status = %report.status))]
    pub async fn handle_task_status(
        &self,
        term: &LeadershipTerm,
        report: TaskStatusReport,
    ) -> FleetResult<ReportOutcome> {
        self.ensure_active(term)?;
        let outcome = self.apply_report(term, &report).await?;
        metrics::task_status_reports_total().add(
            1,
            &[
                KeyValue::new("status", report.status.as_str()),
                KeyValue::new("outcome", outcome.label()),
            ],
        );
        Ok(outcome)
    }

    async fn apply_report(
        &self,
        term: &LeadershipTerm,
        report: &TaskStatusReport,
    ) -> FleetResult<ReportOutcome> {
        let Some(known) = self.repo.instance(&report.instance_id).await? else {
            return self.reject_orphan(term, report, "unknown instance").await;
        };
        let _guard = self.lock_app(&known.app_id).await;
        self.ensure_active(term)?;

        let Some(mut instance) = self.repo.instance(&report.instance_id).await? else {
            return self.reject_orphan(term, report, "instance expunged").await;
        };
        if report.task_id != instance.task_id {
            return self.reject_orphan(term, report, "superseded task").await;
        }

        if let Some(last) = &instance.last_status {
            if report.timestamp < last.at {
                debug!(last = %last.at, reported = %report.timestamp, "Stale report ignored");
                return Ok(ReportOutcome::Stale);
            }
            if report.timestamp == last.at && report.status == last.status {
                return Ok(ReportOutcome::Duplicate);
            }
        }

        let previous = instance.condition;
        instance.last_status = Some(StatusStamp {
            task_id: report.task_id.clone(),
            status: report.status,
            at: report.timestamp,
        });

        self.ensure_active(term)?;
        self.publish(term, status_update(&instance, report))?;
        let changes = self
            .transition(
                term,
                &mut instance,
                InstanceEvent::Report(report.status),
                report.timestamp,
            )
            .await?;
        if changes.is_empty() {
            self.repo.store_instance(&instance).await?;
        }

        if previous.is_unreachable() && instance.condition == Condition::Running {
            self.discard_stand_ins(term, &instance).await?;
        }
        self.settle_app(term, &instance.app_id).await?;

        Ok(ReportOutcome::Applied {
            transitions: changes.len(),
        })
    }

    /// Kill a task nobody owns, unless the report says it is already gone.
    async fn reject_orphan(
        &self,
        term: &LeadershipTerm,
        report: &TaskStatusReport,
        reason: &'static str,
    ) -> FleetResult<ReportOutcome> {
        if report.status.is_terminal() {
            debug!(reason = reason, "Terminal report for untracked task ignored");
            return Ok(ReportOutcome::Orphan);
        }

        self.ensure_active(term)?;
        warn!(
            task_id = %report.task_id,
            agent_id = %report.agent_id,
            reason = reason,
            "🧹 STATUS: Killing orphan task"
        );
        if let Err(error) = self.cluster.kill(report.task_ref()).await {
            warn!(task_id = %report.task_id, error = %error, "Orphan kill failed");
        }
        Ok(ReportOutcome::Orphan)
    }

    /// An original came back: kill the stand-ins launched for it.
    async fn discard_stand_ins(&self, term: &LeadershipTerm, original: &Instance) -> FleetResult<()> {
        let stand_ins: Vec<Instance> = self
            .repo
            .instances_for(&original.app_id)
            .await?
            .into_iter()
            .filter(|instance| {
                instance.replaces.as_ref() == Some(&original.id)
                    && instance.condition != Condition::Killing
            })
            .collect();

        for stand_in in stand_ins {
            self.kill_instance_locked(term, stand_in, "original instance recovered")
                .await?;
        }
        Ok(())
    }
}

fn status_update(instance: &Instance, report: &TaskStatusReport) -> EventPayload {
    EventPayload::StatusUpdate(StatusUpdate {
        app_id: instance.app_id.clone(),
        instance_id: instance.id.clone(),
        task_id: report.task_id.clone(),
        task_status: report.status,
        agent_id: report.agent_id.clone(),
        host: report.hostname.clone(),
        version: instance.run_spec_version,
        message: report.message.clone(),
    })
}
