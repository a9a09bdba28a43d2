//! App and deployment API.
//!
//! Every mutation validates first, then takes the App's lock, re-checks the
//! leadership term and only then touches storage. Validation failures leave no
//! trace.

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::deployment::DeploymentPlanner;
use crate::error::{FleetError, FleetResult};
use crate::events::EventPayload;
use crate::leadership::LeadershipTerm;
use crate::logging::log_deployment_operation;
use crate::metrics;
use crate::models::app::AppDefinition;
use crate::models::deployment::{DeploymentPlan, DeploymentRef};
use crate::models::ids::{AppId, InstanceId};
use crate::models::instance::Instance;
use crate::orchestration::core::FleetOrchestrator;
use crate::orchestration::deployment::executor::step_info;
use opentelemetry::KeyValue;

impl FleetOrchestrator {
    /// Create a new App and start deploying it.
    #[instrument(skip(self, term, app), fields(app_id = %app.id))]
    pub async fn create_app(
        &self,
        term: &LeadershipTerm,
        app: AppDefinition,
    ) -> FleetResult<DeploymentRef> {
        app.validate()?;
        let _guard = self.lock_app(&app.id).await;
        self.ensure_active(term)?;

        if self.repo.app(&app.id).await?.is_some() {
            return Err(FleetError::Conflict(format!("App {} already exists", app.id)));
        }

        let now = self.clock.now();
        let app = app.stamped(None, self.next_version(None));
        let plan = DeploymentPlanner::compute(self.ids.deployment_id(), None, &app, now);

        self.ensure_active(term)?;
        self.repo.store_app_version(&app).await?;
        self.submit_plan(term, plan).await
    }

    /// Store a new version of an existing App and deploy it. Fails with
    /// `AppLocked` while another plan holds the App, unless `force` is set, in
    /// which case the holding plans are cancelled first.
    #[instrument(skip(self, term, app), fields(app_id = %app.id, force = force))]
    pub async fn update_app(
        &self,
        term: &LeadershipTerm,
        app: AppDefinition,
        force: bool,
    ) -> FleetResult<DeploymentRef> {
        app.validate()?;
        let _guard = self.lock_app(&app.id).await;
        self.ensure_active(term)?;

        let Some(current) = self.repo.app(&app.id).await? else {
            return Err(FleetError::not_found("App", &app.id));
        };
        self.release_held_plans(term, &app.id, force).await?;

        let now = self.clock.now();
        let app = app.stamped(Some(&current), self.next_version(Some(&current)));
        let plan = DeploymentPlanner::compute(self.ids.deployment_id(), Some(&current), &app, now);

        self.ensure_active(term)?;
        self.repo.store_app_version(&app).await?;
        if app.unreachable_strategy != current.unreachable_strategy {
            let resynced = self.resync_timers(&app.id).await?;
            debug!(app_id = %app.id, instances = resynced, "Unreachable timers follow new strategy");
        }
        self.submit_plan(term, plan).await
    }

    /// Stop every instance of an App; the App is removed once they are gone.
    #[instrument(skip(self, term), fields(app_id = %app_id, force = force))]
    pub async fn delete_app(
        &self,
        term: &LeadershipTerm,
        app_id: &AppId,
        force: bool,
    ) -> FleetResult<DeploymentRef> {
        let _guard = self.lock_app(app_id).await;
        self.ensure_active(term)?;

        let Some(current) = self.repo.app(app_id).await? else {
            return Err(FleetError::not_found("App", app_id));
        };
        self.release_held_plans(term, app_id, force).await?;

        let plan =
            DeploymentPlanner::compute_stop(self.ids.deployment_id(), &current, self.clock.now());
        self.submit_plan(term, plan).await
    }

    /// Kill one instance. With `scale` the App's desired count drops by one
    /// (stored as a new version, no deployment); without it a replacement is
    /// launched right away.
    #[instrument(skip(self, term), fields(instance_id = %instance_id, scale = scale))]
    pub async fn kill_instance(
        &self,
        term: &LeadershipTerm,
        instance_id: &InstanceId,
        scale: bool,
    ) -> FleetResult<Instance> {
        let Some(found) = self.repo.instance(instance_id).await? else {
            return Err(FleetError::not_found("Instance", instance_id));
        };
        let _guard = self.lock_app(&found.app_id).await;
        self.ensure_active(term)?;

        let Some(instance) = self.repo.instance(instance_id).await? else {
            return Err(FleetError::not_found("Instance", instance_id));
        };

        if scale {
            if let Some(current) = self.repo.app(&instance.app_id).await? {
                let scaled = current
                    .clone()
                    .with_instances(current.instances.saturating_sub(1))
                    .stamped(Some(&current), self.next_version(Some(&current)));
                self.ensure_active(term)?;
                self.repo.store_app_version(&scaled).await?;
                info!(
                    app_id = %scaled.id,
                    instances = scaled.instances,
                    "📉 APPS: Scaled down by instance kill"
                );
            }
        }

        let app_id = instance.app_id.clone();
        let killed = self
            .kill_instance_locked(term, instance, "killed by request")
            .await?;
        self.settle_app(term, &app_id).await?;
        Ok(killed)
    }

    /// Cancel a deployment without rolling back what it already did.
    #[instrument(skip(self, term), fields(deployment_id = %deployment_id))]
    pub async fn cancel_deployment(
        &self,
        term: &LeadershipTerm,
        deployment_id: Uuid,
    ) -> FleetResult<()> {
        let Some(found) = self.repo.deployment(deployment_id).await? else {
            return Err(FleetError::not_found("Deployment", deployment_id));
        };
        let _guard = self.lock_app(&found.app_id).await;
        self.ensure_active(term)?;

        let Some(plan) = self.repo.deployment(deployment_id).await? else {
            return Err(FleetError::not_found("Deployment", deployment_id));
        };
        self.cancel_plan_locked(term, plan, "cancelled by request", "cancelled")
            .await
    }

    pub async fn app(&self, app_id: &AppId) -> FleetResult<AppDefinition> {
        self.repo
            .app(app_id)
            .await?
            .ok_or_else(|| FleetError::not_found("App", app_id))
    }

    pub async fn apps(&self) -> FleetResult<Vec<AppDefinition>> {
        self.repo.apps().await
    }

    /// Every stored version of an App, oldest first.
    pub async fn app_versions(&self, app_id: &AppId) -> FleetResult<Vec<AppDefinition>> {
        let versions = self.repo.app_versions(app_id).await?;
        if versions.is_empty() {
            return Err(FleetError::not_found("App", app_id));
        }
        Ok(versions)
    }

    pub async fn instances(&self, app_id: &AppId) -> FleetResult<Vec<Instance>> {
        self.repo.instances_for(app_id).await
    }

    pub async fn instance(&self, instance_id: &InstanceId) -> FleetResult<Instance> {
        self.repo
            .instance(instance_id)
            .await?
            .ok_or_else(|| FleetError::not_found("Instance", instance_id))
    }

    /// Unfinished plans, oldest first. Failed plans stay listed until cancelled.
    pub async fn deployments(&self) -> FleetResult<Vec<DeploymentPlan>> {
        self.repo.deployments().await
    }

    pub async fn deployment(&self, deployment_id: Uuid) -> FleetResult<DeploymentPlan> {
        self.repo
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| FleetError::not_found("Deployment", deployment_id))
    }

    async fn release_held_plans(
        &self,
        term: &LeadershipTerm,
        app_id: &AppId,
        force: bool,
    ) -> FleetResult<()> {
        let held = self.held_plans(app_id).await?;
        if held.is_empty() {
            return Ok(());
        }
        if !force {
            return Err(FleetError::AppLocked {
                app_id: app_id.to_string(),
                deployments: held.iter().map(|plan| plan.id).collect(),
            });
        }
        for plan in held {
            self.cancel_plan_locked(term, plan, "superseded by forced deployment", "superseded")
                .await?;
        }
        Ok(())
    }

    async fn submit_plan(
        &self,
        term: &LeadershipTerm,
        plan: DeploymentPlan,
    ) -> FleetResult<DeploymentRef> {
        let reference = DeploymentRef {
            deployment_id: plan.id,
            version: plan.target.version,
        };
        let first_action = plan
            .actions()
            .first()
            .map(|action| action.action.to_string())
            .unwrap_or_else(|| "none".to_string());

        self.ensure_active(term)?;
        self.repo.store_deployment(&plan).await?;
        if plan.current().is_some() {
            self.publish(term, EventPayload::DeploymentInfo(step_info(&plan)))?;
        }

        metrics::deployments_started_total().add(1, &[KeyValue::new("action", first_action.clone())]);
        log_deployment_operation(
            "submitted",
            &plan.id.to_string(),
            plan.app_id.as_str(),
            Some(0),
            "in_progress",
            Some(&first_action),
        );

        self.advance_plan(term, plan).await?;
        Ok(reference)
    }
}
