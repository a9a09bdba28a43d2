use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::Repository;
use crate::error::FleetResult;
use crate::models::app::AppDefinition;
use crate::models::deployment::DeploymentPlan;
use crate::models::ids::{AppId, InstanceId};
use crate::models::instance::Instance;

/// Process-local [`Repository`] backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    app_versions: DashMap<AppId, Vec<AppDefinition>>,
    instances: DashMap<InstanceId, Instance>,
    expunged: DashSet<InstanceId>,
    deployments: DashMap<Uuid, DeploymentPlan>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

fn oldest_first(instances: &mut [Instance]) {
    instances.sort_by(|a, b| {
        a.staged_at
            .cmp(&b.staged_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn store_app_version(&self, app: &AppDefinition) -> FleetResult<()> {
        self.app_versions
            .entry(app.id.clone())
            .or_default()
            .push(app.clone());
        Ok(())
    }

    async fn app(&self, id: &AppId) -> FleetResult<Option<AppDefinition>> {
        Ok(self
            .app_versions
            .get(id)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn app_versions(&self, id: &AppId) -> FleetResult<Vec<AppDefinition>> {
        Ok(self
            .app_versions
            .get(id)
            .map(|versions| versions.clone())
            .unwrap_or_default())
    }

    async fn apps(&self) -> FleetResult<Vec<AppDefinition>> {
        let mut apps: Vec<AppDefinition> = self
            .app_versions
            .iter()
            .filter_map(|entry| entry.value().last().cloned())
            .collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(apps)
    }

    async fn delete_app(&self, id: &AppId) -> FleetResult<()> {
        self.app_versions.remove(id);
        Ok(())
    }

    async fn store_instance(&self, instance: &Instance) -> FleetResult<()> {
        self.instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn instance(&self, id: &InstanceId) -> FleetResult<Option<Instance>> {
        Ok(self.instances.get(id).map(|entry| entry.value().clone()))
    }

    async fn instances_for(&self, app_id: &AppId) -> FleetResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self
            .instances
            .iter()
            .filter(|entry| &entry.value().app_id == app_id)
            .map(|entry| entry.value().clone())
            .collect();
        oldest_first(&mut instances);
        Ok(instances)
    }

    async fn all_instances(&self) -> FleetResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        oldest_first(&mut instances);
        Ok(instances)
    }

    async fn expunge_instance(&self, id: &InstanceId) -> FleetResult<()> {
        self.instances.remove(id);
        self.expunged.insert(id.clone());
        Ok(())
    }

    async fn is_expunged(&self, id: &InstanceId) -> FleetResult<bool> {
        Ok(self.expunged.contains(id))
    }

    async fn store_deployment(&self, plan: &DeploymentPlan) -> FleetResult<()> {
        self.deployments.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn deployment(&self, id: Uuid) -> FleetResult<Option<DeploymentPlan>> {
        Ok(self.deployments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn deployments(&self) -> FleetResult<Vec<DeploymentPlan>> {
        let mut plans: Vec<DeploymentPlan> = self
            .deployments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(plans)
    }

    async fn delete_deployment(&self, id: Uuid) -> FleetResult<()> {
        self.deployments.remove(&id);
        Ok(())
    }
}
