//! [`Repository`] wrapper that injects one-shot faults into chosen calls.
//!
//! Faults model a store that errors on one write, or a leader whose lease
//! runs out while a write is in flight. Every armed fault fires once, on the
//! first matching call, and everything else goes straight to the wrapped
//! [`InMemoryRepository`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};
use crate::leadership::{LeaderElection, LeadershipTerm};
use crate::models::app::AppDefinition;
use crate::models::deployment::{DeploymentPlan, DeploymentStatus};
use crate::models::ids::{AppId, InstanceId};
use crate::models::instance::Instance;
use crate::storage::{InMemoryRepository, Repository};

/// Calls a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOp {
    Instance,
    StoreInstance,
    /// Storing a plan with this status.
    StoreDeployment(DeploymentStatus),
    DeleteDeployment,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Return a storage error without touching the store.
    Fail,
    /// Resign `term`, then perform the call.
    LoseTerm(LeadershipTerm),
}

#[derive(Debug)]
pub struct FaultyRepository {
    inner: InMemoryRepository,
    election: Arc<dyn LeaderElection>,
    faults: Mutex<Vec<(RepositoryOp, Fault)>>,
}

impl FaultyRepository {
    pub fn new(election: Arc<dyn LeaderElection>) -> Self {
        Self {
            inner: InMemoryRepository::new(),
            election,
            faults: Mutex::new(Vec::new()),
        }
    }

    pub fn arm(&self, op: RepositoryOp, fault: Fault) {
        self.faults.lock().push((op, fault));
    }

    /// Faults armed but not yet fired.
    pub fn armed(&self) -> usize {
        self.faults.lock().len()
    }

    async fn trip(&self, op: RepositoryOp) -> FleetResult<()> {
        let fault = {
            let mut faults = self.faults.lock();
            let position = faults.iter().position(|(armed, _)| *armed == op);
            position.map(|index| faults.remove(index).1)
        };
        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(FleetError::Storage(format!("injected failure on {op:?}"))),
            Some(Fault::LoseTerm(term)) => self.election.resign(&term).await,
        }
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn store_app_version(&self, app: &AppDefinition) -> FleetResult<()> {
        self.inner.store_app_version(app).await
    }

    async fn app(&self, id: &AppId) -> FleetResult<Option<AppDefinition>> {
        self.inner.app(id).await
    }

    async fn app_versions(&self, id: &AppId) -> FleetResult<Vec<AppDefinition>> {
        self.inner.app_versions(id).await
    }

    async fn apps(&self) -> FleetResult<Vec<AppDefinition>> {
        self.inner.apps().await
    }

    async fn delete_app(&self, id: &AppId) -> FleetResult<()> {
        self.inner.delete_app(id).await
    }

    async fn store_instance(&self, instance: &Instance) -> FleetResult<()> {
        self.trip(RepositoryOp::StoreInstance).await?;
        self.inner.store_instance(instance).await
    }

    async fn instance(&self, id: &InstanceId) -> FleetResult<Option<Instance>> {
        self.trip(RepositoryOp::Instance).await?;
        self.inner.instance(id).await
    }

    async fn instances_for(&self, app_id: &AppId) -> FleetResult<Vec<Instance>> {
        self.inner.instances_for(app_id).await
    }

    async fn all_instances(&self) -> FleetResult<Vec<Instance>> {
        self.inner.all_instances().await
    }

    async fn expunge_instance(&self, id: &InstanceId) -> FleetResult<()> {
        self.inner.expunge_instance(id).await
    }

    async fn is_expunged(&self, id: &InstanceId) -> FleetResult<bool> {
        self.inner.is_expunged(id).await
    }

    async fn store_deployment(&self, plan: &DeploymentPlan) -> FleetResult<()> {
        self.trip(RepositoryOp::StoreDeployment(plan.status)).await?;
        self.inner.store_deployment(plan).await
    }

    async fn deployment(&self, id: Uuid) -> FleetResult<Option<DeploymentPlan>> {
        self.inner.deployment(id).await
    }

    async fn deployments(&self) -> FleetResult<Vec<DeploymentPlan>> {
        self.inner.deployments().await
    }

    async fn delete_deployment(&self, id: Uuid) -> FleetResult<()> {
        self.trip(RepositoryOp::DeleteDeployment).await?;
        self.inner.delete_deployment(id).await
    }
}
