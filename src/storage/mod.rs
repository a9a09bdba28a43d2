//! # Storage
//!
//! Durable state the orchestrator reloads when it takes leadership: every App
//! version, every live Instance, and every unfinished DeploymentPlan. The
//! storage technology is left to implementors of [`Repository`]; the crate
//! ships [`InMemoryRepository`], which several orchestrator processes in one
//! test can share to model a common store.
//!
//! Instances that reach a terminal condition are expunged: removed from the
//! live set and remembered as tombstones so their ids are never reused and
//! late reports for them are recognised.

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::error::FleetResult;
use crate::models::app::AppDefinition;
use crate::models::deployment::DeploymentPlan;
use crate::models::ids::{AppId, InstanceId};
use crate::models::instance::Instance;

pub mod memory;

pub use memory::InMemoryRepository;

#[async_trait]
pub trait Repository: Send + Sync + fmt::Debug {
    /// Append a new App version. Versions are kept in the order stored.
    async fn store_app_version(&self, app: &AppDefinition) -> FleetResult<()>;

    /// Latest version of an App.
    async fn app(&self, id: &AppId) -> FleetResult<Option<AppDefinition>>;

    /// Every stored version of an App, oldest first.
    async fn app_versions(&self, id: &AppId) -> FleetResult<Vec<AppDefinition>>;

    /// Latest version of every App, ordered by id.
    async fn apps(&self) -> FleetResult<Vec<AppDefinition>>;

    /// Remove an App and its history.
    async fn delete_app(&self, id: &AppId) -> FleetResult<()>;

    async fn store_instance(&self, instance: &Instance) -> FleetResult<()>;

    async fn instance(&self, id: &InstanceId) -> FleetResult<Option<Instance>>;

    /// Live instances of an App, oldest first.
    async fn instances_for(&self, app_id: &AppId) -> FleetResult<Vec<Instance>>;

    /// Live instances of every App, oldest first.
    async fn all_instances(&self) -> FleetResult<Vec<Instance>>;

    /// Remove an instance permanently and tombstone its id.
    async fn expunge_instance(&self, id: &InstanceId) -> FleetResult<()>;

    async fn is_expunged(&self, id: &InstanceId) -> FleetResult<bool>;

    async fn store_deployment(&self, plan: &DeploymentPlan) -> FleetResult<()>;

    async fn deployment(&self, id: Uuid) -> FleetResult<Option<DeploymentPlan>>;

    /// Stored plans, oldest first.
    async fn deployments(&self) -> FleetResult<Vec<DeploymentPlan>>;

    async fn delete_deployment(&self, id: Uuid) -> FleetResult<()>;
}
