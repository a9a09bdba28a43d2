pub mod app;
pub mod deployment;
pub mod ids;
pub mod instance;

// Re-export core models for easy access
pub use app::{
    AppDefinition, Constraint, ConstraintOperator, HealthCheck, HealthCheckProtocol,
    PortDefinition, UnreachableStrategy, UpgradeStrategy, VersionInfo,
};
pub use deployment::{
    DeploymentAction, DeploymentActionKind, DeploymentPlan, DeploymentRef, DeploymentStatus,
    DeploymentStep,
};
pub use ids::{
    AgentId, AppId, IdGenerator, InstanceId, SequentialIdGenerator, TaskId, UuidIdGenerator,
};
pub use instance::{AgentInfo, HealthState, Instance, StatusStamp};
