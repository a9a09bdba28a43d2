pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{EventPublisher, EventPublisherConfig, EventPublisherStats, PublishError};
pub use types::{
    constants, DeploymentFailed, DeploymentStepInfo, DeploymentSuccess, EventPayload, FleetEvent,
    HealthStatusChanged, InstanceChanged, PlanSummary, StatusUpdate, SCHEMA_VERSION,
};
