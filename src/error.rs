//! Error types for the fleet orchestrator core.
//!
//! Every fallible operation in the crate returns [`FleetResult`]. Component-level
//! error enums (state machine, event publishing, configuration loading) convert
//! into [`FleetError`] so the mutation path can propagate them with `?`.
//!
//! The taxonomy follows how each failure is handled:
//!
//! - **Configuration / Validation**: rejected synchronously at the boundary,
//!   never partially applied.
//! - **TransientCluster**: cluster-side hiccups, absorbed internally and retried
//!   on the next reconciliation cycle.
//! - **DeploymentStuck**: a deployment step could not make progress before its
//!   deadline; surfaced through deployment status.
//! - **LeadershipLost**: the caller's term is no longer valid; the operation
//!   aborts without side effects. This is a handoff, not a client error.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transient cluster error: {0}")]
    TransientCluster(String),
    #[error("Deployment {deployment_id} is stuck: {reason}")]
    DeploymentStuck { deployment_id: Uuid, reason: String },
    #[error("Leadership lost (term epoch {epoch})")]
    LeadershipLost { epoch: u64 },
    #[error("Not the active leader")]
    NotLeader,
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("App {app_id} is locked by deployment(s) {deployments:?}")]
    AppLocked {
        app_id: String,
        deployments: Vec<Uuid>,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Event error: {0}")]
    Event(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True when the error means this process must stop acting as leader.
    pub fn is_leadership_loss(&self) -> bool {
        matches!(self, Self::LeadershipLost { .. } | Self::NotLeader)
    }

    /// True when the same operation may succeed on a later reconciliation cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientCluster(_) | Self::Storage(_))
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(error: serde_json::Error) -> Self {
        FleetError::Event(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for FleetError {
    fn from(error: config::ConfigError) -> Self {
        FleetError::Configuration(error.to_string())
    }
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;
