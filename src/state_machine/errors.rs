use crate::error::FleetError;
use thiserror::Error;

use super::states::Condition;

/// Error types for instance state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: Condition, event: String },

    #[error("Instance is in terminal condition {condition}")]
    TerminalCondition { condition: Condition },

    #[error("Illegal edge {from} -> {to}")]
    IllegalEdge { from: Condition, to: Condition },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl From<StateMachineError> for FleetError {
    fn from(err: StateMachineError) -> Self {
        FleetError::StateTransition(format!("{err}"))
    }
}
