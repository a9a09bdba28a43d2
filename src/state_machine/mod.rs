// State machine module for instance lifecycle management
//
// Pure transition logic: conditions, the inputs that move them, and the graph
// that constrains which edges exist. Persistence and event publication happen
// in the orchestration layer.

pub mod errors;
pub mod events;
pub mod instance_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{InstanceEvent, TaskStatus};
pub use instance_state_machine::{ConditionChange, InstanceStateMachine};
pub use states::Condition;
