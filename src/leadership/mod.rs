//! # Leadership
//!
//! Exactly one process may mutate desired or observed state at a time. That
//! process holds a [`LeadershipTerm`], minted by a [`LeaderElection`], and
//! passes it into every mutation; the [`LeadershipCoordinator`] drives the
//! `Standby -> Active -> Abdicated -> Standby` cycle around the orchestrator.

pub mod coordinator;
pub mod election;
pub mod term;

pub use coordinator::{CoordinatorState, LeadershipCoordinator};
pub use election::{InMemoryElection, LeaderElection};
pub use term::{LeaderInfo, LeadershipTerm};
