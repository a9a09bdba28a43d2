//! # Deployments
//!
//! Planning ([`DeploymentPlanner`]), the capacity arithmetic each step runs on
//! ([`capacity`]), and the executor that drives a plan to completion.

pub mod capacity;
pub mod executor;
pub mod plan;

pub use capacity::StepDecision;
pub use executor::{ConvergeOutcome, PlanProgress};
pub use plan::DeploymentPlanner;
