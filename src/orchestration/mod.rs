//! # Orchestration Engine
//!
//! The [`FleetOrchestrator`] owns every mutation of apps, instances and
//! deployments while its process holds leadership.
//!
//! ## Core Components
//!
//! - **core**: wiring, term checks, per-App locking, and the launch, kill and
//!   transition primitives everything else is built from
//! - **apps**: create, update, delete and scale Apps; kill instances; cancel
//!   deployments
//! - **status**: ordered, idempotent intake of task status reports
//! - **health**: health check verdicts and health-driven kills
//! - **deployment**: plan computation and the step executor
//! - **reconciliation**: unreachable timers, drift correction and the
//!   background loop

pub mod apps;
pub mod core;
pub mod deployment;
pub mod health;
pub mod reconciliation;
pub mod status;

pub use self::core::{FleetContext, FleetOrchestrator};
pub use deployment::{DeploymentPlanner, PlanProgress};
pub use reconciliation::{ReconciliationLoop, ReconciliationReport};
pub use status::ReportOutcome;
