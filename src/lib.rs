#![allow(clippy::doc_markdown)] // Allow technical terms like UnreachableInactive in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleet Core
//!
//! Instance lifecycle and deployment reconciliation core for a cluster
//! orchestrator that keeps long-running Apps at their desired instance count.
//!
//! ## Overview
//!
//! Operators declare Apps (command, resources, instance count, health checks,
//! constraints, upgrade and unreachable strategies). The core launches task
//! instances on cluster agents, tracks every instance through a strict
//! lifecycle driven by task status reports, rolls out new App versions without
//! dropping below the configured healthy capacity, and tolerates agents that
//! stop reporting.
//!
//! ## Architecture
//!
//! - **Single writer**: exactly one elected process mutates state; every
//!   mutation carries its [`leadership::LeadershipTerm`] and is re-checked
//!   against the election before it takes effect.
//! - **Resumable**: App versions, instances and deployment plans live in a
//!   [`storage::Repository`]; a new leader reloads them and continues.
//! - **Deterministic**: time comes from an injected [`clock::Clock`], so a
//!   recorded history replays to the same sequence of events.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Instance conditions and the transition graph
//! - [`unreachable`] - Unreachable strategy evaluation and its timers
//! - [`orchestration`] - The orchestrator: API, status intake, deployments, reconciliation
//! - [`leadership`] - Terms, election and the leadership coordinator
//! - [`events`] - Versioned lifecycle events and their publisher
//! - [`models`] - Apps, instances and deployment plans
//! - [`cluster`] - The cluster driver boundary and agent placement
//! - [`storage`] - Durable state behind a repository trait
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_core::test_helpers::{app, TestFleet};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fleet = TestFleet::start().await?;
//! let web = app("/web", 2);
//! fleet.orchestrator.create_app(&fleet.term, web).await?;
//! fleet.deliver().await?;
//! assert!(fleet.orchestrator.deployments().await?.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod leadership;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;
pub mod test_helpers;
pub mod unreachable;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{ClusterDriver, LaunchRequest, TaskRef, TaskStatusReport};
pub use config::{ConfigManager, FleetConfig};
pub use error::{FleetError, FleetResult};
pub use events::{EventPayload, EventPublisher, FleetEvent};
pub use leadership::{
    CoordinatorState, InMemoryElection, LeaderElection, LeaderInfo, LeadershipCoordinator,
    LeadershipTerm,
};
pub use models::{AppDefinition, AppId, DeploymentPlan, Instance, InstanceId};
pub use orchestration::{FleetContext, FleetOrchestrator, ReconciliationReport, ReportOutcome};
pub use state_machine::{Condition, InstanceStateMachine, TaskStatus};
pub use storage::{InMemoryRepository, Repository};
