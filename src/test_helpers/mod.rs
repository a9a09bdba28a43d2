// Test helpers - in-process fleet infrastructure
//
// A simulated cluster and a leader-elected orchestrator around it, shared by
// unit tests, the integration suite under tests/ and the benchmarks.

pub mod faulty_repository;
pub mod fleet_harness;
pub mod simulated_cluster;

pub use faulty_repository::{Fault, FaultyRepository, RepositoryOp};
pub use fleet_harness::{agents, app, event_types, test_config, TestFleet};
pub use simulated_cluster::SimulatedCluster;
