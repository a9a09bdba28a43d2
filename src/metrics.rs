//! # Orchestrator Metrics
//!
//! OpenTelemetry instruments for the lifecycle and deployment core. Without a
//! configured meter provider these are no-ops, so recording is always safe.
//!
//! ## Usage
//!
//! ```rust
//! use fleet_core::metrics;
//! use opentelemetry::KeyValue;
//!
//! metrics::task_status_reports_total().add(1, &[KeyValue::new("status", "TASK_RUNNING")]);
//! metrics::reconciliation_cycle_duration().record(1.5, &[]);
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

/// Lazy-initialized meter for orchestrator metrics
static FLEET_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    FLEET_METER.get_or_init(|| opentelemetry::global::meter("fleet-orchestrator"))
}

// Counters

/// Task status reports received.
///
/// Labels:
/// - status: wire status (`TASK_RUNNING`, ...)
/// - outcome: applied, stale, orphan
pub fn task_status_reports_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.task_status.reports.total")
        .with_description("Task status reports received from the cluster")
        .build()
}

/// Instance condition transitions.
///
/// Labels:
/// - from, to: condition names
pub fn instance_transitions_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.instances.transitions.total")
        .with_description("Instance condition transitions applied")
        .build()
}

/// Instances launched.
///
/// Labels:
/// - reason: deployment, replacement, reconciliation
pub fn instances_launched_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.instances.launched.total")
        .with_description("Instances launched")
        .build()
}

/// Unreachable instances expunged by their strategy.
pub fn instances_expunged_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.instances.expunged.total")
        .with_description("Unreachable instances expunged")
        .build()
}

/// Deployments started, by first action.
pub fn deployments_started_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.deployments.started.total")
        .with_description("Deployment plans submitted")
        .build()
}

pub fn deployments_succeeded_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.deployments.succeeded.total")
        .with_description("Deployment plans completed successfully")
        .build()
}

/// Labels:
/// - reason: step_timeout, cancelled, superseded
pub fn deployments_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.deployments.failed.total")
        .with_description("Deployment plans failed or cancelled")
        .build()
}

/// Labels:
/// - transition: acquired, relinquished
pub fn leadership_transitions_total() -> Counter<u64> {
    meter()
        .u64_counter("fleet.leadership.transitions.total")
        .with_description("Leadership acquisitions and relinquishments")
        .build()
}

// Histograms

/// Reconciliation cycle duration in milliseconds.
pub fn reconciliation_cycle_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("fleet.reconciliation.cycle.duration")
        .with_description("Reconciliation cycle duration in milliseconds")
        .with_unit("ms")
        .build()
}
