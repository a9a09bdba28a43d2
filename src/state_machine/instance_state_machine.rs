//! # Instance State Machine
//!
//! Pure transition logic for instance conditions. No I/O: callers persist the
//! mutated [`Instance`] and publish one `instance_changed_event` per returned
//! [`ConditionChange`].
//!
//! ```text
//! Staged -> Starting -> Running -> Killing -> Killed
//!    |          |          |
//!    |          |          +-> Unreachable -> UnreachableInactive -> Running | Killed
//!    |          |          |        |
//!    |          |          |        +-> Running | Killed
//!    |          |          +-> Lost -> Killed
//!    +----------+----------+-> Failed
//! ```
//!
//! When a report implies a condition more than one edge away (e.g. the first
//! report for a staged instance is `TASK_RUNNING`), the machine walks every
//! intermediate condition so observers never see a skipped edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::{InstanceEvent, TaskStatus};
use super::states::Condition;
use crate::models::instance::{HealthState, Instance};

/// One edge taken by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionChange {
    pub from: Condition,
    pub to: Condition,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceStateMachine;

impl InstanceStateMachine {
    /// Check whether `from -> to` is an edge of the lifecycle graph
    pub fn is_valid_edge(from: Condition, to: Condition) -> bool {
        use Condition::*;

        matches!(
            (from, to),
            (Staged, Starting)
                | (Staged, Killing)
                | (Staged, Failed)
                | (Starting, Running)
                | (Starting, Killing)
                | (Starting, Failed)
                | (Running, Killing)
                | (Running, Unreachable)
                | (Running, Lost)
                | (Running, Failed)
                | (Killing, Killed)
                | (Unreachable, UnreachableInactive)
                | (Unreachable, Running)
                | (Unreachable, Killed)
                | (UnreachableInactive, Running)
                | (UnreachableInactive, Killed)
                | (Lost, Killed)
        )
    }

    /// Conditions the instance passes through when `event` is applied in
    /// `current`. An empty path means the event changes nothing.
    pub fn path(current: Condition, event: InstanceEvent) -> StateMachineResult<Vec<Condition>> {
        use Condition::*;

        if current.is_terminal() {
            return Ok(Vec::new());
        }

        let path = match (current, event) {
            (_, InstanceEvent::Report(status)) => Self::path_for_report(current, status),
            (Killed | Failed, _) => Vec::new(),

            (Staged | Starting | Running, InstanceEvent::Kill) => vec![Killing],
            (Killing, InstanceEvent::Kill) => Vec::new(),
            (Unreachable | UnreachableInactive | Lost, InstanceEvent::Kill) => vec![Killed],

            (Unreachable, InstanceEvent::MarkInactive) => vec![UnreachableInactive],
            (UnreachableInactive, InstanceEvent::MarkInactive) => Vec::new(),
            (from, InstanceEvent::MarkInactive) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: InstanceEvent::MarkInactive.event_type().to_string(),
                })
            }

            (Staged | Starting | Running, InstanceEvent::Expunge) => vec![Killing, Killed],
            (_, InstanceEvent::Expunge) => vec![Killed],
        };

        Ok(path)
    }

    fn path_for_report(current: Condition, status: TaskStatus) -> Vec<Condition> {
        use Condition::*;
        use TaskStatus as S;

        match (current, status) {
            (Staged, S::Staging) => Vec::new(),
            (Staged, S::Starting) => vec![Starting],
            (Staged, S::Running) => vec![Starting, Running],
            (Starting, S::Staging | S::Starting) => Vec::new(),
            (Starting, S::Running) => vec![Running],
            // An instance that never ran has no slot worth waiting for.
            (Staged | Starting, S::Unreachable | S::Lost | S::Failed) => vec![Failed],
            (Staged | Starting | Running, S::Killed) => vec![Killing, Killed],

            (Running, S::Staging | S::Starting | S::Running) => Vec::new(),
            (Running, S::Unreachable) => vec![Unreachable],
            (Running, S::Lost) => vec![Lost],
            (Running, S::Failed) => vec![Failed],

            (Killing, S::Killed | S::Lost | S::Failed | S::Unreachable) => vec![Killed],
            (Killing, _) => Vec::new(),

            (Unreachable | UnreachableInactive, S::Running) => vec![Running],
            (Unreachable | UnreachableInactive, S::Killed | S::Lost | S::Failed) => vec![Killed],
            (Unreachable | UnreachableInactive, _) => Vec::new(),

            (Lost, S::Killed | S::Lost | S::Failed) => vec![Killed],
            (Lost, _) => Vec::new(),

            (Killed | Failed, _) => Vec::new(),
        }
    }

    /// Apply `event` to `instance` at time `at`, updating lifecycle bookkeeping.
    pub fn apply(
        instance: &mut Instance,
        event: InstanceEvent,
        at: DateTime<Utc>,
    ) -> StateMachineResult<Vec<ConditionChange>> {
        let path = Self::path(instance.condition, event)?;
        let mut changes = Vec::with_capacity(path.len());

        for to in path {
            let from = instance.condition;
            if !Self::is_valid_edge(from, to) {
                return Err(StateMachineError::IllegalEdge { from, to });
            }

            if from.is_unreachable() {
                instance.timer_generation += 1;
            }
            match to {
                Condition::Running => {
                    if from.is_unreachable() {
                        instance.unreachable_since = None;
                    } else {
                        instance.started_at = Some(at);
                        instance.health = HealthState::Unknown;
                        instance.consecutive_health_failures = 0;
                    }
                }
                Condition::Unreachable => {
                    instance.unreachable_since = Some(at);
                    instance.timer_generation += 1;
                }
                _ => {}
            }

            instance.condition = to;
            instance.condition_since = at;
            changes.push(ConditionChange { from, to, at });
        }

        Ok(changes)
    }
}
