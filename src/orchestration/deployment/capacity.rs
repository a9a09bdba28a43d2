//! Capacity arithmetic for deployment steps.
//!
//! Each function looks at the current instances of one App and returns what to
//! do next: which instances to kill, how many to launch, and whether the step
//! has converged. They are pure so the executor can re-evaluate them after
//! every report without holding any extra state.

use std::cmp::Reverse;

use crate::models::app::AppDefinition;
use crate::models::ids::InstanceId;
use crate::models::instance::{HealthState, Instance};
use crate::state_machine::Condition;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDecision {
    pub kill: Vec<InstanceId>,
    pub start: usize,
    pub complete: bool,
}

impl StepDecision {
    pub fn is_noop(&self) -> bool {
        self.kill.is_empty() && self.start == 0
    }

    fn done() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }
}

/// Bring the App to exactly `target.instances` slot-occupying instances.
pub fn scale_decision(target: &AppDefinition, instances: &[Instance]) -> StepDecision {
    let desired = target.instances as usize;
    let has_health_checks = target.has_health_checks();
    let counted: Vec<&Instance> = instances
        .iter()
        .filter(|instance| instance.condition.occupies_slot())
        .collect();

    let mut decision = StepDecision::default();
    if counted.len() > desired {
        decision.kill = kill_order(&counted, instances, has_health_checks)
            .into_iter()
            .take(counted.len() - desired)
            .map(|instance| instance.id.clone())
            .collect();
    } else if counted.len() < desired {
        let alive = instances
            .iter()
            .filter(|instance| instance.condition.consumes_capacity())
            .count();
        let max_capacity = target.maximum_capacity().max(desired);
        let room = max_capacity.saturating_sub(alive);
        decision.start = (desired - counted.len()).min(room);
    }

    let ready = counted
        .iter()
        .filter(|instance| instance.is_ready(has_health_checks))
        .count();
    let killing = instances
        .iter()
        .any(|instance| instance.condition == Condition::Killing);
    decision.complete =
        decision.is_noop() && counted.len() == desired && ready == desired && !killing;
    decision
}

/// Replace every instance whose config differs from `target`, keeping at least
/// `minimum_healthy` instances ready and never exceeding `maximum_capacity`.
pub fn restart_decision(target: &AppDefinition, instances: &[Instance]) -> StepDecision {
    let desired = target.instances as usize;
    let has_health_checks = target.has_health_checks();

    let mut old: Vec<&Instance> = instances
        .iter()
        .filter(|instance| {
            !instance.matches_config(target) && instance.condition != Condition::Killing
        })
        .collect();
    old.sort_by_key(|instance| (instance.staged_at, instance.id.clone()));
    let new: Vec<&Instance> = instances
        .iter()
        .filter(|instance| instance.matches_config(target) && instance.condition.occupies_slot())
        .collect();

    let (old_ready, old_not_ready): (Vec<&Instance>, Vec<&Instance>) =
        old.iter().copied().partition(|instance| {
            instance.condition == Condition::Running && instance.health != HealthState::Unhealthy
        });
    let new_ready = new
        .iter()
        .filter(|instance| instance.is_ready(has_health_checks))
        .count();
    let alive = instances
        .iter()
        .filter(|instance| instance.condition.consumes_capacity())
        .count();

    let minimum_healthy = target.minimum_healthy();
    let mut maximum_capacity = target.maximum_capacity();
    // With no headroom at all the restart could never start a new instance.
    if maximum_capacity == minimum_healthy && maximum_capacity <= alive {
        maximum_capacity += 1;
    }

    let killable_ready = (old_ready.len() + new_ready).saturating_sub(minimum_healthy);
    let kill: Vec<&Instance> = old_not_ready
        .iter()
        .copied()
        .chain(old_ready.iter().copied().take(killable_ready))
        .collect();

    // Unreachable instances go straight to Killed and free their capacity now.
    let freed = kill
        .iter()
        .filter(|instance| instance.condition == Condition::Unreachable)
        .count();
    let room = maximum_capacity.saturating_sub(alive - freed);
    let start = desired.saturating_sub(new.len()).min(room);

    let killing = instances
        .iter()
        .any(|instance| instance.condition == Condition::Killing);
    let complete = old.is_empty() && !killing && new.len() == desired && new_ready == desired;

    StepDecision {
        kill: kill.into_iter().map(|instance| instance.id.clone()).collect(),
        start,
        complete,
    }
}

/// Kill everything; done once no instance is left.
pub fn stop_decision(instances: &[Instance]) -> StepDecision {
    if instances.is_empty() {
        return StepDecision::done();
    }
    StepDecision {
        kill: instances
            .iter()
            .filter(|instance| instance.condition != Condition::Killing)
            .map(|instance| instance.id.clone())
            .collect(),
        start: 0,
        complete: false,
    }
}

/// Order in which surplus instances are killed when scaling down: stand-ins
/// whose original came back, then unreachable, staged, starting, unready
/// running, and finally the newest ready running instances.
pub fn kill_order<'a>(
    candidates: &[&'a Instance],
    all: &[Instance],
    has_health_checks: bool,
) -> Vec<&'a Instance> {
    let mut ordered = candidates.to_vec();
    ordered.sort_by_key(|instance| {
        let rank = if original_recovered(instance, all) {
            0
        } else {
            match instance.condition {
                Condition::Unreachable | Condition::UnreachableInactive => 1,
                Condition::Staged => 2,
                Condition::Starting => 3,
                Condition::Running if !instance.is_ready(has_health_checks) => 4,
                _ => 5,
            }
        };
        (rank, Reverse(instance.staged_at), Reverse(instance.id.clone()))
    });
    ordered
}

/// Inactive unreachable instances nobody stands in for yet, oldest first.
pub fn unreplaced_originals(instances: &[Instance]) -> Vec<InstanceId> {
    let mut originals: Vec<&Instance> = instances
        .iter()
        .filter(|instance| instance.condition == Condition::UnreachableInactive)
        .filter(|original| {
            !instances.iter().any(|other| {
                other.replaces.as_ref() == Some(&original.id)
                    && other.condition.occupies_slot()
            })
        })
        .collect();
    originals.sort_by_key(|instance| (instance.unreachable_since, instance.id.clone()));
    originals.into_iter().map(|instance| instance.id.clone()).collect()
}

fn original_recovered(instance: &Instance, all: &[Instance]) -> bool {
    instance.replaces.as_ref().is_some_and(|original| {
        all.iter()
            .any(|other| &other.id == original && other.condition == Condition::Running)
    })
}
