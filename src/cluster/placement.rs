//! Constraint-aware agent selection.
//!
//! Constraints are evaluated over the App's *active* set: instances that still
//! hold or are about to release resources on an agent. Inactive unreachable
//! instances have handed their slot to a replacement and are left out, so the
//! replacement may land on a new host even under `UNIQUE hostname`.

use std::collections::HashMap;

use crate::models::app::{AppDefinition, Constraint, ConstraintOperator};
use crate::models::instance::{AgentInfo, Instance};

/// Pick an agent for one new instance of `app`, or `None` if no offered agent
/// satisfies every constraint. Among eligible agents the one running the
/// fewest instances of the app wins; ties go to the lowest agent id.
pub fn select_agent(
    app: &AppDefinition,
    agents: &[AgentInfo],
    instances: &[Instance],
) -> Option<AgentInfo> {
    let active: Vec<&Instance> = instances
        .iter()
        .filter(|instance| instance.app_id == app.id && instance.condition.consumes_capacity())
        .collect();

    let mut per_agent: HashMap<&str, usize> = HashMap::new();
    for instance in &active {
        *per_agent.entry(instance.agent.id.as_str()).or_default() += 1;
    }

    agents
        .iter()
        .filter(|agent| {
            app.constraints
                .iter()
                .all(|constraint| satisfies(constraint, agent, &active))
        })
        .min_by(|a, b| {
            let load_a = per_agent.get(a.id.as_str()).copied().unwrap_or(0);
            let load_b = per_agent.get(b.id.as_str()).copied().unwrap_or(0);
            load_a.cmp(&load_b).then_with(|| a.id.cmp(&b.id))
        })
        .cloned()
}

fn satisfies(constraint: &Constraint, agent: &AgentInfo, active: &[&Instance]) -> bool {
    let Some(value) = agent.field_value(&constraint.field) else {
        return false;
    };
    let sharing = || {
        active
            .iter()
            .filter(|instance| instance.agent.field_value(&constraint.field) == Some(value))
            .count()
    };

    match constraint.operator {
        ConstraintOperator::Unique => sharing() == 0,
        ConstraintOperator::Cluster => constraint.value.as_deref() == Some(value),
        ConstraintOperator::MaxPer => constraint
            .max_per_limit()
            .is_some_and(|limit| sharing() < limit),
    }
}
