//! # Unreachable Strategy Evaluator
//!
//! Decides what an unreachable instance should become given its app's
//! [`UnreachableStrategy`] and the time it has spent unreachable. Deadlines are
//! always measured from the stored `unreachable_since` timestamp, never from
//! process start, so a new leader re-arms the same deadlines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timers::{TimerEntry, TimerKind};
use crate::models::app::UnreachableStrategy;
use crate::models::instance::Instance;
use crate::state_machine::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnreachableDecision {
    /// The instance is reachable; nothing to decide.
    NotUnreachable,
    /// Keep waiting for the agent to come back.
    Wait,
    /// `inactiveAfter` elapsed: stop counting the instance and launch a replacement.
    MarkInactive,
    /// `expungeAfter` elapsed: remove the instance for good.
    Expunge,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableEvaluator;

impl UnreachableEvaluator {
    pub fn evaluate(
        strategy: &UnreachableStrategy,
        instance: &Instance,
        now: DateTime<Utc>,
    ) -> UnreachableDecision {
        if !instance.condition.is_unreachable() {
            return UnreachableDecision::NotUnreachable;
        }
        let (Some(since), Some(inactive_after), Some(expunge_after)) = (
            instance.unreachable_since,
            strategy.inactive_after(),
            strategy.expunge_after(),
        ) else {
            return UnreachableDecision::Wait;
        };

        let elapsed = now - since;
        if elapsed >= expunge_after {
            UnreachableDecision::Expunge
        } else if elapsed >= inactive_after && instance.condition == Condition::Unreachable {
            UnreachableDecision::MarkInactive
        } else {
            UnreachableDecision::Wait
        }
    }

    /// Timers to arm for an unreachable instance, tagged with its current generation.
    pub fn deadlines(strategy: &UnreachableStrategy, instance: &Instance) -> Vec<TimerEntry> {
        let Some(since) = instance.unreachable_since else {
            return Vec::new();
        };
        if !instance.condition.is_unreachable() {
            return Vec::new();
        }

        let mut entries = Vec::with_capacity(2);
        if instance.condition == Condition::Unreachable {
            if let Some(inactive_after) = strategy.inactive_after() {
                entries.push(TimerEntry {
                    instance_id: instance.id.clone(),
                    app_id: instance.app_id.clone(),
                    generation: instance.timer_generation,
                    kind: TimerKind::Inactive,
                    due: since + inactive_after,
                });
            }
        }
        if let Some(expunge_after) = strategy.expunge_after() {
            entries.push(TimerEntry {
                instance_id: instance.id.clone(),
                app_id: instance.app_id.clone(),
                generation: instance.timer_generation,
                kind: TimerKind::Expunge,
                due: since + expunge_after,
            });
        }
        entries
    }
}
