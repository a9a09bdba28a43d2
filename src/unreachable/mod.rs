//! Unreachable instance handling: the policy evaluator and its timer queue.

pub mod evaluator;
pub mod timers;

pub use evaluator::{UnreachableDecision, UnreachableEvaluator};
pub use timers::{TimerEntry, TimerKind, TimerQueue};
