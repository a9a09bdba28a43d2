//! Cancellable delayed work for unreachable instances.
//!
//! Entries carry the instance's `timer_generation` at arming time. Any
//! transition that supersedes a timer bumps the generation, so a stale entry
//! that still fires is recognised and dropped; `cancel` removes entries eagerly
//! and is idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::ids::{AppId, InstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    Inactive,
    Expunge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEntry {
    pub instance_id: InstanceId,
    pub app_id: AppId,
    pub generation: u64,
    pub kind: TimerKind,
    pub due: DateTime<Utc>,
}

/// Deadline-ordered queue of unreachable timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<(DateTime<Utc>, u64), TimerEntry>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer. Returns false if an identical timer is already armed.
    pub fn arm(&mut self, entry: TimerEntry) -> bool {
        let duplicate = self.entries.values().any(|existing| {
            existing.instance_id == entry.instance_id
                && existing.kind == entry.kind
                && existing.generation == entry.generation
        });
        if duplicate {
            return false;
        }
        self.seq += 1;
        self.entries.insert((entry.due, self.seq), entry);
        true
    }

    /// Remove every timer for an instance. Returns how many were removed.
    pub fn cancel(&mut self, instance_id: &InstanceId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| &entry.instance_id != instance_id);
        before - self.entries.len()
    }

    /// Remove and return all timers due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<TimerEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    pub fn armed_for(&self, instance_id: &InstanceId) -> Vec<&TimerEntry> {
        self.entries
            .values()
            .filter(|entry| &entry.instance_id == instance_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
