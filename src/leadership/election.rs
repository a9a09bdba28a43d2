//! # Leader Election
//!
//! [`LeaderElection`] is the boundary to whatever consensus primitive provides
//! "exactly one active leader, eventually". The orchestrator only needs four
//! things from it: wait for the seat, give it up, check a term atomically, and
//! learn when a term stops being current.
//!
//! [`InMemoryElection`] implements it for a single process hosting several
//! coordinators (tests, simulations). Candidates are served in arrival order,
//! so after an abdication the longest-waiting standby takes over.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::term::LeadershipTerm;
use crate::clock::Clock;
use crate::error::FleetResult;

#[async_trait]
pub trait LeaderElection: Send + Sync + fmt::Debug {
    /// Wait until `node_id` holds the seat and return its new term.
    async fn campaign(&self, node_id: &str) -> FleetResult<LeadershipTerm>;

    /// Give up the seat if `term` still holds it. Idempotent.
    async fn resign(&self, term: &LeadershipTerm) -> FleetResult<()>;

    /// Atomic check that `term` is the current term.
    fn is_current(&self, term: &LeadershipTerm) -> bool;

    fn current(&self) -> Option<LeadershipTerm>;

    /// Resolves once `term` is no longer current.
    async fn term_lost(&self, term: &LeadershipTerm);
}

#[derive(Debug, Default)]
struct ElectionState {
    epoch: u64,
    current: Option<LeadershipTerm>,
    candidates: VecDeque<String>,
}

pub struct InMemoryElection {
    state: Mutex<ElectionState>,
    changed: Notify,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for InMemoryElection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryElection")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl InMemoryElection {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(ElectionState::default()),
            changed: Notify::new(),
            clock,
        }
    }

    /// Drop the current term without the leader's cooperation, as a lost
    /// session would.
    pub fn expire_current(&self) -> Option<LeadershipTerm> {
        let expired = self.state.lock().current.take();
        if let Some(term) = &expired {
            info!(term = %term, "⚠️ ELECTION: Current term expired");
        }
        self.changed.notify_waiters();
        expired
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    fn try_acquire(&self, node_id: &str) -> Option<LeadershipTerm> {
        let mut state = self.state.lock();
        if state.current.is_some() {
            if !state.candidates.iter().any(|c| c == node_id) {
                state.candidates.push_back(node_id.to_string());
            }
            return None;
        }
        match state.candidates.front() {
            Some(front) if front != node_id => {
                if !state.candidates.iter().any(|c| c == node_id) {
                    state.candidates.push_back(node_id.to_string());
                }
                None
            }
            _ => {
                state.candidates.retain(|c| c != node_id);
                state.epoch += 1;
                let term = LeadershipTerm::new(state.epoch, node_id, self.clock.now());
                state.current = Some(term.clone());
                Some(term)
            }
        }
    }

    fn withdraw(&self, node_id: &str) {
        self.state.lock().candidates.retain(|c| c != node_id);
        self.changed.notify_waiters();
    }
}

/// Removes a candidate from the queue if its campaign is dropped before winning.
struct Candidacy<'a> {
    election: &'a InMemoryElection,
    node_id: &'a str,
    elected: bool,
}

impl Drop for Candidacy<'_> {
    fn drop(&mut self) {
        if !self.elected {
            self.election.withdraw(self.node_id);
        }
    }
}

#[async_trait]
impl LeaderElection for InMemoryElection {
    async fn campaign(&self, node_id: &str) -> FleetResult<LeadershipTerm> {
        let mut candidacy = Candidacy {
            election: self,
            node_id,
            elected: false,
        };
        loop {
            let changed = self.changed.notified();
            if let Some(term) = self.try_acquire(node_id) {
                candidacy.elected = true;
                info!(term = %term, "👑 ELECTION: Seat acquired");
                self.changed.notify_waiters();
                return Ok(term);
            }
            debug!(node_id = %node_id, "ELECTION: Waiting for the seat");
            changed.await;
        }
    }

    async fn resign(&self, term: &LeadershipTerm) -> FleetResult<()> {
        let resigned = {
            let mut state = self.state.lock();
            if state.current.as_ref() == Some(term) {
                state.current = None;
                true
            } else {
                false
            }
        };
        if resigned {
            info!(term = %term, "ELECTION: Seat released");
            self.changed.notify_waiters();
        }
        Ok(())
    }

    fn is_current(&self, term: &LeadershipTerm) -> bool {
        self.state.lock().current.as_ref() == Some(term)
    }

    fn current(&self) -> Option<LeadershipTerm> {
        self.state.lock().current.clone()
    }

    async fn term_lost(&self, term: &LeadershipTerm) {
        loop {
            let changed = self.changed.notified();
            if !self.is_current(term) {
                return;
            }
            changed.await;
        }
    }
}
