//! # Leadership Coordinator
//!
//! Drives one process through `Standby -> Active -> Abdicated -> Standby`.
//!
//! ## Architecture
//!
//! - **Standby**: campaign in the election; a standby process performs no
//!   mutations.
//! - **Active**: once elected, hand the term to the orchestrator, which reloads
//!   state and starts reconciling. Stay active until the term is lost, the
//!   process abdicates or it shuts down.
//! - **Abdicated**: stop the orchestrator, resign the term, back off, then
//!   campaign again.
//!
//! The orchestrator stops acting under a term before the term is resigned, so
//! two processes never mutate at the same time.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::election::LeaderElection;
use super::term::{LeaderInfo, LeadershipTerm};
use crate::error::{FleetError, FleetResult};
use crate::logging::{log_error, log_leadership_operation};
use crate::orchestration::FleetOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Standby,
    Active,
    Abdicated,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => write!(f, "standby"),
            Self::Active => write!(f, "active"),
            Self::Abdicated => write!(f, "abdicated"),
        }
    }
}

/// Handles shared between the coordinator and its background task.
#[derive(Clone)]
struct Shared {
    node_id: String,
    orchestrator: Arc<FleetOrchestrator>,
    election: Arc<dyn LeaderElection>,
    backoff: Duration,
    state: Arc<RwLock<CoordinatorState>>,
    abdicate: Arc<Notify>,
}

pub struct LeadershipCoordinator {
    shared: Shared,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for LeadershipCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeadershipCoordinator")
            .field("node_id", &self.shared.node_id)
            .field("state", &*self.shared.state.read())
            .finish_non_exhaustive()
    }
}

impl LeadershipCoordinator {
    /// Coordinator for `orchestrator`, campaigning under its configured node id.
    pub fn new(orchestrator: Arc<FleetOrchestrator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Shared {
                node_id: orchestrator.node_id().to_string(),
                election: Arc::clone(orchestrator.election()),
                backoff: orchestrator.config().campaign_backoff(),
                orchestrator,
                state: Arc::new(RwLock::new(CoordinatorState::Standby)),
                abdicate: Arc::new(Notify::new()),
            },
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Start campaigning in the background.
    pub fn start(&self) -> FleetResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(FleetError::Conflict(format!(
                "Coordinator for {} already started",
                self.shared.node_id
            )));
        }
        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move { shared.run(shutdown).await }));
        info!(node_id = %self.shared.node_id, "👑 LEADERSHIP: Coordinator started");
        Ok(())
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.read()
    }

    /// Term this process currently acts under.
    pub fn active_term(&self) -> Option<LeadershipTerm> {
        self.shared.orchestrator.active_term()
    }

    /// Current leader of the election, whichever process holds it.
    pub fn leader(&self) -> Option<LeaderInfo> {
        self.shared.election.current().as_ref().map(LeaderInfo::from)
    }

    /// Step down. Returns once abdication has been initiated; the
    /// orchestrator stops and the term is resigned in the background.
    pub fn abdicate(&self) -> FleetResult<()> {
        if self.state() != CoordinatorState::Active {
            return Err(FleetError::NotLeader);
        }
        info!(node_id = %self.shared.node_id, "👑 LEADERSHIP: Abdication requested");
        self.shared.abdicate.notify_one();
        Ok(())
    }

    /// Stop campaigning and, if leading, relinquish and resign.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(error = %error, "Coordinator task ended abnormally");
            }
        }
    }

    /// Poll until the coordinator reaches `state` or `timeout` passes.
    pub async fn wait_for_state(&self, state: CoordinatorState, timeout: Duration) -> bool {
        let poll = async {
            while self.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

impl Shared {
    fn set_state(&self, state: CoordinatorState) {
        *self.state.write() = state;
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(CoordinatorState::Standby);

            let term = tokio::select! {
                result = self.election.campaign(&self.node_id) => match result {
                    Ok(term) => term,
                    Err(e) => {
                        log_error("leadership", "campaign", &e.to_string(), Some(&self.node_id));
                        if self.pause(&mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            if let Err(e) = self.orchestrator.take_leadership(term.clone()).await {
                log_error("leadership", "take_leadership", &e.to_string(), Some(&self.node_id));
                self.step_down(&term).await;
                if self.pause(&mut shutdown).await {
                    break;
                }
                continue;
            }
            self.set_state(CoordinatorState::Active);
            log_leadership_operation("elected", &self.node_id, Some(term.epoch()), "active", None);

            let abdicated = tokio::select! {
                _ = self.abdicate.notified() => true,
                _ = self.election.term_lost(&term) => {
                    warn!(term = %term, "👑 LEADERSHIP: Term lost");
                    false
                }
                _ = shutdown.changed() => false,
            };

            self.step_down(&term).await;
            if abdicated {
                self.set_state(CoordinatorState::Abdicated);
                log_leadership_operation("abdicated", &self.node_id, Some(term.epoch()), "abdicated", None);
            } else {
                self.set_state(CoordinatorState::Standby);
            }

            let stopping = *shutdown.borrow();
            if stopping || self.pause(&mut shutdown).await {
                break;
            }
        }

        self.set_state(CoordinatorState::Standby);
        info!(node_id = %self.node_id, "👑 LEADERSHIP: Coordinator stopped");
    }

    /// Stop acting under `term`, then give it up.
    async fn step_down(&self, term: &LeadershipTerm) {
        self.orchestrator.relinquish().await;
        if let Err(e) = self.election.resign(term).await {
            log_error("leadership", "resign", &e.to_string(), Some(&self.node_id));
        }
    }

    /// Back off before campaigning again. True when shutdown was requested.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.backoff) => false,
            _ = shutdown.changed() => true,
        }
    }
}
