use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proof of holding the leader seat for one election epoch.
///
/// Terms are only minted by a [`super::LeaderElection`]; every mutation in the
/// orchestrator takes one and checks it against the election before acting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadershipTerm {
    epoch: u64,
    leader_id: String,
    acquired_at: DateTime<Utc>,
}

impl LeadershipTerm {
    pub(crate) fn new(epoch: u64, leader_id: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            epoch,
            leader_id: leader_id.into(),
            acquired_at,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn leader_id(&self) -> &str {
        &self.leader_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl fmt::Display for LeadershipTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.leader_id, self.epoch)
    }
}

/// Leader identity as exposed to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderInfo {
    pub leader: String,
    pub epoch: u64,
    pub elected_at: DateTime<Utc>,
}

impl From<&LeadershipTerm> for LeaderInfo {
    fn from(term: &LeadershipTerm) -> Self {
        Self {
            leader: term.leader_id.clone(),
            epoch: term.epoch,
            elected_at: term.acquired_at,
        }
    }
}
