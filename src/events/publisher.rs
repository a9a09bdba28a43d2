//! # Event Publisher
//!
//! Fire-and-forget lifecycle event publication over a tokio broadcast channel.
//!
//! ## Architecture
//!
//! - **Term gated**: every publish carries the caller's [`LeadershipTerm`]; a
//!   term that is no longer current is rejected, so a deposed leader cannot
//!   emit events as if it were still authoritative.
//! - **Ordered**: envelopes get a monotonically increasing `sequence` under a
//!   single lock, so subscribers see them in publication order.
//! - **Non-blocking**: a send with no subscribers is not an error, and lagging
//!   subscribers lose the oldest events rather than slowing publishers down.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{DateTime, Utc};
//! use fleet_core::clock::{Clock, ManualClock};
//! use fleet_core::events::{EventPayload, EventPublisher, EventPublisherConfig, HealthStatusChanged};
//! use fleet_core::leadership::{InMemoryElection, LeaderElection};
//! use fleet_core::models::{AppId, InstanceId};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
//! let election = Arc::new(InMemoryElection::new(clock.clone()));
//! let publisher = EventPublisher::new(EventPublisherConfig::default(), clock, election.clone());
//! let mut events = publisher.subscribe();
//!
//! let app_id = AppId::parse("/web").unwrap();
//! let payload = EventPayload::HealthStatusChanged(HealthStatusChanged {
//!     instance_id: InstanceId::new(&app_id, "1"),
//!     app_id,
//!     version: DateTime::<Utc>::UNIX_EPOCH,
//!     alive: true,
//! });
//!
//! let term = election.campaign("node-a").await.unwrap();
//! publisher.publish(&term, payload.clone()).unwrap();
//! assert_eq!(events.recv().await.unwrap().sequence, 1);
//!
//! election.resign(&term).await.unwrap();
//! assert!(publisher.publish(&term, payload).is_err());
//! # });
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{EventPayload, FleetEvent, SCHEMA_VERSION};
use crate::clock::Clock;
use crate::error::FleetError;
use crate::leadership::{LeaderElection, LeadershipTerm};

#[derive(Debug, Clone)]
pub struct EventPublisherConfig {
    /// Events buffered per subscriber before the slowest one starts lagging.
    pub buffer_size: usize,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPublisherStats {
    pub buffer_size: usize,
    pub subscriber_count: usize,
    pub published: u64,
    pub rejected: u64,
    pub last_sequence: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("Term {term} is no longer current; {event_type} not published")]
    StaleTerm {
        term: String,
        epoch: u64,
        event_type: &'static str,
    },
}

impl From<PublishError> for FleetError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::StaleTerm { epoch, .. } => FleetError::LeadershipLost { epoch },
        }
    }
}

pub struct EventPublisher {
    config: EventPublisherConfig,
    sender: broadcast::Sender<FleetEvent>,
    sequence: Mutex<u64>,
    published: AtomicU64,
    rejected: AtomicU64,
    clock: Arc<dyn Clock>,
    election: Arc<dyn LeaderElection>,
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(
        config: EventPublisherConfig,
        clock: Arc<dyn Clock>,
        election: Arc<dyn LeaderElection>,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.buffer_size.max(1));
        Self {
            config,
            sender,
            sequence: Mutex::new(0),
            published: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            clock,
            election,
        }
    }

    /// Publish `payload` on behalf of `term`.
    pub fn publish(
        &self,
        term: &LeadershipTerm,
        payload: EventPayload,
    ) -> Result<FleetEvent, PublishError> {
        let event_type = payload.event_type();

        let event = {
            let mut sequence = self.sequence.lock();
            if !self.election.is_current(term) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    term = %term,
                    event_type = event_type,
                    "🚫 EVENTS: Dropping event from stale term"
                );
                return Err(PublishError::StaleTerm {
                    term: term.to_string(),
                    epoch: term.epoch(),
                    event_type,
                });
            }
            *sequence += 1;
            let event = FleetEvent {
                schema_version: SCHEMA_VERSION,
                sequence: *sequence,
                timestamp: self.clock.now(),
                payload,
            };
            // No subscribers is fine; events are fire-and-forget.
            let _ = self.sender.send(event.clone());
            event
        };

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_type = event_type,
            sequence = event.sequence,
            "EVENTS: Published"
        );
        Ok(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            buffer_size: self.config.buffer_size,
            subscriber_count: self.sender.receiver_count(),
            published: self.published.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            last_sequence: *self.sequence.lock(),
        }
    }
}
