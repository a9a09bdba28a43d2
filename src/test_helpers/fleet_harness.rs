//! A leader-elected orchestrator wired to a [`SimulatedCluster`] and a
//! [`ManualClock`], with helpers to pump reports and collect events.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::faulty_repository::FaultyRepository;
use super::simulated_cluster::SimulatedCluster;
use crate::clock::{Clock, ManualClock};
use crate::config::FleetConfig;
use crate::events::FleetEvent;
use crate::leadership::LeadershipTerm;
use crate::models::app::AppDefinition;
use crate::models::ids::{AppId, SequentialIdGenerator};
use crate::models::instance::{AgentInfo, Instance};
use crate::orchestration::{FleetContext, FleetOrchestrator, ReconciliationReport};
use crate::state_machine::Condition;
use crate::storage::Repository;

/// Upper bound on report rounds before [`TestFleet::deliver`] gives up.
const MAX_DELIVERY_ROUNDS: usize = 100;

/// Config for driven tests: no background loop, everything else default.
pub fn test_config(node_id: &str) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.reconciliation.enabled = false;
    config.leadership.node_id = node_id.to_string();
    config
}

/// `count` agents named `agent-N` on `host-N`.
pub fn agents(count: usize) -> Vec<AgentInfo> {
    (1..=count)
        .map(|n| AgentInfo::new(format!("agent-{n}"), format!("host-{n}")))
        .collect()
}

/// A minimal valid App.
pub fn app(id: &str, instances: u32) -> AppDefinition {
    let id = AppId::parse(id).unwrap_or_else(|_| panic!("invalid test app id {id}"));
    AppDefinition::new(id, instances).with_cmd("sleep 1000")
}

pub struct TestFleet {
    pub clock: Arc<ManualClock>,
    pub cluster: Arc<SimulatedCluster>,
    pub context: FleetContext,
    pub orchestrator: Arc<FleetOrchestrator>,
    pub term: LeadershipTerm,
    events: broadcast::Receiver<FleetEvent>,
}

impl TestFleet {
    /// Leader `node-a` over two agents.
    pub async fn start() -> Result<Self> {
        Self::with(agents(2), test_config("node-a")).await
    }

    pub async fn with(agents: Vec<AgentInfo>, config: FleetConfig) -> Result<Self> {
        Self::build(agents, config, |context| context.repository.clone()).await
    }

    /// Like [`TestFleet::with`], over a [`FaultyRepository`] the test can arm.
    pub async fn with_faults(
        agents: Vec<AgentInfo>,
        config: FleetConfig,
    ) -> Result<(Self, Arc<FaultyRepository>)> {
        let mut faulty = None;
        let fleet = Self::build(agents, config, |context| {
            let repository = Arc::new(FaultyRepository::new(context.election.clone()));
            faulty = Some(repository.clone());
            repository as Arc<dyn Repository>
        })
        .await?;
        let faulty = faulty.context("repository was not built")?;
        Ok((fleet, faulty))
    }

    async fn build(
        agents: Vec<AgentInfo>,
        config: FleetConfig,
        repository: impl FnOnce(&FleetContext) -> Arc<dyn Repository>,
    ) -> Result<Self> {
        let clock = Arc::new(ManualClock::at_epoch());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let cluster = Arc::new(SimulatedCluster::new(dyn_clock.clone()).with_agents(agents));
        let mut context = FleetContext::in_memory(&config, cluster.clone(), dyn_clock)
            .with_ids(Arc::new(SequentialIdGenerator::new()));
        context.repository = repository(&context);
        let events = context.publisher.subscribe();

        let orchestrator = Arc::new(
            FleetOrchestrator::new(config, context.clone()).context("invalid test config")?,
        );
        let term = context
            .election
            .campaign(orchestrator.node_id())
            .await
            .context("campaign failed")?;
        orchestrator
            .take_leadership(term.clone())
            .await
            .context("take_leadership failed")?;

        Ok(Self {
            clock,
            cluster,
            context,
            orchestrator,
            term,
            events,
        })
    }

    /// A second orchestrator process sharing this fleet's store, election,
    /// event stream and cluster. It is not elected.
    pub fn standby(&self, node_id: &str) -> Result<Arc<FleetOrchestrator>> {
        let config = test_config(node_id);
        Ok(Arc::new(FleetOrchestrator::new(config, self.context.clone())?))
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance_secs(secs);
    }

    /// Hand every queued report to the leader until the cluster goes quiet.
    /// Returns how many reports were delivered.
    pub async fn deliver(&self) -> Result<usize> {
        self.deliver_to(&self.orchestrator, &self.term).await
    }

    pub async fn deliver_to(
        &self,
        orchestrator: &FleetOrchestrator,
        term: &LeadershipTerm,
    ) -> Result<usize> {
        let mut delivered = 0;
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let reports = self.cluster.drain_reports();
            if reports.is_empty() {
                return Ok(delivered);
            }
            for report in reports {
                orchestrator.handle_task_status(term, report).await?;
                delivered += 1;
            }
        }
        bail!("cluster still reporting after {MAX_DELIVERY_ROUNDS} rounds")
    }

    /// One reconciliation cycle followed by report delivery.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let report = self.orchestrator.reconcile(&self.term).await?;
        self.deliver().await?;
        Ok(report)
    }

    /// Every event published since the last drain.
    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        events
    }

    pub async fn instances(&self, app_id: &AppId) -> Result<Vec<Instance>> {
        Ok(self.orchestrator.instances(app_id).await?)
    }

    /// Instances of `app_id` currently in `condition`.
    pub async fn in_condition(&self, app_id: &AppId, condition: Condition) -> Result<Vec<Instance>> {
        Ok(self
            .instances(app_id)
            .await?
            .into_iter()
            .filter(|instance| instance.condition == condition)
            .collect())
    }
}

/// Event types in publication order.
pub fn event_types(events: &[FleetEvent]) -> Vec<&'static str> {
    events.iter().map(FleetEvent::event_type).collect()
}
