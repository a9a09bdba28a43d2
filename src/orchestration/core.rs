//! # Fleet Orchestrator
//!
//! The single authoritative mutation path for apps, instances and deployments.
//!
//! ## Architecture
//!
//! - **Term gated**: every mutating operation takes the caller's
//!   [`LeadershipTerm`] and re-checks it before each side effect (store,
//!   launch, kill, publish). A deposed leader fails with
//!   [`FleetError::LeadershipLost`] instead of acting.
//! - **Serialized per App**: an async mutex per App id orders every mutation of
//!   that App and its instances, while different Apps proceed in parallel.
//! - **Resumable**: all progress lives in the [`Repository`]. A new leader
//!   reloads it, re-arms unreachable timers from stored timestamps and continues
//!   in-flight deployments where they stopped.
//!
//! The public operations are spread over sibling modules: app and deployment
//! API in `apps`, task status intake in `status`, health results in `health`,
//! deployment steps in `deployment`, and the periodic cycle in
//! `reconciliation`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use opentelemetry::KeyValue;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::reconciliation::ReconciliationLoop;
use crate::clock::Clock;
use crate::cluster::{select_agent, ClusterDriver, LaunchRequest, TaskRef};
use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::events::{EventPayload, EventPublisher, EventPublisherConfig, InstanceChanged};
use crate::leadership::{InMemoryElection, LeaderElection, LeadershipTerm};
use crate::logging::{log_instance_operation, log_leadership_operation};
use crate::metrics;
use crate::models::app::{AppDefinition, UnreachableStrategy};
use crate::models::deployment::DeploymentPlan;
use crate::models::ids::{AppId, IdGenerator, InstanceId, UuidIdGenerator};
use crate::models::instance::Instance;
use crate::state_machine::{
    Condition, ConditionChange, InstanceEvent, InstanceStateMachine, TaskStatus,
};
use crate::storage::{InMemoryRepository, Repository};
use crate::unreachable::{TimerQueue, UnreachableEvaluator};

/// Collaborators an orchestrator process is wired to. Cloning shares them,
/// which is how several processes in one test see the same store, election
/// and event stream.
#[derive(Clone)]
pub struct FleetContext {
    pub repository: Arc<dyn Repository>,
    pub cluster: Arc<dyn ClusterDriver>,
    pub election: Arc<dyn LeaderElection>,
    pub publisher: Arc<EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl FleetContext {
    /// In-memory store and election around the given cluster and clock.
    pub fn in_memory(
        config: &FleetConfig,
        cluster: Arc<dyn ClusterDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let election: Arc<dyn LeaderElection> = Arc::new(InMemoryElection::new(clock.clone()));
        let publisher = Arc::new(EventPublisher::new(
            EventPublisherConfig {
                buffer_size: config.events.buffer_size,
            },
            clock.clone(),
            election.clone(),
        ));
        Self {
            repository: Arc::new(InMemoryRepository::new()),
            cluster,
            election,
            publisher,
            clock,
            ids: Arc::new(UuidIdGenerator),
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

impl fmt::Debug for FleetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetContext")
            .field("repository", &self.repository)
            .field("cluster", &self.cluster)
            .field("election", &self.election)
            .finish_non_exhaustive()
    }
}

struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the loop and wait for it to exit.
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "Reconciliation loop ended abnormally");
        }
    }
}

pub struct FleetOrchestrator {
    pub(crate) config: FleetConfig,
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) cluster: Arc<dyn ClusterDriver>,
    pub(crate) election: Arc<dyn LeaderElection>,
    pub(crate) publisher: Arc<EventPublisher>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) timers: Mutex<TimerQueue>,
    app_locks: DashMap<AppId, Arc<AsyncMutex<()>>>,
    active_term: RwLock<Option<LeadershipTerm>>,
    reconciler: Mutex<Option<ReconcilerHandle>>,
}

impl fmt::Debug for FleetOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetOrchestrator")
            .field("node_id", &self.config.leadership.node_id)
            .field("active_term", &*self.active_term.read())
            .field("armed_timers", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, context: FleetContext) -> FleetResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            repo: context.repository,
            cluster: context.cluster,
            election: context.election,
            publisher: context.publisher,
            clock: context.clock,
            ids: context.ids,
            timers: Mutex::new(TimerQueue::new()),
            app_locks: DashMap::new(),
            active_term: RwLock::new(None),
            reconciler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.leadership.node_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn election(&self) -> &Arc<dyn LeaderElection> {
        &self.election
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Term this process currently acts under, if any.
    pub fn active_term(&self) -> Option<LeadershipTerm> {
        self.active_term.read().clone()
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Fails unless `term` is both this process's active term and the
    /// election's current term.
    pub(crate) fn ensure_active(&self, term: &LeadershipTerm) -> FleetResult<()> {
        let held = self.active_term.read().as_ref() == Some(term);
        if held && self.election.is_current(term) {
            Ok(())
        } else {
            Err(FleetError::LeadershipLost {
                epoch: term.epoch(),
            })
        }
    }

    pub(crate) async fn lock_app(&self, app_id: &AppId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.app_locks.entry(app_id.clone()).or_default().value());
        lock.lock_owned().await
    }

    pub(crate) fn publish(&self, term: &LeadershipTerm, payload: EventPayload) -> FleetResult<()> {
        self.publisher.publish(term, payload)?;
        Ok(())
    }

    /// Version timestamp for a new App version, strictly after `previous`.
    pub(crate) fn next_version(&self, previous: Option<&AppDefinition>) -> DateTime<Utc> {
        let now = self.clock.now();
        match previous {
            Some(prev) if now <= prev.version => prev.version + Duration::milliseconds(1),
            _ => now,
        }
    }

    /// App version an instance was launched for, falling back to the latest.
    pub(crate) async fn version_of(&self, instance: &Instance) -> FleetResult<Option<AppDefinition>> {
        let versions = self.repo.app_versions(&instance.app_id).await?;
        let exact = versions
            .iter()
            .rev()
            .find(|version| version.version == instance.run_spec_version)
            .cloned();
        Ok(exact.or_else(|| versions.last().cloned()))
    }

    /// The App's current unreachable strategy. Strategy changes do not restart
    /// instances, so running instances follow the latest version's policy.
    pub(crate) async fn strategy_for(&self, app_id: &AppId) -> FleetResult<UnreachableStrategy> {
        Ok(self
            .repo
            .app(app_id)
            .await?
            .map(|app| app.unreachable_strategy)
            .unwrap_or(UnreachableStrategy::Disabled))
    }

    /// Plans that still hold an App (in progress or failed), oldest first.
    pub(crate) async fn held_plans(&self, app_id: &AppId) -> FleetResult<Vec<DeploymentPlan>> {
        Ok(self
            .repo
            .deployments()
            .await?
            .into_iter()
            .filter(|plan| &plan.app_id == app_id && plan.status.holds_app())
            .collect())
    }

    /// Apply `event` to `instance`, persist the result and publish one
    /// `instance_changed_event` per condition change. Terminal instances are
    /// expunged from the store.
    pub(crate) async fn transition(
        &self,
        term: &LeadershipTerm,
        instance: &mut Instance,
        event: InstanceEvent,
        at: DateTime<Utc>,
    ) -> FleetResult<Vec<ConditionChange>> {
        let changes = InstanceStateMachine::apply(instance, event, at)?;
        if changes.is_empty() {
            return Ok(changes);
        }

        self.ensure_active(term)?;
        if instance.condition.is_terminal() {
            self.repo.expunge_instance(&instance.id).await?;
        } else {
            self.repo.store_instance(instance).await?;
        }
        self.sync_timers(instance).await?;

        for change in &changes {
            metrics::instance_transitions_total().add(
                1,
                &[
                    KeyValue::new("from", change.from.to_string()),
                    KeyValue::new("to", change.to.to_string()),
                ],
            );
            self.publish(term, instance_changed(instance, change.to, Some(change.from)))?;
        }

        log_instance_operation(
            event.event_type(),
            instance.app_id.as_str(),
            Some(instance.id.as_str()),
            Some(&instance.condition.to_string()),
            None,
        );
        Ok(changes)
    }

    /// Re-arm the timers of every unreachable instance of an App, e.g. after
    /// its unreachable strategy changed.
    pub(crate) async fn resync_timers(&self, app_id: &AppId) -> FleetResult<usize> {
        let unreachable: Vec<Instance> = self
            .repo
            .instances_for(app_id)
            .await?
            .into_iter()
            .filter(|instance| instance.condition.is_unreachable())
            .collect();
        for instance in &unreachable {
            self.sync_timers(instance).await?;
        }
        Ok(unreachable.len())
    }

    /// Cancel an instance's pending timers and re-arm the ones its current
    /// condition calls for.
    async fn sync_timers(&self, instance: &Instance) -> FleetResult<()> {
        let deadlines = if instance.condition.is_unreachable() {
            let strategy = self.strategy_for(&instance.app_id).await?;
            UnreachableEvaluator::deadlines(&strategy, instance)
        } else {
            Vec::new()
        };

        let mut timers = self.timers.lock();
        timers.cancel(&instance.id);
        for entry in deadlines {
            debug!(
                instance_id = %entry.instance_id,
                kind = ?entry.kind,
                due = %entry.due,
                "⏱️ TIMERS: Armed"
            );
            timers.arm(entry);
        }
        Ok(())
    }

    /// Launch one new instance of `app`. Returns `None` when no offered agent
    /// satisfies the App's constraints or the cluster rejected the launch.
    pub(crate) async fn launch_instance(
        &self,
        term: &LeadershipTerm,
        app: &AppDefinition,
        replaces: Option<InstanceId>,
        reason: &'static str,
    ) -> FleetResult<Option<Instance>> {
        self.ensure_active(term)?;
        let agents = match self.cluster.agents().await {
            Ok(agents) => agents,
            Err(error) => {
                warn!(app_id = %app.id, error = %error, "Could not list agents; launch deferred");
                return Ok(None);
            }
        };
        let existing = self.repo.instances_for(&app.id).await?;
        let Some(agent) = select_agent(app, &agents, &existing) else {
            debug!(app_id = %app.id, agents = agents.len(), "No agent satisfies placement constraints");
            return Ok(None);
        };

        let now = self.clock.now();
        let id = InstanceId::new(&app.id, &self.ids.instance_suffix());
        let mut instance = Instance::staged(id, app, agent, now, replaces);

        self.ensure_active(term)?;
        self.repo.store_instance(&instance).await?;
        self.publish(term, instance_changed(&instance, Condition::Staged, None))?;
        metrics::instances_launched_total().add(1, &[KeyValue::new("reason", reason)]);

        if let Err(error) = self
            .cluster
            .launch(LaunchRequest::for_instance(&instance, app))
            .await
        {
            warn!(
                instance_id = %instance.id,
                error = %error,
                "Launch rejected by the cluster; instance failed"
            );
            self.transition(term, &mut instance, InstanceEvent::Report(TaskStatus::Failed), now)
                .await?;
            return Ok(None);
        }

        log_instance_operation(
            "launch",
            app.id.as_str(),
            Some(instance.id.as_str()),
            Some("Staged"),
            Some(reason),
        );
        Ok(Some(instance))
    }

    /// Kill an instance. Instances with a live task move to `Killing` and the
    /// cluster is asked to kill the task (again, if already killing);
    /// unreachable and lost instances are removed without contacting the agent.
    pub(crate) async fn kill_instance_locked(
        &self,
        term: &LeadershipTerm,
        mut instance: Instance,
        reason: &str,
    ) -> FleetResult<Instance> {
        let needs_driver = matches!(
            instance.condition,
            Condition::Staged | Condition::Starting | Condition::Running | Condition::Killing
        );
        let now = self.clock.now();
        self.transition(term, &mut instance, InstanceEvent::Kill, now)
            .await?;

        if needs_driver {
            self.ensure_active(term)?;
            if let Err(error) = self.cluster.kill(TaskRef::from(&instance)).await {
                warn!(
                    instance_id = %instance.id,
                    error = %error,
                    "Kill request failed; reconciliation will retry"
                );
            }
        }

        log_instance_operation(
            "kill",
            instance.app_id.as_str(),
            Some(instance.id.as_str()),
            Some(&instance.condition.to_string()),
            Some(reason),
        );
        Ok(instance)
    }

    /// Become the acting leader for `term`: reload state, re-arm unreachable
    /// timers from stored timestamps and start the reconciliation loop.
    #[instrument(skip(self), fields(term = %term))]
    pub async fn take_leadership(self: &Arc<Self>, term: LeadershipTerm) -> FleetResult<()> {
        if !self.election.is_current(&term) {
            return Err(FleetError::LeadershipLost {
                epoch: term.epoch(),
            });
        }
        *self.active_term.write() = Some(term.clone());

        let rearmed = match self.rearm_timers().await {
            Ok(rearmed) => rearmed,
            Err(error) => {
                *self.active_term.write() = None;
                return Err(error);
            }
        };
        let apps = self.repo.apps().await?.len();
        let deployments = self.repo.deployments().await?.len();

        if self.config.reconciliation.enabled {
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = ReconciliationLoop::new(
                Arc::clone(self),
                term.clone(),
                self.config.reconciliation_interval(),
            )
            .spawn(shutdown_rx);
            let previous = self.reconciler.lock().replace(ReconcilerHandle { shutdown, task });
            if let Some(previous) = previous {
                previous.stop().await;
            }
        }

        metrics::leadership_transitions_total()
            .add(1, &[KeyValue::new("transition", "acquired")]);
        info!(
            term = %term,
            apps = apps,
            deployments = deployments,
            rearmed_timers = rearmed,
            "👑 ORCHESTRATOR: Leadership taken, state reloaded"
        );
        log_leadership_operation(
            "take_leadership",
            term.leader_id(),
            Some(term.epoch()),
            "active",
            None,
        );
        Ok(())
    }

    /// Stop acting as leader. Returns once the reconciliation loop has stopped;
    /// any mutation still in flight fails its next term check.
    pub async fn relinquish(&self) {
        let previous = self.active_term.write().take();
        let handle = self.reconciler.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.timers.lock().clear();

        if let Some(term) = previous {
            metrics::leadership_transitions_total()
                .add(1, &[KeyValue::new("transition", "relinquished")]);
            log_leadership_operation(
                "relinquish",
                term.leader_id(),
                Some(term.epoch()),
                "standby",
                None,
            );
        }
    }

    async fn rearm_timers(&self) -> FleetResult<usize> {
        let instances = self.repo.all_instances().await?;
        let mut entries = Vec::new();
        for instance in instances
            .iter()
            .filter(|instance| instance.condition.is_unreachable())
        {
            let strategy = self.strategy_for(&instance.app_id).await?;
            entries.extend(UnreachableEvaluator::deadlines(&strategy, instance));
        }

        let mut timers = self.timers.lock();
        timers.clear();
        let mut armed = 0;
        for entry in entries {
            if timers.arm(entry) {
                armed += 1;
            }
        }
        Ok(armed)
    }
}

pub(crate) fn instance_changed(
    instance: &Instance,
    condition: Condition,
    previous: Option<Condition>,
) -> EventPayload {
    EventPayload::InstanceChanged(InstanceChanged {
        app_id: instance.app_id.clone(),
        instance_id: instance.id.clone(),
        condition,
        previous_condition: previous,
        host: instance.agent.hostname.clone(),
        run_spec_version: instance.run_spec_version,
    })
}
