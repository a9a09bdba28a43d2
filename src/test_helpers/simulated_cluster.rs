//! In-process cluster driver for tests and benchmarks.
//!
//! Tasks live in memory; status reports are queued instead of delivered, so a
//! test decides when (and whether) the orchestrator sees them. Agents can be
//! partitioned and healed to exercise the unreachable path.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::cluster::{ClusterDriver, LaunchRequest, TaskRef, TaskStatusReport};
use crate::error::{FleetError, FleetResult};
use crate::models::ids::{AgentId, InstanceId, TaskId};
use crate::models::instance::AgentInfo;
use crate::state_machine::TaskStatus;

#[derive(Debug, Clone)]
struct SimTask {
    instance_id: InstanceId,
    task_id: TaskId,
    agent_id: AgentId,
}

#[derive(Debug, Default)]
struct ClusterState {
    agents: BTreeMap<AgentId, AgentInfo>,
    partitioned: BTreeSet<AgentId>,
    tasks: BTreeMap<InstanceId, SimTask>,
    pending: VecDeque<TaskStatusReport>,
    launches: Vec<LaunchRequest>,
    kills: Vec<TaskRef>,
}

#[derive(Debug)]
pub struct SimulatedCluster {
    clock: Arc<dyn Clock>,
    state: Mutex<ClusterState>,
    auto_run: AtomicBool,
    reject_launches: AtomicBool,
}

impl SimulatedCluster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ClusterState::default()),
            auto_run: AtomicBool::new(true),
            reject_launches: AtomicBool::new(false),
        }
    }

    pub fn with_agents(self, agents: impl IntoIterator<Item = AgentInfo>) -> Self {
        for agent in agents {
            self.add_agent(agent);
        }
        self
    }

    pub fn add_agent(&self, agent: AgentInfo) {
        self.state.lock().agents.insert(agent.id.clone(), agent);
    }

    /// When set (the default), every launch queues `TASK_STARTING` and
    /// `TASK_RUNNING`; otherwise launched tasks stay silent.
    pub fn set_auto_run(&self, auto_run: bool) {
        self.auto_run.store(auto_run, Ordering::SeqCst);
    }

    /// Make every launch fail with a transient error.
    pub fn set_reject_launches(&self, reject: bool) {
        self.reject_launches.store(reject, Ordering::SeqCst);
    }

    /// Cut an agent off: its tasks report `TASK_UNREACHABLE` and it stops
    /// offering resources or answering kills.
    pub fn partition(&self, agent_id: &AgentId) {
        let mut state = self.state.lock();
        state.partitioned.insert(agent_id.clone());
        let affected: Vec<SimTask> = state
            .tasks
            .values()
            .filter(|task| &task.agent_id == agent_id)
            .cloned()
            .collect();
        for task in affected {
            let report = self.report(&state, &task, TaskStatus::Unreachable);
            state.pending.push_back(report);
        }
    }

    /// Reconnect an agent; its surviving tasks report `TASK_RUNNING` again.
    pub fn heal(&self, agent_id: &AgentId) {
        let mut state = self.state.lock();
        state.partitioned.remove(agent_id);
        let affected: Vec<SimTask> = state
            .tasks
            .values()
            .filter(|task| &task.agent_id == agent_id)
            .cloned()
            .collect();
        for task in affected {
            let report = self.report(&state, &task, TaskStatus::Running);
            state.pending.push_back(report);
        }
    }

    /// Report a task as running, e.g. one launched while `auto_run` was off.
    pub fn run_task(&self, instance_id: &InstanceId) -> bool {
        self.emit(instance_id, TaskStatus::Running, false)
    }

    /// The task exits with `TASK_FAILED`.
    pub fn fail_task(&self, instance_id: &InstanceId) -> bool {
        self.emit(instance_id, TaskStatus::Failed, true)
    }

    /// The resource manager gives up on the task with `TASK_LOST`.
    pub fn lose_task(&self, instance_id: &InstanceId) -> bool {
        self.emit(instance_id, TaskStatus::Lost, true)
    }

    /// Take every queued report, oldest first.
    pub fn drain_reports(&self) -> Vec<TaskStatusReport> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Queue a report, e.g. a duplicate or a stale one.
    pub fn push_report(&self, report: TaskStatusReport) {
        self.state.lock().pending.push_back(report);
    }

    pub fn pending_reports(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().launches.clone()
    }

    pub fn kills(&self) -> Vec<TaskRef> {
        self.state.lock().kills.clone()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn has_task(&self, instance_id: &InstanceId) -> bool {
        self.state.lock().tasks.contains_key(instance_id)
    }

    fn emit(&self, instance_id: &InstanceId, status: TaskStatus, remove: bool) -> bool {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get(instance_id).cloned() else {
            return false;
        };
        if remove {
            state.tasks.remove(instance_id);
        }
        let report = self.report(&state, &task, status);
        state.pending.push_back(report);
        true
    }

    fn report(&self, state: &ClusterState, task: &SimTask, status: TaskStatus) -> TaskStatusReport {
        let hostname = state
            .agents
            .get(&task.agent_id)
            .map(|agent| agent.hostname.clone())
            .unwrap_or_default();
        TaskStatusReport {
            instance_id: task.instance_id.clone(),
            task_id: task.task_id.clone(),
            status,
            agent_id: task.agent_id.clone(),
            hostname,
            timestamp: self.clock.now(),
            message: None,
        }
    }
}

#[async_trait]
impl ClusterDriver for SimulatedCluster {
    async fn agents(&self) -> FleetResult<Vec<AgentInfo>> {
        let state = self.state.lock();
        Ok(state
            .agents
            .values()
            .filter(|agent| !state.partitioned.contains(&agent.id))
            .cloned()
            .collect())
    }

    async fn launch(&self, request: LaunchRequest) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.launches.push(request.clone());
        if self.reject_launches.load(Ordering::SeqCst) {
            return Err(FleetError::TransientCluster(format!(
                "launch of {} rejected",
                request.task_id
            )));
        }
        if !state.agents.contains_key(&request.agent_id)
            || state.partitioned.contains(&request.agent_id)
        {
            return Err(FleetError::TransientCluster(format!(
                "agent {} is not reachable",
                request.agent_id
            )));
        }

        let task = SimTask {
            instance_id: request.instance_id.clone(),
            task_id: request.task_id.clone(),
            agent_id: request.agent_id.clone(),
        };
        if self.auto_run.load(Ordering::SeqCst) {
            for status in [TaskStatus::Starting, TaskStatus::Running] {
                let report = self.report(&state, &task, status);
                state.pending.push_back(report);
            }
        }
        state.tasks.insert(task.instance_id.clone(), task);
        Ok(())
    }

    async fn kill(&self, task: TaskRef) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.kills.push(task.clone());
        if state.partitioned.contains(&task.agent_id) {
            return Ok(());
        }
        let current = state
            .tasks
            .get(&task.instance_id)
            .is_some_and(|running| running.task_id == task.task_id);
        if current {
            state.tasks.remove(&task.instance_id);
        }
        let killed = SimTask {
            instance_id: task.instance_id,
            task_id: task.task_id,
            agent_id: task.agent_id,
        };
        let report = self.report(&state, &killed, TaskStatus::Killed);
        state.pending.push_back(report);
        Ok(())
    }
}
