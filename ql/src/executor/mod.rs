//! DAG executor - topological scheduling into a bounded agent pool
//!
//! The scheduler loop exclusively owns the per-task status table; workers
//! are spawned tasks that run one [`Agent`] each and report back over a
//! single results channel. Failure never aborts the whole graph: the
//! failed task's transitive dependents are skipped and independent
//! subgraphs keep executing.
//!
//! Ordering guarantee: a dependency's `task.completed` event is published
//! (by its agent, on the worker) strictly before the scheduler observes
//! the result and spawns any dependent, so dependents' `task.started`
//! events always come after.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentConfig, AgentDeps, TaskContext};
use crate::cancel::CancelToken;
use crate::domain::{AgentExecutionResult, Priority, TaskError, TaskStatus};
use crate::events::EventBus;
use crate::graph::{NodeIdx, TaskGraph};
use crate::prompts::DependencyContext;
use crate::sandbox::SandboxConfig;

/// Hard cap on the worker pool, whatever the host reports
pub const MAX_WORKERS: usize = 16;

/// Executor tunables
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker pool size; default = hardware threads, capped at [`MAX_WORKERS`]
    pub workers: usize,
    /// Task-level retries for retryable failures
    pub max_retries: u32,
    /// First retry backoff
    pub retry_initial: Duration,
    /// Backoff multiplier
    pub retry_factor: u32,
    /// Backoff ceiling
    pub retry_cap: Duration,
    /// Per-agent budgets
    pub agent: AgentConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: 0,
            retry_initial: Duration::from_secs(1),
            retry_factor: 2,
            retry_cap: Duration::from_secs(30),
            agent: AgentConfig::default(),
        }
    }
}

/// Hardware-thread default, capped
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS)
}

/// Everything `execute` learned about the run
#[derive(Debug)]
pub struct ExecutionReport {
    /// Per-task results, keyed by task id; partial under cancellation
    pub results: HashMap<String, AgentExecutionResult>,
    /// Final per-task statuses
    pub statuses: HashMap<String, TaskStatus>,
}

impl ExecutionReport {
    /// Ids of tasks that ended `failed`, in topological order
    pub fn failed_task_ids(&self, graph: &TaskGraph) -> Vec<String> {
        graph
            .topo_order()
            .iter()
            .map(|&idx| graph.task(idx).id.clone())
            .filter(|id| self.statuses.get(id) == Some(&TaskStatus::Failed))
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.statuses.values().all(|s| *s == TaskStatus::Completed)
    }

    pub fn any_cancelled(&self) -> bool {
        self.statuses.values().any(|s| *s == TaskStatus::Cancelled)
    }
}

/// Ready-queue entry: priority desc, then topological index asc
#[derive(PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    topo_pos: std::cmp::Reverse<usize>,
    idx: NodeIdx,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, &self.topo_pos).cmp(&(other.priority, &other.topo_pos))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Messages workers and retry timers send the scheduler
enum SchedulerMsg {
    Finished { idx: NodeIdx, result: AgentExecutionResult },
    Requeue { idx: NodeIdx },
}

/// Schedules a [`TaskGraph`] onto a bounded agent pool
pub struct DagExecutor {
    config: ExecutorConfig,
    deps: AgentDeps,
    bus: Arc<EventBus>,
}

impl DagExecutor {
    pub fn new(config: ExecutorConfig, deps: AgentDeps, bus: Arc<EventBus>) -> Self {
        debug!(workers = config.workers, max_retries = config.max_retries, "DagExecutor::new: called");
        Self { config, deps, bus }
    }

    /// Execute the graph to a (possibly partial) result map
    pub async fn execute(&self, graph: &TaskGraph, cancel: CancelToken) -> ExecutionReport {
        info!(task_count = graph.len(), workers = self.config.workers, "Executing task graph");
        let mut state = SchedulerState::new(graph);
        let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerMsg>();

        // Seed: everything with no dependencies is ready
        for &idx in graph.topo_order() {
            if graph.dependencies_of(idx).is_empty() {
                state.enqueue(graph, idx);
            }
        }

        let mut cancel_watch = cancel.clone();
        let mut cancelled = false;

        loop {
            if !cancelled {
                self.spawn_ready(graph, &mut state, &tx, &cancel);
            }

            if state.running == 0 && state.ready.is_empty() && state.retries_in_flight == 0 {
                break;
            }
            if cancelled && state.running == 0 && state.retries_in_flight == 0 {
                break;
            }

            if cancelled {
                // Only waiting for in-flight workers to observe the token
                match rx.recv().await {
                    Some(msg) => self.handle_msg(graph, &mut state, msg, true, &tx),
                    None => break,
                }
            } else {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => self.handle_msg(graph, &mut state, msg, false, &tx),
                        None => break,
                    },
                    _ = cancel_watch.cancelled() => {
                        info!("Cancellation requested, draining executor");
                        cancelled = true;
                        state.cancel_pending(graph, &self.bus);
                    }
                }
            }
        }

        if cancelled {
            state.cancel_pending(graph, &self.bus);
        }

        info!(
            completed = state.count(TaskStatus::Completed),
            failed = state.count(TaskStatus::Failed),
            skipped = state.count(TaskStatus::Skipped),
            cancelled = state.count(TaskStatus::Cancelled),
            "Graph execution finished"
        );
        state.into_report(graph)
    }

    /// Pull from `ready` while worker slots are free
    fn spawn_ready(
        &self,
        graph: &TaskGraph,
        state: &mut SchedulerState,
        tx: &mpsc::UnboundedSender<SchedulerMsg>,
        cancel: &CancelToken,
    ) {
        while state.running < self.config.workers {
            let Some(entry) = state.ready.pop() else { break };
            let idx = entry.idx;
            state.set_status(idx, TaskStatus::Running);
            state.running += 1;

            let task = graph.task(idx).clone();
            let ctx = state.build_context(graph, idx);
            let deps = self.deps.clone();
            let emitter = self.bus.emitter_for(format!("executor/{}", task.id));
            let agent_config = self.config.agent.clone();
            let budget = self.task_budget(&task);
            let tx = tx.clone();
            let cancel = cancel.clone();

            debug!(task_id = %task.id, running = state.running, "spawn_ready: dispatching");
            tokio::spawn(async move {
                let agent = Agent::new(task.task_type, deps, emitter.clone(), agent_config);
                let agent_id = agent.id.clone();
                let result = match tokio::time::timeout(budget, agent.run(&task, &ctx, cancel)).await {
                    Ok(result) => result,
                    Err(_) => {
                        // The agent future was dropped; sessions clean up on
                        // drop. The agent never got to publish, so do it here.
                        let error = TaskError::Timeout {
                            timeout_ms: budget.as_millis() as u64,
                        };
                        emitter.task_failed(&task.id, error.kind(), &error.to_string(), error.retryable());
                        let mut result = AgentExecutionResult::not_run(&task.id, error);
                        result.agent_id = agent_id;
                        result
                    }
                };
                let _ = tx.send(SchedulerMsg::Finished { idx, result });
            });
        }
    }

    /// Aggregate per-task budget: LLM + sandbox + validation
    fn task_budget(&self, task: &crate::domain::Task) -> Duration {
        let sandbox = Duration::from_secs(SandboxConfig::for_task_type(task.task_type).timeout_secs);
        self.config.agent.llm_timeout + sandbox + self.config.agent.validation_timeout
    }

    fn handle_msg(
        &self,
        graph: &TaskGraph,
        state: &mut SchedulerState,
        msg: SchedulerMsg,
        cancelled: bool,
        tx: &mpsc::UnboundedSender<SchedulerMsg>,
    ) {
        match msg {
            SchedulerMsg::Finished { idx, result } => {
                state.running -= 1;
                self.handle_finished(graph, state, idx, result, cancelled, tx);
            }
            SchedulerMsg::Requeue { idx } => {
                state.retries_in_flight -= 1;
                if cancelled {
                    state.set_status(idx, TaskStatus::Cancelled);
                    state.store(idx, AgentExecutionResult::not_run(&graph.task(idx).id, TaskError::Cancelled));
                } else {
                    debug!(task_id = %graph.task(idx).id, "handle_msg: requeueing retried task");
                    state.enqueue(graph, idx);
                }
            }
        }
    }

    fn handle_finished(
        &self,
        graph: &TaskGraph,
        state: &mut SchedulerState,
        idx: NodeIdx,
        result: AgentExecutionResult,
        cancelled: bool,
        tx: &mpsc::UnboundedSender<SchedulerMsg>,
    ) {
        let task_id = graph.task(idx).id.clone();
        match &result.error {
            None => {
                debug!(%task_id, "handle_finished: completed");
                state.set_status(idx, TaskStatus::Completed);
                state.store(idx, result);
                if !cancelled {
                    for &dependent in graph.dependents_of(idx) {
                        state.remaining_deps[dependent] -= 1;
                        if state.remaining_deps[dependent] == 0 && state.status(dependent) == TaskStatus::Pending {
                            state.enqueue(graph, dependent);
                        }
                    }
                }
            }
            Some(TaskError::Cancelled) => {
                debug!(%task_id, "handle_finished: cancelled");
                state.set_status(idx, TaskStatus::Cancelled);
                state.store(idx, result);
            }
            Some(error) => {
                let attempts = state.attempts[idx];
                if !cancelled && error.retryable() && attempts < self.config.max_retries {
                    let backoff = self.backoff(attempts);
                    warn!(%task_id, attempt = attempts + 1, backoff_ms = backoff.as_millis() as u64, "task failed, retrying");
                    state.attempts[idx] += 1;
                    state.set_status(idx, TaskStatus::Failed);
                    state.set_status(idx, TaskStatus::Retrying);
                    state.retries_in_flight += 1;
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        let _ = tx.send(SchedulerMsg::Requeue { idx });
                    });
                } else {
                    warn!(%task_id, error = %error, "task failed terminally");
                    state.set_status(idx, TaskStatus::Failed);
                    state.store(idx, result);
                    self.skip_descendants(graph, state, idx);
                }
            }
        }
    }

    /// Exponential backoff: initial × factor^attempt, capped
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = (self.config.retry_factor as u64).saturating_pow(attempt);
        self.config.retry_initial.saturating_mul(factor as u32).min(self.config.retry_cap)
    }

    /// Mark every transitive dependent of a failed task as skipped
    fn skip_descendants(&self, graph: &TaskGraph, state: &mut SchedulerState, failed: NodeIdx) {
        let failed_id = graph.task(failed).id.clone();
        let mut stack: Vec<NodeIdx> = graph.dependents_of(failed).to_vec();

        while let Some(idx) = stack.pop() {
            match state.status(idx) {
                TaskStatus::Pending | TaskStatus::Queued => {
                    let task_id = graph.task(idx).id.clone();
                    debug!(%task_id, skip_cause = %failed_id, "skip_descendants: skipping");
                    state.set_status(idx, TaskStatus::Skipped);
                    state.ready.retain(|e| e.idx != idx);
                    state.store(
                        idx,
                        AgentExecutionResult::not_run(
                            &task_id,
                            TaskError::DependencyFailed {
                                task_id: failed_id.clone(),
                            },
                        ),
                    );
                    self.bus.emitter_for("executor").task_skipped(&task_id, &failed_id);
                    stack.extend_from_slice(graph.dependents_of(idx));
                }
                // Already terminal or running; running tasks are left to
                // finish (their own deps completed, they are unaffected).
                _ => {}
            }
        }
    }
}

/// The scheduler's exclusively-owned mutable state
struct SchedulerState {
    statuses: Vec<TaskStatus>,
    remaining_deps: Vec<usize>,
    attempts: Vec<u32>,
    ready: BinaryHeap<ReadyEntry>,
    running: usize,
    retries_in_flight: usize,
    results: HashMap<NodeIdx, AgentExecutionResult>,
}

impl SchedulerState {
    fn new(graph: &TaskGraph) -> Self {
        Self {
            statuses: vec![TaskStatus::Pending; graph.len()],
            remaining_deps: (0..graph.len()).map(|i| graph.dependencies_of(i).len()).collect(),
            attempts: vec![0; graph.len()],
            ready: BinaryHeap::new(),
            running: 0,
            retries_in_flight: 0,
            results: HashMap::new(),
        }
    }

    fn status(&self, idx: NodeIdx) -> TaskStatus {
        self.statuses[idx]
    }

    fn set_status(&mut self, idx: NodeIdx, status: TaskStatus) {
        self.statuses[idx] = status;
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.statuses.iter().filter(|&&s| s == status).count()
    }

    fn store(&mut self, idx: NodeIdx, result: AgentExecutionResult) {
        self.results.insert(idx, result);
    }

    fn enqueue(&mut self, graph: &TaskGraph, idx: NodeIdx) {
        self.set_status(idx, TaskStatus::Queued);
        self.ready.push(ReadyEntry {
            priority: graph.task(idx).priority,
            topo_pos: std::cmp::Reverse(graph.topo_position(idx)),
            idx,
        });
    }

    /// Dependency context for a task: its deps' outputs in topo order
    fn build_context(&self, graph: &TaskGraph, idx: NodeIdx) -> TaskContext {
        let mut deps: Vec<NodeIdx> = graph.dependencies_of(idx).to_vec();
        deps.sort_by_key(|&d| graph.topo_position(d));

        let dependencies = deps
            .iter()
            .filter_map(|d| self.results.get(d).map(|r| (d, r)))
            .map(|(&d, result)| DependencyContext {
                task_id: graph.task(d).id.clone(),
                summary: summarize(result),
            })
            .collect();

        TaskContext { dependencies }
    }

    /// Everything not yet terminal becomes cancelled
    fn cancel_pending(&mut self, graph: &TaskGraph, bus: &EventBus) {
        for idx in 0..graph.len() {
            if matches!(
                self.status(idx),
                TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying
            ) {
                self.set_status(idx, TaskStatus::Cancelled);
                let task_id = graph.task(idx).id.clone();
                self.store(idx, AgentExecutionResult::not_run(&task_id, TaskError::Cancelled));
                bus.emitter_for("executor")
                    .task_failed(&task_id, "cancelled", "run cancelled", false);
            }
        }
        self.ready.clear();
    }

    fn into_report(self, graph: &TaskGraph) -> ExecutionReport {
        let statuses = self
            .statuses
            .iter()
            .enumerate()
            .map(|(idx, &status)| (graph.task(idx).id.clone(), status))
            .collect();
        let results = self
            .results
            .into_iter()
            .map(|(idx, result)| (graph.task(idx).id.clone(), result))
            .collect();
        ExecutionReport { results, statuses }
    }
}

/// Short description of a completed task for dependents' prompts
fn summarize(result: &AgentExecutionResult) -> String {
    let files: Vec<&str> = result.files.keys().map(String::as_str).collect();
    let head: String = result.output.chars().take(400).collect();
    if files.is_empty() {
        head
    } else {
        format!("files: {}\n{}", files.join(", "), head)
    }
}
