//! Event-driven workflow scheduler.
//!
//! `WorkflowEngine` runs a validated `GraphModel`. Each node runs as one task
//! in a `tokio::task::JoinSet`; a single loop owns all node state and reacts
//! to task completions as they arrive.
//!
//! # Execution flow
//!
//! 1. Start nodes become READY. Non-start nodes without incoming edges are
//!    SKIPPED straight away.
//! 2. READY nodes wait in a FIFO queue and are launched while fewer than
//!    `max_concurrent` tasks are in flight.
//! 3. When tasks finish, every completion already available is drained and
//!    processed in node-ID order. A completed node's outgoing edges are
//!    activated by their conditions; a failed node's edges are all inactive.
//! 4. A downstream node waits until the sources of all its incoming edges
//!    are resolved (AND-join), then runs if at least one edge is active and
//!    is skipped otherwise. Skips propagate.
//! 5. Cancellation or the workflow timeout stops launching, aborts in-flight
//!    tasks and skips every node that has not finished.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use treeflow_types::config::EngineSettings;
use treeflow_types::event::WorkflowEvent;
use treeflow_types::workflow::{NodeKind, NodeStatus, RunStatus, WorkflowConfig, WorkflowResult};

use crate::event::EventBus;

use super::aggregator::{NodeTiming, ResultAggregator};
use super::compose::{ComposedInput, compose};
use super::condition::{ConditionMatcher, StandardMatcher};
use super::dag::validate_acyclic;
use super::error::EngineError;
use super::executor::{BoxDatabaseSearcher, BoxNodeExecutor, NodeError};
use super::graph::{GraphModel, Node};

/// Skip reason for nodes left unfinished by a cancelled run.
pub const RUN_CANCELLED: &str = "run cancelled";

/// Skip reason and run error when the workflow timeout expires.
pub const WORKFLOW_TIMED_OUT: &str = "workflow timed out";

const NO_INCOMING_EDGES: &str = "no incoming edges";
const NO_ACTIVE_EDGE: &str = "no active incoming edge";

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs workflow graphs against an injected node executor.
pub struct WorkflowEngine {
    executor: BoxNodeExecutor,
    searcher: Option<BoxDatabaseSearcher>,
    matcher: Arc<dyn ConditionMatcher>,
    settings: EngineSettings,
    event_bus: EventBus,
    /// Cancellation tokens of in-flight runs, keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl WorkflowEngine {
    /// Create an engine with default settings and the standard matcher.
    pub fn new(executor: BoxNodeExecutor) -> Self {
        let settings = EngineSettings::default();
        Self {
            executor,
            searcher: None,
            matcher: Arc::new(StandardMatcher),
            event_bus: EventBus::new(settings.event_capacity),
            settings,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Replace the settings. The event bus is recreated with the configured
    /// capacity, so call this before `with_event_bus` or `event_bus().subscribe()`.
    ///
    /// Settings that fail [`EngineSettings::validate`] (a zero limit or
    /// timeout) are replaced by the defaults with a warning, the same way
    /// an invalid settings file is handled.
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(reason) => {
                tracing::warn!(reason = %reason, "invalid engine settings, using defaults");
                EngineSettings::default()
            }
        };
        self.event_bus = EventBus::new(settings.event_capacity);
        self.settings = settings;
        self
    }

    pub fn with_searcher(mut self, searcher: BoxDatabaseSearcher) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn ConditionMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Bus carrying this engine's `WorkflowEvent`s.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Build a graph from configuration and reject cycles.
    pub fn prepare(config: &WorkflowConfig) -> Result<Arc<GraphModel>, EngineError> {
        let graph = GraphModel::build(config)?;
        validate_acyclic(&graph)?;
        Ok(Arc::new(graph))
    }

    /// Build, validate and run a workflow configuration.
    ///
    /// Only configuration and cycle errors are returned as `Err`. Node
    /// failures, skips and timeouts are reported inside the result.
    pub async fn execute(&self, config: &WorkflowConfig) -> Result<WorkflowResult, EngineError> {
        let graph = Self::prepare(config)?;
        self.execute_graph(graph).await
    }

    /// Run an already built graph.
    pub async fn execute_graph(&self, graph: Arc<GraphModel>) -> Result<WorkflowResult, EngineError> {
        self.execute_with_cancel(graph, CancellationToken::new()).await
    }

    /// Run a graph, stopping early when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        graph: Arc<GraphModel>,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, EngineError> {
        validate_acyclic(&graph)?;

        let run_id = Uuid::now_v7();
        let token = cancel.child_token();
        self.cancellation_tokens.insert(run_id, token.clone());
        let _registration = Registration {
            tokens: &self.cancellation_tokens,
            run_id,
        };

        Ok(self.run(&graph, run_id, &token).await)
    }

    /// Cancel an in-flight run.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        let token = self
            .cancellation_tokens
            .get(&run_id)
            .ok_or(EngineError::RunNotFound(run_id))?;
        tracing::info!(run_id = %run_id, "cancelling workflow run");
        token.cancel();
        Ok(())
    }

    /// IDs of runs currently in flight.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    async fn run(&self, graph: &GraphModel, run_id: Uuid, token: &CancellationToken) -> WorkflowResult {
        for warning in graph.warnings() {
            tracing::warn!(run_id = %run_id, workflow_id = graph.workflow_id(), "{warning}");
        }
        tracing::info!(
            run_id = %run_id,
            workflow_id = graph.workflow_id(),
            nodes = graph.node_count(),
            "workflow run started"
        );
        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id,
            workflow_id: graph.workflow_id().to_string(),
            total_nodes: graph.node_count(),
        });

        let mut state = RunState::new(graph, run_id, self.event_bus.clone());
        state.seed();

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, (String, DateTime<Utc>)> = HashMap::new();
        let max_concurrent = self.settings.max_concurrent.max(1);
        let deadline = tokio::time::sleep(Duration::from_secs(self.settings.workflow_timeout_secs));
        tokio::pin!(deadline);

        let interruption: Option<&'static str> = loop {
            if token.is_cancelled() {
                break Some(RUN_CANCELLED);
            }
            while tasks.len() < max_concurrent {
                let Some(node_id) = state.ready.pop_front() else {
                    break;
                };
                self.launch(&mut state, &mut tasks, &mut in_flight, node_id);
            }
            if tasks.is_empty() {
                break None;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break Some(RUN_CANCELLED),
                _ = &mut deadline => break Some(WORKFLOW_TIMED_OUT),
                Some(first) = tasks.join_next_with_id() => {
                    let mut batch = vec![first];
                    while let Some(next) = tasks.try_join_next_with_id() {
                        batch.push(next);
                    }
                    let mut outcomes: Vec<TaskOutcome> = batch
                        .into_iter()
                        .filter_map(|joined| settle(joined, &mut in_flight))
                        .collect();
                    outcomes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
                    for outcome in outcomes {
                        state.on_task_finished(outcome, self.matcher.as_ref());
                    }
                }
                else => break None,
            }
        };

        let (status, error) = match interruption {
            Some(reason) => {
                tasks.abort_all();
                tracing::warn!(
                    run_id = %run_id,
                    in_flight = tasks.len(),
                    reason,
                    "workflow run interrupted"
                );
                state.skip_remaining(reason);
                (RunStatus::Cancelled, Some(reason.to_string()))
            }
            None => {
                state.skip_remaining("unresolved dependencies");
                (state.final_status(), None)
            }
        };

        let result = state.aggregator.finalize(status, error);
        tracing::info!(
            run_id = %run_id,
            status = %result.status,
            completed = result.completed_nodes,
            failed = result.failed_nodes,
            skipped = result.skipped_nodes,
            "workflow run finished"
        );
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id,
            status: result.status,
            duration_ms: result.duration_ms(),
        });
        result
    }

    fn launch<'g>(
        &self,
        state: &mut RunState<'g>,
        tasks: &mut JoinSet<TaskOutcome>,
        in_flight: &mut HashMap<tokio::task::Id, (String, DateTime<Utc>)>,
        node_id: &'g str,
    ) {
        let graph = state.graph;
        let Some(node) = graph.node(node_id) else {
            return;
        };
        let active = state.active_incoming(node_id);
        let input = compose(graph, node, &active, &state.outputs);
        state.mark_running(node_id);

        let node = node.clone();
        let executor = self.executor.clone();
        let searcher = self.searcher.clone();
        let limit = Duration::from_secs(self.settings.node_timeout_secs);
        let run_id = state.run_id;
        let started_at = Utc::now();

        let handle = tasks.spawn(async move {
            let result = run_node(&executor, searcher.as_ref(), &node, input, limit, run_id).await;
            TaskOutcome {
                node_id: node.id,
                result,
                timing: NodeTiming {
                    started_at,
                    finished_at: Utc::now(),
                },
            }
        });
        in_flight.insert(handle.id(), (node_id.to_string(), started_at));
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("settings", &self.settings)
            .field("has_searcher", &self.searcher.is_some())
            .field("active_runs", &self.cancellation_tokens.len())
            .finish()
    }
}

/// Removes a run's cancellation token when the run ends or is dropped.
struct Registration<'a> {
    tokens: &'a DashMap<Uuid, CancellationToken>,
    run_id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.tokens.remove(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// Task body
// ---------------------------------------------------------------------------

/// Message a node task sends back to the scheduler loop.
#[derive(Debug)]
struct TaskOutcome {
    node_id: String,
    result: Result<String, NodeError>,
    timing: NodeTiming,
}

async fn run_node(
    executor: &BoxNodeExecutor,
    searcher: Option<&BoxDatabaseSearcher>,
    node: &Node,
    input: ComposedInput,
    limit: Duration,
    run_id: Uuid,
) -> Result<String, NodeError> {
    let secs = limit.as_secs();
    let text = match (input.search.clone(), searcher) {
        (Some(request), Some(searcher)) => {
            let found = tokio::time::timeout(
                limit,
                searcher.search(&request.connection, &request.query),
            )
            .await
            .map_err(|_| NodeError::Timeout(secs))??;
            input.with_search_result(&found)
        }
        (Some(request), None) => {
            tracing::debug!(
                run_id = %run_id,
                node_id = %node.id,
                connection = %request.connection,
                "no database searcher configured, ignoring search request"
            );
            input.text
        }
        (None, _) => input.text,
    };

    tokio::time::timeout(limit, executor.execute(node, &text))
        .await
        .map_err(|_| NodeError::Timeout(secs))?
}

/// Turn a joined task into an outcome, attributing panics to their node.
fn settle(
    joined: Result<(tokio::task::Id, TaskOutcome), JoinError>,
    in_flight: &mut HashMap<tokio::task::Id, (String, DateTime<Utc>)>,
) -> Option<TaskOutcome> {
    match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            Some(outcome)
        }
        Err(err) => {
            let Some((node_id, started_at)) = in_flight.remove(&err.id()) else {
                tracing::error!(error = %err, "join error for unknown task");
                return None;
            };
            let message = if err.is_panic() {
                panic_message(err.into_panic())
            } else {
                err.to_string()
            };
            Some(TaskOutcome {
                node_id,
                result: Err(NodeError::Panicked(message)),
                timing: NodeTiming {
                    started_at,
                    finished_at: Utc::now(),
                },
            })
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// Node and edge state of one run. Only the scheduler loop touches it.
struct RunState<'g> {
    graph: &'g GraphModel,
    run_id: Uuid,
    status: HashMap<&'g str, NodeStatus>,
    /// Activation per edge index; `None` until the source resolves.
    edge_active: Vec<Option<bool>>,
    outputs: BTreeMap<String, String>,
    ready: VecDeque<&'g str>,
    aggregator: ResultAggregator,
    events: EventBus,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g GraphModel, run_id: Uuid, events: EventBus) -> Self {
        Self {
            graph,
            run_id,
            status: graph
                .nodes()
                .map(|n| (n.id.as_str(), NodeStatus::Pending))
                .collect(),
            edge_active: vec![None; graph.edges().len()],
            outputs: BTreeMap::new(),
            ready: VecDeque::new(),
            aggregator: ResultAggregator::on_start(
                run_id,
                graph.workflow_id(),
                graph.workflow_name(),
                graph.node_count(),
            ),
            events,
        }
    }

    fn status_of(&self, node_id: &str) -> NodeStatus {
        self.status
            .get(node_id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    /// Queue start nodes and skip nodes that can never receive input.
    fn seed(&mut self) {
        let graph = self.graph;
        for node in graph.nodes().filter(|n| n.kind == NodeKind::Start) {
            self.status.insert(&node.id, NodeStatus::Ready);
            self.ready.push_back(&node.id);
        }
        let orphans: Vec<&'g str> = graph
            .nodes()
            .filter(|n| n.kind != NodeKind::Start && graph.effective_incoming(&n.id).is_empty())
            .map(|n| n.id.as_str())
            .collect();
        for node_id in orphans {
            self.skip_cascade(node_id, NO_INCOMING_EDGES);
        }
    }

    fn active_incoming(&self, node_id: &str) -> Vec<usize> {
        self.graph
            .effective_incoming(node_id)
            .iter()
            .copied()
            .filter(|&i| self.edge_active.get(i).copied().flatten() == Some(true))
            .collect()
    }

    fn mark_running(&mut self, node_id: &'g str) {
        self.status.insert(node_id, NodeStatus::Running);
        tracing::debug!(run_id = %self.run_id, node_id, "launching node");
        self.events.publish(WorkflowEvent::NodeStarted {
            run_id: self.run_id,
            node_id: node_id.to_string(),
        });
    }

    /// `Some(true)` to run, `Some(false)` to skip, `None` while waiting.
    fn readiness(&self, node_id: &str) -> Option<bool> {
        if self.status_of(node_id) != NodeStatus::Pending {
            return None;
        }
        let mut any_active = false;
        for &i in self.graph.effective_incoming(node_id) {
            match self.edge_active.get(i).copied().flatten() {
                None => return None,
                Some(active) => any_active |= active,
            }
        }
        Some(any_active)
    }

    /// Re-check every node downstream of `node_id`.
    fn resolve_targets(&mut self, node_id: &'g str) {
        let graph = self.graph;
        for &i in graph.outgoing(node_id) {
            let Some(edge) = graph.edge(i) else {
                continue;
            };
            let target = edge.to_node.as_str();
            match self.readiness(target) {
                Some(true) => {
                    self.status.insert(target, NodeStatus::Ready);
                    self.ready.push_back(target);
                }
                Some(false) => self.skip_cascade(target, NO_ACTIVE_EDGE),
                None => {}
            }
        }
    }

    /// Skip a node and everything that loses its last possible input.
    fn skip_cascade(&mut self, node_id: &'g str, reason: &str) {
        let graph = self.graph;
        let mut queue: VecDeque<(&'g str, &str)> = VecDeque::from([(node_id, reason)]);
        while let Some((id, why)) = queue.pop_front() {
            if self.status_of(id) != NodeStatus::Pending {
                continue;
            }
            self.mark_skipped(id, why);
            for &i in graph.outgoing(id) {
                if let Some(slot) = self.edge_active.get_mut(i) {
                    *slot = Some(false);
                }
            }
            for &i in graph.outgoing(id) {
                let Some(edge) = graph.edge(i) else {
                    continue;
                };
                let target = edge.to_node.as_str();
                match self.readiness(target) {
                    Some(true) => {
                        self.status.insert(target, NodeStatus::Ready);
                        self.ready.push_back(target);
                    }
                    Some(false) => queue.push_back((target, NO_ACTIVE_EDGE)),
                    None => {}
                }
            }
        }
    }

    fn mark_skipped(&mut self, node_id: &str, reason: &str) {
        let graph = self.graph;
        let Some(node) = graph.node(node_id) else {
            return;
        };
        self.status.insert(&node.id, NodeStatus::Skipped);
        tracing::debug!(run_id = %self.run_id, node_id, reason, "node skipped");
        self.aggregator.on_node_skip(node_id, reason);
        self.events.publish(WorkflowEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_task_finished(&mut self, outcome: TaskOutcome, matcher: &dyn ConditionMatcher) {
        let graph = self.graph;
        let Some(node) = graph.node(&outcome.node_id) else {
            return;
        };
        let id = node.id.as_str();
        if self.status_of(id) != NodeStatus::Running {
            tracing::warn!(run_id = %self.run_id, node_id = id, "ignoring stale task result");
            return;
        }

        match outcome.result {
            Ok(output) => {
                let mut condition_errors = Vec::new();
                for &i in graph.outgoing(id) {
                    let Some(edge) = graph.edge(i) else {
                        continue;
                    };
                    let active = match &edge.condition {
                        None => true,
                        Some(condition) => match matcher.matches(condition, &output) {
                            Ok(matched) => matched,
                            Err(err) => {
                                tracing::warn!(
                                    run_id = %self.run_id,
                                    node_id = id,
                                    edge = i,
                                    error = %err,
                                    "condition evaluation failed, edge inactive"
                                );
                                condition_errors.push(format!(
                                    "edge {i} ({} -> {}): {err}",
                                    edge.from_node, edge.to_node
                                ));
                                false
                            }
                        },
                    };
                    if let Some(slot) = self.edge_active.get_mut(i) {
                        *slot = Some(active);
                    }
                }

                self.status.insert(id, NodeStatus::Completed);
                let duration_ms = outcome.timing.duration_ms();
                tracing::info!(run_id = %self.run_id, node_id = id, duration_ms, "node completed");
                self.outputs.insert(id.to_string(), output.clone());
                self.aggregator
                    .on_node_complete(id, output, outcome.timing, condition_errors);
                self.events.publish(WorkflowEvent::NodeCompleted {
                    run_id: self.run_id,
                    node_id: id.to_string(),
                    duration_ms,
                });
            }
            Err(err) => {
                for &i in graph.outgoing(id) {
                    if let Some(slot) = self.edge_active.get_mut(i) {
                        *slot = Some(false);
                    }
                }

                self.status.insert(id, NodeStatus::Failed);
                tracing::warn!(run_id = %self.run_id, node_id = id, error = %err, "node failed");
                self.aggregator
                    .on_node_fail(id, err.to_string(), outcome.timing, Vec::new());
                self.events.publish(WorkflowEvent::NodeFailed {
                    run_id: self.run_id,
                    node_id: id.to_string(),
                    error: err.to_string(),
                });
            }
        }

        self.resolve_targets(id);
    }

    /// Skip every node that has not reached a terminal state.
    fn skip_remaining(&mut self, reason: &str) {
        let graph = self.graph;
        for node in graph.nodes() {
            if !self.status_of(&node.id).is_terminal() {
                self.mark_skipped(&node.id, reason);
            }
        }
    }

    fn final_status(&self) -> RunStatus {
        let any_completed = self.status.values().any(|s| *s == NodeStatus::Completed);
        let any_failed = self.status.values().any(|s| *s == NodeStatus::Failed);
        let start_failed = self
            .graph
            .start_nodes()
            .any(|id| self.status_of(id) == NodeStatus::Failed);

        if start_failed && !any_completed {
            RunStatus::Failed
        } else if any_failed {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::executor::{DatabaseSearcher, NodeExecutor};
    use crate::workflow::graph::test_support::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor driven by per-node scripts that records what it saw.
    #[derive(Clone, Default)]
    struct Scripted {
        outputs: HashMap<String, String>,
        failing: HashSet<String>,
        panicking: HashSet<String>,
        delays: HashMap<String, Duration>,
        inputs: Arc<Mutex<HashMap<String, String>>>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn output(mut self, node: &str, text: &str) -> Self {
            self.outputs.insert(node.to_string(), text.to_string());
            self
        }

        fn fail(mut self, node: &str) -> Self {
            self.failing.insert(node.to_string());
            self
        }

        fn panic_on(mut self, node: &str) -> Self {
            self.panicking.insert(node.to_string());
            self
        }

        fn delay(mut self, node: &str, delay: Duration) -> Self {
            self.delays.insert(node.to_string(), delay);
            self
        }

        fn input_of(&self, node: &str) -> Option<String> {
            self.inputs.lock().unwrap().get(node).cloned()
        }
    }

    impl NodeExecutor for Scripted {
        async fn execute(&self, node: &Node, input: &str) -> Result<String, NodeError> {
            self.inputs
                .lock()
                .unwrap()
                .insert(node.id.clone(), input.to_string());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&node.id) {
                tokio::time::sleep(*delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&node.id) {
                panic!("executor exploded on {}", node.id);
            }
            if self.failing.contains(&node.id) {
                return Err(NodeError::Execution(format!("{} failed", node.id)));
            }
            Ok(self
                .outputs
                .get(&node.id)
                .cloned()
                .unwrap_or_else(|| format!("{} output", node.id)))
        }
    }

    fn engine(exec: &Scripted) -> WorkflowEngine {
        WorkflowEngine::new(BoxNodeExecutor::new(exec.clone()))
    }

    fn linear() -> WorkflowConfig {
        workflow(
            vec![
                node("start", "start", ""),
                node("process", "process", "summarize"),
                node("output", "leaf", "format"),
            ],
            vec![edge("start", "process"), edge("process", "output")],
        )
    }

    fn branch() -> WorkflowConfig {
        workflow(
            vec![
                node("classifier", "start", "classify"),
                node("tech", "leaf", "tech summary"),
                node("marketing", "leaf", "marketing copy"),
            ],
            vec![
                when("classifier", "tech", "contains", "technical"),
                when("classifier", "marketing", "contains", "marketing"),
            ],
        )
    }

    fn isolation() -> WorkflowConfig {
        workflow(
            vec![
                node("start", "start", ""),
                node("c", "start", ""),
                node("process", "intermediate", "work"),
                node("x", "leaf", ""),
                node("y", "leaf", ""),
            ],
            vec![
                edge("start", "process"),
                edge("process", "x"),
                edge("process", "y"),
                edge("c", "y"),
            ],
        )
    }

    #[tokio::test]
    async fn test_linear_workflow_completes() {
        let exec = Scripted::default().output("start", "seed text");
        let result = engine(&exec).execute(&linear()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.completed_nodes, 3);
        assert_eq!(result.total_nodes, 3);
        assert!(result.error.is_none());
        let input = exec.input_of("process").unwrap();
        assert!(input.contains("seed text"), "got: {input}");
        assert!(input.starts_with("summarize"));

        let order: Vec<&str> = result.execution_log.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(order, vec!["start", "process", "output"]);
    }

    #[tokio::test]
    async fn test_merge_waits_for_all_sources() {
        let config = workflow(
            vec![
                node("a", "start", ""),
                node("b", "start", ""),
                node("merge", "leaf", "combine"),
            ],
            vec![edge("a", "merge"), edge("b", "merge")],
        );
        let exec = Scripted::default()
            .output("a", "alpha result")
            .output("b", "beta result")
            .delay("a", Duration::from_millis(50));
        let result = engine(&exec).execute(&config).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let input = exec.input_of("merge").unwrap();
        assert!(input.contains("alpha result"));
        assert!(input.contains("beta result"));

        let pos = |id: &str| result.execution_log.iter().position(|e| e.node_id == id).unwrap();
        assert!(pos("merge") > pos("a"));
        assert!(pos("merge") > pos("b"));
    }

    #[tokio::test]
    async fn test_conditional_branch() {
        let exec = Scripted::default().output("classifier", "this is a technical article");
        let result = engine(&exec).execute(&branch()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.node_status("tech"), Some(NodeStatus::Completed));
        assert_eq!(result.node_status("marketing"), Some(NodeStatus::Skipped));
        assert!(!result.results.contains_key("marketing"));
        assert!(exec.input_of("marketing").is_none());
        assert_eq!(result.skipped_nodes, 1);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let exec = Scripted::default().fail("process");
        let result = engine(&exec).execute(&isolation()).await.unwrap();

        assert_eq!(result.status, RunStatus::CompletedWithFailures);
        assert_eq!(result.node_status("process"), Some(NodeStatus::Failed));
        assert_eq!(result.node_status("x"), Some(NodeStatus::Skipped));
        assert_eq!(result.node_status("y"), Some(NodeStatus::Completed));
        let y_input = exec.input_of("y").unwrap();
        assert!(y_input.contains("c output"));
        assert!(!y_input.contains("process"));
        assert_eq!(
            result.log_entry("process").unwrap().error.as_deref(),
            Some("execution failed: process failed")
        );
    }

    #[tokio::test]
    async fn test_failed_branch_and_unmatched_condition_skip_merge() {
        let config = workflow(
            vec![
                node("start", "start", ""),
                node("c", "start", ""),
                node("process", "intermediate", "work"),
                node("x", "leaf", ""),
                node("y", "leaf", ""),
            ],
            vec![
                edge("start", "process"),
                edge("process", "x"),
                edge("process", "y"),
                when("c", "y", "contains", "never present"),
            ],
        );
        let exec = Scripted::default().fail("process");
        let result = engine(&exec).execute(&config).await.unwrap();

        assert_eq!(result.status, RunStatus::CompletedWithFailures);
        assert_eq!(result.node_status("c"), Some(NodeStatus::Completed));
        assert_eq!(result.node_status("x"), Some(NodeStatus::Skipped));
        assert_eq!(result.node_status("y"), Some(NodeStatus::Skipped));
        assert!(!result.results.contains_key("y"));
        assert!(exec.input_of("y").is_none());
    }

    #[tokio::test]
    async fn test_one_failed_start_beside_completed_start() {
        let config = workflow(
            vec![node("a", "start", ""), node("b", "start", "")],
            vec![],
        );
        let exec = Scripted::default().fail("a");
        let result = engine(&exec).execute(&config).await.unwrap();

        assert_eq!(result.status, RunStatus::CompletedWithFailures);
        assert_eq!(result.failed_nodes, 1);
        assert_eq!(result.completed_nodes, 1);
        assert_eq!(result.node_status("b"), Some(NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_start_without_completions_fails_run() {
        let exec = Scripted::default().fail("start");
        let result = engine(&exec).execute(&linear()).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_nodes, 1);
        assert_eq!(result.skipped_nodes, 2);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_runs_are_deterministic() {
        let exec = Scripted::default().output("classifier", "technical marketing mix");
        let eng = engine(&exec);
        let graph = WorkflowEngine::prepare(&branch()).unwrap();

        let first = eng.execute_graph(Arc::clone(&graph)).await.unwrap();
        let second = eng.execute_graph(graph).await.unwrap();
        assert_eq!(first.results, second.results);
        assert_eq!(first.status, second.status);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_invalid_regex_edge_is_inactive_and_logged() {
        let config = workflow(
            vec![node("s", "start", ""), node("t", "leaf", "")],
            vec![when("s", "t", "regex", "([broken")],
        );
        let exec = Scripted::default();
        let result = engine(&exec).execute(&config).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.node_status("t"), Some(NodeStatus::Skipped));
        let errors = &result.log_entry("s").unwrap().condition_errors;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("invalid regex"));
    }

    #[tokio::test]
    async fn test_skips_propagate_transitively() {
        let config = workflow(
            vec![
                node("s", "start", ""),
                node("a", "intermediate", ""),
                node("b", "intermediate", ""),
                node("c", "leaf", ""),
                node("orphan", "leaf", ""),
            ],
            vec![
                when("s", "a", "contains", "never"),
                edge("a", "b"),
                edge("b", "c"),
            ],
        );
        let exec = Scripted::default();
        let result = engine(&exec).execute(&config).await.unwrap();

        for id in ["a", "b", "c", "orphan"] {
            assert_eq!(result.node_status(id), Some(NodeStatus::Skipped), "{id}");
        }
        assert_eq!(
            result.log_entry("orphan").unwrap().error.as_deref(),
            Some("no incoming edges")
        );
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_node_incoming_edges_are_ignored() {
        let config = workflow(
            vec![node("a", "start", ""), node("b", "start", ""), node("c", "leaf", "")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let exec = Scripted::default();
        let result = engine(&exec).execute(&config).await.unwrap();
        assert_eq!(result.completed_nodes, 3);
        assert_eq!(exec.input_of("b").unwrap(), "");
    }

    #[tokio::test]
    async fn test_panicking_task_fails_its_node() {
        let exec = Scripted::default().panic_on("process");
        let result = engine(&exec).execute(&linear()).await.unwrap();

        assert_eq!(result.status, RunStatus::CompletedWithFailures);
        let entry = result.log_entry("process").unwrap();
        assert_eq!(entry.status, NodeStatus::Failed);
        assert!(entry.error.as_deref().unwrap().contains("executor exploded on process"));
        assert_eq!(result.node_status("output"), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn test_max_concurrent_one_serialises_nodes() {
        let config = workflow(
            vec![
                node("a", "start", ""),
                node("b", "start", ""),
                node("c", "start", ""),
                node("d", "leaf", ""),
            ],
            vec![edge("a", "d"), edge("b", "d"), edge("c", "d")],
        );
        let mut exec = Scripted::default();
        for id in ["a", "b", "c", "d"] {
            exec = exec.delay(id, Duration::from_millis(10));
        }
        let eng = engine(&exec).with_settings(EngineSettings {
            max_concurrent: 1,
            ..EngineSettings::default()
        });
        let result = eng.execute(&config).await.unwrap();

        assert_eq!(result.completed_nodes, 4);
        assert_eq!(exec.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_timeouts_fall_back_to_defaults() {
        let exec = Scripted::default();
        let eng = engine(&exec).with_settings(EngineSettings {
            node_timeout_secs: 0,
            workflow_timeout_secs: 0,
            ..EngineSettings::default()
        });
        assert_eq!(eng.settings(), &EngineSettings::default());

        let result = eng.execute(&linear()).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.completed_nodes, 3);
    }

    #[tokio::test]
    async fn test_default_concurrency_runs_starts_in_parallel() {
        let config = workflow(
            vec![node("a", "start", ""), node("b", "start", ""), node("c", "start", "")],
            vec![],
        );
        let mut exec = Scripted::default();
        for id in ["a", "b", "c"] {
            exec = exec.delay(id, Duration::from_millis(30));
        }
        engine(&exec).execute(&config).await.unwrap();
        assert!(exec.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_fails_node() {
        let exec = Scripted::default().delay("start", Duration::from_secs(10));
        let eng = engine(&exec).with_settings(EngineSettings {
            node_timeout_secs: 1,
            ..EngineSettings::default()
        });
        let result = eng.execute(&linear()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            result.log_entry("start").unwrap().error.as_deref(),
            Some("timed out after 1s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_timeout_cancels_run() {
        let exec = Scripted::default().delay("process", Duration::from_secs(60));
        let eng = engine(&exec).with_settings(EngineSettings {
            workflow_timeout_secs: 5,
            ..EngineSettings::default()
        });
        let result = eng.execute(&linear()).await.unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.error.as_deref(), Some("workflow timed out"));
        assert_eq!(result.node_status("start"), Some(NodeStatus::Completed));
        assert_eq!(result.node_status("process"), Some(NodeStatus::Skipped));
        assert_eq!(result.node_status("output"), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn test_cancel_by_run_id_stops_launching() {
        let exec = Scripted::default().delay("process", Duration::from_secs(30));
        let eng = Arc::new(engine(&exec));
        let mut rx = eng.event_bus().subscribe();
        let graph = WorkflowEngine::prepare(&linear()).unwrap();

        let runner = Arc::clone(&eng);
        let handle = tokio::spawn(async move { runner.execute_graph(graph).await });

        let mut run_id = None;
        let mut started = Vec::new();
        while let Ok(event) = rx.recv().await {
            if let WorkflowEvent::RunStarted { run_id: id, .. } = &event {
                run_id = Some(*id);
            }
            if let WorkflowEvent::NodeStarted { node_id, .. } = &event {
                started.push(node_id.clone());
                if node_id == "process" {
                    break;
                }
            }
        }
        let run_id = run_id.unwrap();
        assert_eq!(eng.active_runs(), vec![run_id]);
        eng.cancel(run_id).unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.error.as_deref(), Some(RUN_CANCELLED));
        assert_eq!(result.node_status("process"), Some(NodeStatus::Skipped));
        assert_eq!(result.node_status("output"), Some(NodeStatus::Skipped));
        assert!(exec.input_of("output").is_none());
        assert_eq!(started, vec!["start", "process"]);
        assert!(eng.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_launches_nothing() {
        let exec = Scripted::default();
        let token = CancellationToken::new();
        token.cancel();
        let graph = WorkflowEngine::prepare(&linear()).unwrap();
        let result = engine(&exec).execute_with_cancel(graph, token).await.unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.skipped_nodes, 3);
        assert!(exec.inputs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_unknown_run() {
        let eng = engine(&Scripted::default());
        let id = Uuid::now_v7();
        assert!(matches!(eng.cancel(id), Err(EngineError::RunNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_execution() {
        let config = workflow(
            vec![node("s", "start", ""), node("a", "intermediate", ""), node("b", "intermediate", "")],
            vec![edge("s", "a"), edge("a", "b"), edge("b", "a")],
        );
        let exec = Scripted::default();
        let err = engine(&exec).execute(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::Cycle(ref c) if c.cycle == vec!["a", "b", "a"]));
        assert!(exec.inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_error_is_returned() {
        let config = workflow(vec![node("a", "leaf", "")], vec![]);
        let err = engine(&Scripted::default()).execute(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    struct RecordingSearcher {
        queries: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl DatabaseSearcher for RecordingSearcher {
        async fn search(&self, connection: &str, query: &str) -> Result<String, NodeError> {
            self.queries
                .lock()
                .unwrap()
                .push((connection.to_string(), query.to_string()));
            Ok("row: widget".to_string())
        }
    }

    fn search_workflow() -> WorkflowConfig {
        let mut target = node("lookup", "leaf", "find widgets");
        target.database_connection = Some("inventory".to_string());
        let mut e = edge("s", "lookup");
        e.input_config.include_database_search = true;
        workflow(vec![node("s", "start", ""), target], vec![e])
    }

    #[tokio::test]
    async fn test_database_search_feeds_input() {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let exec = Scripted::default();
        let eng = engine(&exec).with_searcher(BoxDatabaseSearcher::new(RecordingSearcher {
            queries: Arc::clone(&queries),
        }));
        let result = eng.execute(&search_workflow()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(
            queries.lock().unwrap().as_slice(),
            &[("inventory".to_string(), "find widgets".to_string())]
        );
        let input = exec.input_of("lookup").unwrap();
        assert!(input.ends_with("Database context:\nrow: widget"), "got: {input}");
    }

    #[tokio::test]
    async fn test_search_without_searcher_is_ignored() {
        let exec = Scripted::default();
        let result = engine(&exec).execute(&search_workflow()).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(!exec.input_of("lookup").unwrap().contains("Database context"));
    }

    #[tokio::test]
    async fn test_custom_matcher_is_used() {
        struct Never;
        impl ConditionMatcher for Never {
            fn matches(
                &self,
                _: &crate::workflow::condition::Condition,
                _: &str,
            ) -> Result<bool, crate::workflow::condition::ConditionError> {
                Ok(false)
            }
        }
        let exec = Scripted::default().output("classifier", "technical");
        let result = engine(&exec)
            .with_matcher(Arc::new(Never))
            .execute(&branch())
            .await
            .unwrap();
        assert_eq!(result.node_status("tech"), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let exec = Scripted::default().output("classifier", "technical");
        let eng = engine(&exec);
        let mut rx = eng.event_bus().subscribe();
        let result = eng.execute(&branch()).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { total_nodes: 3, .. })));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::RunFinished { status: RunStatus::Completed, .. })
        ));
        assert!(events.iter().all(|e| e.run_id() == result.run_id));
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::NodeSkipped { node_id, .. } if node_id == "marketing"
        )));
    }
}
