//! Workflow domain types for treeflow.
//!
//! Two groups of types live here:
//!
//! - The configuration wire format (`WorkflowConfig` and friends) exactly as
//!   the storage/API layer hands it to the engine. String-typed enums such as
//!   `node_type` and `match_type` stay strings here; the engine validates them
//!   against the closed enums below when it builds a graph.
//! - Run results (`WorkflowResult`, `ExecutionLogEntry`, `ExecutionSummary`)
//!   produced fresh for every run.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow configuration (wire format)
// ---------------------------------------------------------------------------

/// A workflow definition as stored by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow identifier. Older definitions call this `workflow_id`.
    #[serde(alias = "workflow_id")]
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Node configurations keyed by node ID. A repeated key is rejected.
    #[serde(deserialize_with = "unique_node_map")]
    pub nodes: BTreeMap<String, NodeConfig>,
    /// Directed edges between nodes.
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

/// Configuration of a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Instruction text. Usually empty for start nodes.
    #[serde(default)]
    pub prompt: String,
    /// One of `start`, `intermediate` (alias `process`) or `leaf`, any case.
    pub node_type: String,
    /// Outgoing conditions kept for the visual editor. Routing itself is
    /// decided by the condition on each edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionConfig>,
    /// Connection name handed to the database searcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_connection: Option<String>,
}

/// Configuration of a directed edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from_node: String,
    pub to_node: String,
    /// Absent means the edge is always active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConfig>,
    #[serde(default)]
    pub input_config: InputConfig,
}

/// Structured string-match condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default = "default_match_target")]
    pub match_target: String,
    /// One of `contains`, `not_contains`, `fuzzy`, `regex`.
    pub match_type: String,
    pub match_value: String,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

/// Deserialize the node map, failing on a repeated node key instead of
/// letting the last entry win.
fn unique_node_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, NodeConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct UniqueNodes;

    impl<'de> serde::de::Visitor<'de> for UniqueNodes {
        type Value = BTreeMap<String, NodeConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of node ID to node configuration")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut nodes = BTreeMap::new();
            while let Some((key, node)) = access.next_entry::<String, NodeConfig>()? {
                if nodes.contains_key(&key) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate node id '{key}'"
                    )));
                }
                nodes.insert(key, node);
            }
            Ok(nodes)
        }
    }

    deserializer.deserialize_map(UniqueNodes)
}

fn default_match_target() -> String {
    MatchTarget::NodeOutput.to_string()
}

fn default_true() -> bool {
    true
}

/// Controls what an edge contributes to its target node's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_true")]
    pub include_prompt: bool,
    #[serde(default = "default_true")]
    pub include_previous_output: bool,
    #[serde(default)]
    pub include_database_search: bool,
    #[serde(default)]
    pub database_search_input: DatabaseSearchInput,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            include_prompt: true,
            include_previous_output: true,
            include_database_search: false,
            database_search_input: DatabaseSearchInput::default(),
        }
    }
}

/// Which text is used as the database search query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseSearchInput {
    #[default]
    Prompt,
    PreviousOutput,
    PromptAndPrevious,
}

// ---------------------------------------------------------------------------
// Closed enums validated at graph-build time
// ---------------------------------------------------------------------------

/// The role a node plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Intermediate,
    Leaf,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Start => write!(f, "start"),
            NodeKind::Intermediate => write!(f, "intermediate"),
            NodeKind::Leaf => write!(f, "leaf"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(NodeKind::Start),
            "intermediate" | "process" => Ok(NodeKind::Intermediate),
            "leaf" => Ok(NodeKind::Leaf),
            other => Err(format!("invalid node type: '{other}'")),
        }
    }
}

/// What a condition is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTarget {
    /// The output of the node the edge leaves from.
    NodeOutput,
}

impl fmt::Display for MatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchTarget::NodeOutput => write!(f, "node_output"),
        }
    }
}

impl FromStr for MatchTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node_output" => Ok(MatchTarget::NodeOutput),
            other => Err(format!("invalid match target: '{other}'")),
        }
    }
}

/// String-match operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Contains,
    NotContains,
    Fuzzy,
    Regex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Contains => write!(f, "contains"),
            MatchType::NotContains => write!(f, "not_contains"),
            MatchType::Fuzzy => write!(f, "fuzzy"),
            MatchType::Regex => write!(f, "regex"),
        }
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(MatchType::Contains),
            "not_contains" => Ok(MatchType::NotContains),
            "fuzzy" => Ok(MatchType::Fuzzy),
            "regex" => Ok(MatchType::Regex),
            other => Err(format!("invalid match type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// State of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Completed, failed and skipped nodes never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Final status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithFailures => "completed_with_failures",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// One entry in the ordered execution log of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub node_id: String,
    /// Terminal status the node reached.
    pub status: NodeStatus,
    /// When the node reached that status.
    pub timestamp: DateTime<Utc>,
    /// Wall time spent running the node (0 for skipped nodes).
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Errors raised while evaluating this node's outgoing edge conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition_errors: Vec<String>,
}

/// Everything a caller learns about one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    /// Outputs of completed nodes only.
    pub results: BTreeMap<String, String>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Run-level error (timeout, cancellation). Node errors live in the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// The log entry recorded for a node, if it reached a terminal state.
    pub fn log_entry(&self, node_id: &str) -> Option<&ExecutionLogEntry> {
        self.execution_log.iter().find(|e| e.node_id == node_id)
    }

    /// Terminal status of a node, if it reached one.
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.log_entry(node_id).map(|e| e.status)
    }

    /// Total wall time of the run in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Derived counters and rates for display.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            total_count: self.total_nodes,
            completed_count: self.completed_nodes,
            failed_count: self.failed_nodes,
            skipped_count: self.skipped_nodes,
            error_message: self.error.clone(),
        }
    }
}

/// Counters and rates derived from a `WorkflowResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub total_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Nodes skipped because no incoming edge was active.
    pub skipped_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionSummary {
    /// Nodes that actually ran (completed + failed).
    pub fn executed_count(&self) -> usize {
        self.completed_count + self.failed_count
    }

    /// Completed over executed; 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        let executed = self.executed_count();
        if executed == 0 {
            return 0.0;
        }
        self.completed_count as f64 / executed as f64
    }

    /// Executed over total; 0.0 for an empty workflow.
    pub fn execution_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.executed_count() as f64 / self.total_count as f64
    }

    /// No failures, no run error, and at least one node completed.
    ///
    /// Skipped nodes do not count against completion: they are the normal
    /// outcome of an unchosen branch.
    pub fn is_complete(&self) -> bool {
        self.failed_count == 0 && self.error_message.is_none() && self.completed_count > 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed_count > 0 || self.error_message.is_some()
    }

    /// One-line human-readable description.
    pub fn status_description(&self) -> String {
        if self.is_complete() {
            format!(
                "completed ({}/{} nodes)",
                self.completed_count, self.total_count
            )
        } else if self.is_failed() {
            format!(
                "finished with errors (completed: {}, failed: {}, skipped: {})",
                self.completed_count, self.failed_count, self.skipped_count
            )
        } else {
            format!(
                "no nodes completed ({}/{} executed)",
                self.executed_count(),
                self.total_count
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
