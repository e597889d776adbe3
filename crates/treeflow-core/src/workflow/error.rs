//! Fatal error types raised before any node executes.

use thiserror::Error;
use uuid::Uuid;

/// Structural problems found while building a `GraphModel`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML/JSON/TOML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// A workflow could not be written out as YAML/JSON.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// A node has an empty or blank ID.
    #[error("node under key '{key}' has an empty id")]
    EmptyNodeId { key: String },

    /// A node's map key differs from its `id` field.
    #[error("node key '{key}' does not match node id '{id}'")]
    NodeIdMismatch { key: String, id: String },

    /// Two nodes share an ID.
    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    /// `node_type` is not one of start/intermediate/leaf.
    #[error("node '{node_id}' has invalid node type '{value}'")]
    InvalidNodeType { node_id: String, value: String },

    /// A condition names an unknown match target or match type.
    #[error("invalid condition on {location}: {message}")]
    InvalidCondition { location: String, message: String },

    /// An edge endpoint does not name an existing node.
    #[error("edge {edge_index} references unknown node '{node_id}'")]
    UnknownNodeReference { edge_index: usize, node_id: String },

    /// No node has kind START.
    #[error("workflow has no start node")]
    NoStartNode,

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The edge set contains a directed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// Node IDs from the re-entered node back to itself.
    pub cycle: Vec<String>,
}

/// Errors returned by `WorkflowEngine`.
///
/// Node failures and condition errors never surface here; they are recorded
/// in the `WorkflowResult` of the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// `cancel` was called for a run that is not in flight.
    #[error("run not found: {0}")]
    RunNotFound(Uuid),
}
