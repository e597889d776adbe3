//! Lifecycle events published during a workflow run.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::RunStatus;

/// Events emitted by the execution engine.
///
/// Subscribers (CLI progress output, logging, an API layer) receive these
/// through the engine's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run has started.
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        total_nodes: usize,
    },

    /// A node has been launched.
    NodeStarted { run_id: Uuid, node_id: String },

    /// A node produced its output.
    NodeCompleted {
        run_id: Uuid,
        node_id: String,
        duration_ms: u64,
    },

    /// A node's executor or search call failed.
    NodeFailed {
        run_id: Uuid,
        node_id: String,
        error: String,
    },

    /// A node was skipped without running.
    NodeSkipped {
        run_id: Uuid,
        node_id: String,
        reason: String,
    },

    /// A run reached its final status.
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        duration_ms: u64,
    },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::NodeStarted { run_id, .. }
            | WorkflowEvent::NodeCompleted { run_id, .. }
            | WorkflowEvent::NodeFailed { run_id, .. }
            | WorkflowEvent::NodeSkipped { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// The node this event concerns, for node-level events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::NodeStarted { node_id, .. }
            | WorkflowEvent::NodeCompleted { node_id, .. }
            | WorkflowEvent::NodeFailed { node_id, .. }
            | WorkflowEvent::NodeSkipped { node_id, .. } => Some(node_id),
            WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunFinished { .. } => None,
        }
    }
}
