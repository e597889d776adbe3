//! Per-run result accumulation.
//!
//! The scheduler reports every terminal node transition here. Entries are
//! append-only and each node is recorded at most once.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use treeflow_types::workflow::{ExecutionLogEntry, NodeStatus, RunStatus, WorkflowResult};

/// Wall-clock bounds of one node execution.
#[derive(Debug, Clone, Copy)]
pub struct NodeTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NodeTiming {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Accumulates results for a single run and produces the `WorkflowResult`.
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: Uuid,
    workflow_id: String,
    workflow_name: String,
    total_nodes: usize,
    started_at: DateTime<Utc>,
    results: BTreeMap<String, String>,
    log: Vec<ExecutionLogEntry>,
    completed: usize,
    failed: usize,
    skipped: usize,
}

impl ResultAggregator {
    /// Begin recording a run.
    pub fn on_start(
        run_id: Uuid,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        total_nodes: usize,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            total_nodes,
            started_at: Utc::now(),
            results: BTreeMap::new(),
            log: Vec::with_capacity(total_nodes),
            completed: 0,
            failed: 0,
            skipped: 0,
        }
    }

    /// Whether a terminal entry already exists for `node_id`.
    pub fn is_recorded(&self, node_id: &str) -> bool {
        self.log.iter().any(|e| e.node_id == node_id)
    }

    pub fn on_node_complete(
        &mut self,
        node_id: &str,
        output: String,
        timing: NodeTiming,
        condition_errors: Vec<String>,
    ) {
        if self.reject_duplicate(node_id) {
            return;
        }
        self.results.insert(node_id.to_string(), output);
        self.completed += 1;
        self.log.push(ExecutionLogEntry {
            node_id: node_id.to_string(),
            status: NodeStatus::Completed,
            timestamp: timing.finished_at,
            duration_ms: timing.duration_ms(),
            error: None,
            condition_errors,
        });
    }

    pub fn on_node_fail(
        &mut self,
        node_id: &str,
        error: String,
        timing: NodeTiming,
        condition_errors: Vec<String>,
    ) {
        if self.reject_duplicate(node_id) {
            return;
        }
        self.failed += 1;
        self.log.push(ExecutionLogEntry {
            node_id: node_id.to_string(),
            status: NodeStatus::Failed,
            timestamp: timing.finished_at,
            duration_ms: timing.duration_ms(),
            error: Some(error),
            condition_errors,
        });
    }

    pub fn on_node_skip(&mut self, node_id: &str, reason: &str) {
        if self.reject_duplicate(node_id) {
            return;
        }
        self.skipped += 1;
        self.log.push(ExecutionLogEntry {
            node_id: node_id.to_string(),
            status: NodeStatus::Skipped,
            timestamp: Utc::now(),
            duration_ms: 0,
            error: Some(reason.to_string()),
            condition_errors: Vec::new(),
        });
    }

    /// Close the run and produce its result.
    pub fn finalize(self, status: RunStatus, error: Option<String>) -> WorkflowResult {
        WorkflowResult {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            status,
            results: self.results,
            execution_log: self.log,
            total_nodes: self.total_nodes,
            completed_nodes: self.completed,
            failed_nodes: self.failed,
            skipped_nodes: self.skipped,
            started_at: self.started_at,
            completed_at: Utc::now(),
            error,
        }
    }

    fn reject_duplicate(&self, node_id: &str) -> bool {
        let duplicate = self.is_recorded(node_id);
        if duplicate {
            tracing::warn!(
                run_id = %self.run_id,
                node_id,
                "ignoring second terminal record for node"
            );
        }
        duplicate
    }
}
