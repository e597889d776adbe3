//! `treeflow run`: execute a definition with the echo executor.
//!
//! Nodes listed with `--fail` are forced to fail so failure routing can be
//! tried out without a real model. Ctrl+C cancels the run.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use treeflow_core::config::load_engine_settings;
use treeflow_core::workflow::executor::{
    BoxDatabaseSearcher, BoxNodeExecutor, EchoExecutor, EchoSearcher, NodeError, NodeExecutor,
};
use treeflow_core::workflow::{Node, WorkflowEngine};
use treeflow_types::config::EngineSettings;
use treeflow_types::event::WorkflowEvent;
use treeflow_types::workflow::{NodeStatus, WorkflowResult};

use super::load_graph;

/// Echo executor that fails for a fixed set of node IDs.
#[derive(Debug, Clone, Default)]
pub struct ForcedFailureExecutor {
    inner: EchoExecutor,
    fail: BTreeSet<String>,
}

impl ForcedFailureExecutor {
    pub fn new(fail: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: EchoExecutor::default(),
            fail: fail.into_iter().collect(),
        }
    }
}

impl NodeExecutor for ForcedFailureExecutor {
    async fn execute(&self, node: &Node, input: &str) -> Result<String, NodeError> {
        if self.fail.contains(&node.id) {
            return Err(NodeError::Execution(format!(
                "forced failure for node '{}'",
                node.id
            )));
        }
        self.inner.execute(node, input).await
    }
}

pub async fn run_workflow(
    file: &Path,
    settings_path: Option<&Path>,
    fail: Vec<String>,
    json: bool,
) -> Result<()> {
    let graph = Arc::new(load_graph(file)?);

    for id in &fail {
        if graph.node(id).is_none() {
            tracing::warn!(node_id = %id, "--fail names a node that is not in the workflow");
        }
    }

    let settings = match settings_path {
        Some(path) => load_engine_settings(path).await,
        None => EngineSettings::default(),
    };

    let engine = WorkflowEngine::new(BoxNodeExecutor::new(ForcedFailureExecutor::new(fail)))
        .with_settings(settings)
        .with_searcher(BoxDatabaseSearcher::new(EchoSearcher));

    let progress = (!json).then(|| tokio::spawn(print_progress(engine.event_bus().subscribe())));

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = engine
        .execute_with_cancel(graph, cancel)
        .await
        .context("workflow run failed")?;
    interrupt.abort();

    // Dropping the engine closes the bus, which ends the progress printer.
    drop(engine);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if json {
        let out = serde_json::json!({
            "result": result,
            "summary": summary_json(&result),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

async fn print_progress(mut rx: broadcast::Receiver<WorkflowEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            WorkflowEvent::RunStarted {
                run_id,
                workflow_id,
                total_nodes,
            } => eprintln!(
                "  {} run {run_id} of '{workflow_id}' ({total_nodes} nodes)",
                style(">").cyan().bold()
            ),
            WorkflowEvent::NodeStarted { node_id, .. } => {
                eprintln!("    {} {node_id}", style("started").dim())
            }
            WorkflowEvent::NodeCompleted {
                node_id,
                duration_ms,
                ..
            } => eprintln!("    {} {node_id} ({duration_ms}ms)", style("done").green()),
            WorkflowEvent::NodeFailed { node_id, error, .. } => {
                eprintln!("    {} {node_id}: {error}", style("failed").red())
            }
            WorkflowEvent::NodeSkipped {
                node_id, reason, ..
            } => eprintln!("    {} {node_id}: {reason}", style("skipped").yellow()),
            WorkflowEvent::RunFinished { .. } => break,
        }
    }
}

fn summary_json(result: &WorkflowResult) -> serde_json::Value {
    let summary = result.summary();
    serde_json::json!({
        "status": summary.status.to_string(),
        "description": summary.status_description(),
        "executed": summary.executed_count(),
        "success_rate": summary.success_rate(),
        "execution_rate": summary.execution_rate(),
        "duration_ms": result.duration_ms(),
    })
}

fn status_cell(status: NodeStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        NodeStatus::Completed => cell.fg(Color::Green),
        NodeStatus::Failed => cell.fg(Color::Red),
        NodeStatus::Skipped => cell.fg(Color::Yellow),
        _ => cell,
    }
}

fn print_result(result: &WorkflowResult) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Output / Error"),
        ]);

    for entry in &result.execution_log {
        let mut detail = match entry.status {
            NodeStatus::Completed => result.results.get(&entry.node_id).cloned().unwrap_or_default(),
            _ => entry.error.clone().unwrap_or_default(),
        };
        for condition_error in &entry.condition_errors {
            detail.push_str(&format!("\ncondition: {condition_error}"));
        }
        table.add_row(vec![
            Cell::new(&entry.node_id),
            status_cell(entry.status),
            Cell::new(format!("{}ms", entry.duration_ms)),
            Cell::new(detail),
        ]);
    }

    let summary = result.summary();
    let marker = if summary.is_failed() {
        style("!").red().bold()
    } else {
        style("*").green().bold()
    };

    println!();
    println!(
        "  {marker} {} ({}) {}",
        style(&result.workflow_name).cyan(),
        result.run_id,
        style(result.status).bold()
    );
    println!("{table}");
    println!("  {}", summary.status_description());
    println!(
        "  Success rate: {:.0}%  Execution rate: {:.0}%  Duration: {}ms",
        summary.success_rate() * 100.0,
        summary.execution_rate() * 100.0,
        result.duration_ms()
    );
    if let Some(error) = &result.error {
        println!("  Error: {}", style(error).red());
    }
    println!();
}
