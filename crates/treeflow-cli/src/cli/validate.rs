//! `treeflow validate`: structural and cycle checks for a definition file.

use std::path::Path;

use anyhow::Result;
use console::style;

use treeflow_core::workflow::GraphModel;

use super::load_graph;

/// Validate a definition file. Errors propagate as a non-zero exit.
pub fn validate_workflow(file: &Path, json: bool) -> Result<()> {
    let graph = load_graph(file)?;
    let report = report_json(&graph);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(graph.workflow_name()).cyan()
    );
    println!("  ID: {}", graph.workflow_id());
    println!("  Nodes: {}", graph.node_count());
    println!("  Edges: {}", graph.edges().len());
    println!(
        "  Start nodes: {}",
        graph.start_nodes().collect::<Vec<_>>().join(", ")
    );
    if !graph.warnings().is_empty() {
        println!();
        for warning in graph.warnings() {
            println!("  {} {warning}", style("!").yellow().bold());
        }
    }
    println!();
    Ok(())
}

fn report_json(graph: &GraphModel) -> serde_json::Value {
    serde_json::json!({
        "valid": true,
        "workflow_id": graph.workflow_id(),
        "name": graph.workflow_name(),
        "nodes": graph.node_count(),
        "edges": graph.edges().len(),
        "start_nodes": graph.start_nodes().collect::<Vec<_>>(),
        "warnings": graph.warnings().iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}
