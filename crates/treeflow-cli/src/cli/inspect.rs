//! `treeflow inspect`: nodes in execution order with their edges.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use treeflow_core::workflow::dag::topological_order;
use treeflow_core::workflow::{Edge, GraphModel};

use super::load_graph;

pub fn inspect_workflow(file: &Path, json: bool) -> Result<()> {
    let graph = load_graph(file)?;
    let order = topological_order(&graph)?;

    if json {
        let nodes: Vec<_> = order.iter().filter_map(|id| node_json(&graph, id)).collect();
        let out = serde_json::json!({
            "workflow_id": graph.workflow_id(),
            "name": graph.workflow_name(),
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Name"),
            Cell::new("Incoming"),
            Cell::new("Outgoing"),
        ]);

    for id in &order {
        let Some(node) = graph.node(id) else { continue };
        let incoming = graph
            .incoming(id)
            .iter()
            .filter_map(|&i| graph.edge(i))
            .map(|e| describe_edge(&e.from_node, e))
            .collect::<Vec<_>>()
            .join("\n");
        let outgoing = graph
            .outgoing(id)
            .iter()
            .filter_map(|&i| graph.edge(i))
            .map(|e| describe_edge(&e.to_node, e))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.kind.to_string()),
            Cell::new(&node.name),
            Cell::new(incoming),
            Cell::new(outgoing),
        ]);
    }

    println!();
    println!(
        "  {} ({})",
        style(graph.workflow_name()).cyan().bold(),
        graph.workflow_id()
    );
    println!("{table}");
    for warning in graph.warnings() {
        println!("  {} {warning}", style("!").yellow().bold());
    }
    println!();
    Ok(())
}

/// `peer` plus the edge condition, if any.
fn describe_edge(peer: &str, edge: &Edge) -> String {
    match &edge.condition {
        Some(condition) => format!("{peer} [{condition}]"),
        None => peer.to_string(),
    }
}

fn node_json(graph: &GraphModel, id: &str) -> Option<serde_json::Value> {
    let node = graph.node(id)?;
    let edges = |indices: &[usize], peer: fn(&Edge) -> &str| {
        indices
            .iter()
            .filter_map(|&i| graph.edge(i))
            .map(|e| {
                serde_json::json!({
                    "node": peer(e),
                    "condition": e.condition.as_ref().map(ToString::to_string),
                })
            })
            .collect::<Vec<_>>()
    };
    Some(serde_json::json!({
        "id": node.id,
        "name": node.name,
        "kind": node.kind.to_string(),
        "database_connection": node.database_connection,
        "incoming": edges(graph.incoming(id), |e| e.from_node.as_str()),
        "outgoing": edges(graph.outgoing(id), |e| e.to_node.as_str()),
    }))
}
