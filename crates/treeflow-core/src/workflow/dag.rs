//! Cycle detection and topological ordering.
//!
//! An iterative depth-first search with three colours (unvisited,
//! in-progress, done) walks the graph from every node in ascending ID order.
//! Reaching an in-progress node means a back-edge, and the DFS stack at that
//! moment holds the cycle. `topological_order` runs Kahn's algorithm once the
//! graph is known to be acyclic.

use std::collections::{BTreeSet, HashMap};

use super::error::CycleError;
use super::graph::GraphModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    Unvisited,
    InProgress,
    Done,
}

/// Fail with the offending node chain if the edge set has a directed cycle.
pub fn validate_acyclic(graph: &GraphModel) -> Result<(), CycleError> {
    let mut colour: HashMap<&str, Colour> = graph
        .nodes()
        .map(|n| (n.id.as_str(), Colour::Unvisited))
        .collect();

    let roots: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
    for root in roots {
        if colour.get(root) != Some(&Colour::Unvisited) {
            continue;
        }

        // (node, position in its outgoing edge list)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        colour.insert(root, Colour::InProgress);

        while let Some(frame) = stack.last_mut() {
            let (node_id, cursor) = *frame;
            let outgoing = graph.outgoing(node_id);

            let Some(&edge_idx) = outgoing.get(cursor) else {
                colour.insert(node_id, Colour::Done);
                stack.pop();
                continue;
            };
            frame.1 += 1;

            let Some(edge) = graph.edge(edge_idx) else {
                continue;
            };
            let next = edge.to_node.as_str();
            match colour.get(next).copied() {
                Some(Colour::Unvisited) => {
                    colour.insert(next, Colour::InProgress);
                    stack.push((next, 0));
                }
                Some(Colour::InProgress) => {
                    let start = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                    cycle.push(next.to_string());
                    return Err(CycleError { cycle });
                }
                Some(Colour::Done) | None => {}
            }
        }
    }

    Ok(())
}

/// Node IDs ordered so that every edge points forward.
///
/// Among nodes that are ready at the same time the smallest ID comes first,
/// so the order is stable for a given graph.
pub fn topological_order(graph: &GraphModel) -> Result<Vec<String>, CycleError> {
    validate_acyclic(graph)?;

    let mut in_degree: HashMap<&str, usize> = graph
        .nodes()
        .map(|n| (n.id.as_str(), graph.incoming(&n.id).len()))
        .collect();
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for &edge_idx in graph.outgoing(id) {
            let Some(edge) = graph.edge(edge_idx) else {
                continue;
            };
            if let Some(d) = in_degree.get_mut(edge.to_node.as_str()) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(edge.to_node.as_str());
                }
            }
        }
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
