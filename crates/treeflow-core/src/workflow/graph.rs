//! Immutable in-memory workflow graph.
//!
//! `GraphModel::build` validates a `WorkflowConfig` and produces an arena of
//! nodes keyed by ID, the edge list, and adjacency lists of edge indices.
//! Structural problems are `ConfigError`s. Semantic oddities that do not stop
//! a run (unreachable nodes, leaf nodes with children, broken regexes) are
//! collected as `GraphWarning`s.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;

use treeflow_types::workflow::{InputConfig, NodeKind, WorkflowConfig};

use super::condition::{Condition, ConditionError};
use super::error::ConfigError;

/// A validated node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: NodeKind,
    pub prompt: String,
    /// Conditions kept for editor correlation, addressed by index.
    pub outgoing_conditions: Vec<Condition>,
    pub database_connection: Option<String>,
}

/// A validated directed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
    /// `None` means always active.
    pub condition: Option<Condition>,
    pub input_config: InputConfig,
}

/// Non-fatal findings about a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    /// No path leads to this node from any start node.
    Unreachable { node_id: String },
    /// A start node has incoming edges; they are ignored for scheduling.
    StartHasIncoming { node_id: String },
    /// A leaf node has outgoing edges.
    LeafHasOutgoing { node_id: String },
    /// A regex condition does not compile and will always be inactive.
    InvalidRegex {
        edge_index: usize,
        pattern: String,
        message: String,
    },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::Unreachable { node_id } => {
                write!(f, "node '{node_id}' is not reachable from any start node")
            }
            GraphWarning::StartHasIncoming { node_id } => {
                write!(f, "start node '{node_id}' has incoming edges (ignored)")
            }
            GraphWarning::LeafHasOutgoing { node_id } => {
                write!(f, "leaf node '{node_id}' has outgoing edges")
            }
            GraphWarning::InvalidRegex {
                edge_index,
                pattern,
                message,
            } => write!(
                f,
                "edge {edge_index} has invalid regex '{pattern}' (always inactive): {message}"
            ),
        }
    }
}

/// Validated workflow graph, shared read-only by the scheduler.
#[derive(Debug, Clone)]
pub struct GraphModel {
    workflow_id: String,
    workflow_name: String,
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    warnings: Vec<GraphWarning>,
}

impl GraphModel {
    /// Build and structurally validate a graph from configuration.
    ///
    /// Does not check for cycles; see [`super::dag::validate_acyclic`].
    pub fn build(config: &WorkflowConfig) -> Result<Self, ConfigError> {
        let mut nodes = BTreeMap::new();
        let mut seen = HashSet::new();

        for (key, nc) in &config.nodes {
            if nc.id.trim().is_empty() {
                return Err(ConfigError::EmptyNodeId { key: key.clone() });
            }
            if !seen.insert(nc.id.as_str()) {
                return Err(ConfigError::DuplicateNodeId(nc.id.clone()));
            }
            if *key != nc.id {
                return Err(ConfigError::NodeIdMismatch {
                    key: key.clone(),
                    id: nc.id.clone(),
                });
            }

            let kind: NodeKind = nc.node_type.parse().map_err(|_| ConfigError::InvalidNodeType {
                node_id: nc.id.clone(),
                value: nc.node_type.clone(),
            })?;

            let outgoing_conditions = nc
                .conditions
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Condition::from_config(c).map_err(|message| ConfigError::InvalidCondition {
                        location: format!("node '{}' condition {i}", nc.id),
                        message,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            nodes.insert(
                nc.id.clone(),
                Node {
                    id: nc.id.clone(),
                    name: nc.name.clone(),
                    description: nc.description.clone(),
                    kind,
                    prompt: nc.prompt.clone(),
                    outgoing_conditions,
                    database_connection: nc.database_connection.clone(),
                },
            );
        }

        let mut edges = Vec::with_capacity(config.edges.len());
        for (i, ec) in config.edges.iter().enumerate() {
            for endpoint in [&ec.from_node, &ec.to_node] {
                if !nodes.contains_key(endpoint) {
                    return Err(ConfigError::UnknownNodeReference {
                        edge_index: i,
                        node_id: endpoint.clone(),
                    });
                }
            }
            let condition = ec
                .condition
                .as_ref()
                .map(Condition::from_config)
                .transpose()
                .map_err(|message| ConfigError::InvalidCondition {
                    location: format!("edge {i} ({} -> {})", ec.from_node, ec.to_node),
                    message,
                })?;
            edges.push(Edge {
                from_node: ec.from_node.clone(),
                to_node: ec.to_node.clone(),
                condition,
                input_config: ec.input_config.clone(),
            });
        }

        if !nodes.values().any(|n| n.kind == NodeKind::Start) {
            return Err(ConfigError::NoStartNode);
        }

        let mut outgoing: HashMap<String, Vec<usize>> =
            nodes.keys().map(|id| (id.clone(), Vec::new())).collect();
        let mut incoming = outgoing.clone();
        for (i, edge) in edges.iter().enumerate() {
            if let Some(list) = outgoing.get_mut(&edge.from_node) {
                list.push(i);
            }
            if let Some(list) = incoming.get_mut(&edge.to_node) {
                list.push(i);
            }
        }

        let mut graph = Self {
            workflow_id: config.id.clone(),
            workflow_name: config.name.clone(),
            nodes,
            edges,
            outgoing,
            incoming,
            warnings: Vec::new(),
        };
        graph.warnings = graph.collect_warnings();
        Ok(graph)
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Nodes in ascending ID order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Indices of edges leaving `id`, in declaration order.
    pub fn outgoing(&self, id: &str) -> &[usize] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices of edges entering `id`, in declaration order.
    pub fn incoming(&self, id: &str) -> &[usize] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges that count for scheduling. Start nodes have none.
    pub fn effective_incoming(&self, id: &str) -> &[usize] {
        match self.nodes.get(id) {
            Some(node) if node.kind == NodeKind::Start => &[],
            _ => self.incoming(id),
        }
    }

    /// IDs of start nodes in ascending order.
    pub fn start_nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(|n| n.kind == NodeKind::Start)
            .map(|n| n.id.as_str())
    }

    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    fn collect_warnings(&self) -> Vec<GraphWarning> {
        let mut warnings = Vec::new();

        let mut pg = DiGraph::<&str, ()>::new();
        let index: BTreeMap<&str, _> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), pg.add_node(id.as_str())))
            .collect();
        for edge in &self.edges {
            pg.add_edge(
                index[edge.from_node.as_str()],
                index[edge.to_node.as_str()],
                (),
            );
        }

        let mut reachable = BTreeSet::new();
        for start in self.start_nodes() {
            let mut dfs = Dfs::new(&pg, index[start]);
            while let Some(nx) = dfs.next(&pg) {
                reachable.insert(pg[nx]);
            }
        }

        for node in self.nodes.values() {
            let id = node.id.as_str();
            if !reachable.contains(id) {
                warnings.push(GraphWarning::Unreachable {
                    node_id: node.id.clone(),
                });
            }
            match node.kind {
                NodeKind::Start if !self.incoming(id).is_empty() => {
                    warnings.push(GraphWarning::StartHasIncoming {
                        node_id: node.id.clone(),
                    });
                }
                NodeKind::Leaf if !self.outgoing(id).is_empty() => {
                    warnings.push(GraphWarning::LeafHasOutgoing {
                        node_id: node.id.clone(),
                    });
                }
                _ => {}
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            if let Some(Err(e)) = edge.condition.as_ref().map(Condition::check_pattern) {
                let ConditionError::InvalidRegex { pattern, message } = e;
                warnings.push(GraphWarning::InvalidRegex {
                    edge_index: i,
                    pattern,
                    message,
                });
            }
        }

        warnings
    }
}
