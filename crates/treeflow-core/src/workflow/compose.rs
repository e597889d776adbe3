//! Input composition for a node about to run.
//!
//! A node's input is built from its own prompt and the recorded outputs of the
//! sources of its active incoming edges. Inactive edges contribute nothing.

use std::collections::BTreeMap;

use treeflow_types::workflow::{DatabaseSearchInput, NodeKind};

use super::graph::{GraphModel, Node};

/// A database lookup the node wants before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub connection: String,
    pub query: String,
}

/// The text handed to the executor, plus an optional search to run first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedInput {
    pub text: String,
    pub search: Option<SearchRequest>,
}

impl ComposedInput {
    /// Append the searcher's result to the input.
    pub fn with_search_result(mut self, result: &str) -> String {
        let block = format!("Database context:\n{result}");
        if self.text.is_empty() {
            block
        } else {
            self.text.push_str("\n\n");
            self.text.push_str(&block);
            self.text
        }
    }
}

/// Compose the input for `node` from its active incoming edges.
///
/// `active_edges` are edge indices into `graph`; they are read in declaration
/// order regardless of the order given. `results` holds the outputs of
/// completed nodes.
pub fn compose(
    graph: &GraphModel,
    node: &Node,
    active_edges: &[usize],
    results: &BTreeMap<String, String>,
) -> ComposedInput {
    if node.kind == NodeKind::Start || active_edges.is_empty() {
        return ComposedInput {
            text: node.prompt.clone(),
            search: None,
        };
    }

    let mut ordered = active_edges.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    let edges: Vec<_> = ordered.iter().filter_map(|&i| graph.edge(i)).collect();

    let include_prompt = edges.iter().any(|e| e.input_config.include_prompt);

    let mut outputs: Vec<(&str, &str)> = Vec::new();
    for edge in edges.iter().filter(|e| e.input_config.include_previous_output) {
        if let Some(output) = results.get(&edge.from_node) {
            let label = graph
                .node(&edge.from_node)
                .map(|n| n.name.as_str())
                .unwrap_or(edge.from_node.as_str());
            outputs.push((label, output.as_str()));
        }
    }
    let previous = match outputs.as_slice() {
        [] => String::new(),
        [(_, only)] => (*only).to_string(),
        many => many
            .iter()
            .map(|(label, output)| format!("[{label}]\n{output}"))
            .collect::<Vec<_>>()
            .join("\n\n"),
    };

    let mut sections: Vec<&str> = Vec::new();
    if include_prompt && !node.prompt.is_empty() {
        sections.push(&node.prompt);
    }
    if !previous.is_empty() {
        sections.push(&previous);
    }
    let text = sections.join("\n\n");

    let search = edges
        .iter()
        .find(|e| e.input_config.include_database_search)
        .and_then(|edge| {
            let Some(connection) = node.database_connection.clone() else {
                tracing::debug!(
                    node_id = %node.id,
                    "database search requested but node has no database connection"
                );
                return None;
            };
            let query = match edge.input_config.database_search_input {
                DatabaseSearchInput::Prompt => node.prompt.clone(),
                DatabaseSearchInput::PreviousOutput => previous.clone(),
                DatabaseSearchInput::PromptAndPrevious => {
                    prompt_and_previous_query(&node.prompt, &previous)
                }
            };
            Some(SearchRequest { connection, query })
        });

    ComposedInput { text, search }
}

/// `Instruction: <prompt> | Context: <previous>`, leaving out empty parts.
fn prompt_and_previous_query(prompt: &str, previous: &str) -> String {
    let mut parts = Vec::with_capacity(2);
    if !prompt.is_empty() {
        parts.push(format!("Instruction: {prompt}"));
    }
    if !previous.is_empty() {
        parts.push(format!("Context: {previous}"));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::test_support::*;
    use treeflow_types::workflow::InputConfig;

    fn results(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_start_node_uses_prompt_only() {
        let graph = GraphModel::build(&workflow(vec![node("s", "start", "kick off")], vec![]))
            .unwrap();
        let input = compose(&graph, graph.node("s").unwrap(), &[], &BTreeMap::new());
        assert_eq!(input.text, "kick off");
        assert!(input.search.is_none());
    }

    #[test]
    fn test_single_source_is_verbatim() {
        let graph = GraphModel::build(&workflow(
            vec![node("s", "start", ""), node("p", "process", "summarize")],
            vec![edge("s", "p")],
        ))
        .unwrap();
        let input = compose(
            &graph,
            graph.node("p").unwrap(),
            &[0],
            &results(&[("s", "raw text")]),
        );
        assert_eq!(input.text, "summarize\n\nraw text");
    }

    #[test]
    fn test_multiple_sources_are_labelled() {
        let mut a = node("a", "start", "");
        a.name = "Source A".to_string();
        let graph = GraphModel::build(&workflow(
            vec![a, node("b", "start", ""), node("merge", "leaf", "combine")],
            vec![edge("a", "merge"), edge("b", "merge")],
        ))
        .unwrap();
        let input = compose(
            &graph,
            graph.node("merge").unwrap(),
            &[1, 0],
            &results(&[("a", "alpha"), ("b", "beta")]),
        );
        assert_eq!(input.text, "combine\n\n[Source A]\nalpha\n\n[b]\nbeta");
    }

    #[test]
    fn test_prompt_emitted_once_and_flags_respected() {
        let mut e1 = edge("a", "m");
        e1.input_config = InputConfig {
            include_prompt: false,
            include_previous_output: true,
            ..InputConfig::default()
        };
        let mut e2 = edge("b", "m");
        e2.input_config = InputConfig {
            include_prompt: true,
            include_previous_output: false,
            ..InputConfig::default()
        };
        let mut e3 = edge("c", "m");
        e3.input_config.include_prompt = true;
        let graph = GraphModel::build(&workflow(
            vec![
                node("a", "start", ""),
                node("b", "start", ""),
                node("c", "start", ""),
                node("m", "leaf", "merge them"),
            ],
            vec![e1, e2, e3],
        ))
        .unwrap();
        let input = compose(
            &graph,
            graph.node("m").unwrap(),
            &[0, 1, 2],
            &results(&[("a", "from a"), ("b", "from b"), ("c", "from c")]),
        );
        assert_eq!(input.text, "merge them\n\n[a]\nfrom a\n\n[c]\nfrom c");
        assert_eq!(input.text.matches("merge them").count(), 1);
    }

    #[test]
    fn test_only_active_edges_contribute() {
        let graph = GraphModel::build(&workflow(
            vec![node("a", "start", ""), node("b", "start", ""), node("m", "leaf", "")],
            vec![edge("a", "m"), edge("b", "m")],
        ))
        .unwrap();
        let input = compose(
            &graph,
            graph.node("m").unwrap(),
            &[1],
            &results(&[("a", "from a"), ("b", "from b")]),
        );
        assert_eq!(input.text, "from b");
    }

    #[test]
    fn test_database_search_query_forms() {
        let mut target = node("t", "leaf", "find docs");
        target.database_connection = Some("kb".to_string());

        for (mode, expected) in [
            (DatabaseSearchInput::Prompt, "find docs"),
            (DatabaseSearchInput::PreviousOutput, "upstream"),
            (
                DatabaseSearchInput::PromptAndPrevious,
                "Instruction: find docs | Context: upstream",
            ),
        ] {
            let mut e = edge("s", "t");
            e.input_config.include_database_search = true;
            e.input_config.database_search_input = mode;
            let graph = GraphModel::build(&workflow(
                vec![node("s", "start", ""), target.clone()],
                vec![e],
            ))
            .unwrap();
            let input = compose(
                &graph,
                graph.node("t").unwrap(),
                &[0],
                &results(&[("s", "upstream")]),
            );
            assert_eq!(
                input.search,
                Some(SearchRequest {
                    connection: "kb".to_string(),
                    query: expected.to_string(),
                })
            );
        }
    }

    #[test]
    fn test_combined_query_leaves_out_empty_parts() {
        let mut target = node("t", "leaf", "");
        target.database_connection = Some("kb".to_string());
        let mut e = edge("s", "t");
        e.input_config.include_database_search = true;
        e.input_config.database_search_input = DatabaseSearchInput::PromptAndPrevious;
        let graph =
            GraphModel::build(&workflow(vec![node("s", "start", ""), target], vec![e])).unwrap();

        let input = compose(&graph, graph.node("t").unwrap(), &[0], &results(&[("s", "upstream")]));
        assert_eq!(input.search.unwrap().query, "Context: upstream");

        let input = compose(&graph, graph.node("t").unwrap(), &[0], &BTreeMap::new());
        assert_eq!(input.search.unwrap().query, "");

        assert_eq!(prompt_and_previous_query("find", ""), "Instruction: find");
    }

    #[test]
    fn test_database_search_needs_connection() {
        let mut e = edge("s", "t");
        e.input_config.include_database_search = true;
        let graph = GraphModel::build(&workflow(
            vec![node("s", "start", ""), node("t", "leaf", "q")],
            vec![e],
        ))
        .unwrap();
        let input = compose(&graph, graph.node("t").unwrap(), &[0], &results(&[("s", "x")]));
        assert!(input.search.is_none());
    }

    #[test]
    fn test_search_result_is_appended() {
        let input = ComposedInput {
            text: "question".to_string(),
            search: None,
        };
        assert_eq!(
            input.with_search_result("row 1"),
            "question\n\nDatabase context:\nrow 1"
        );
    }
}
