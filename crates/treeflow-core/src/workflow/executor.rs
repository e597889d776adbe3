//! Node executor and database searcher abstractions.
//!
//! Both collaborators use native async fn in traits (RPITIT). Because RPITIT
//! traits are not object-safe, each one has a `*Dyn` companion with boxed
//! futures, a blanket impl, and a cloneable `Box*` wrapper that the scheduler
//! hands to spawned tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use treeflow_types::workflow::NodeKind;

use super::graph::Node;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A node failed to produce output. The node is marked FAILED; the run goes on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The executor reported a failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The database searcher reported a failure.
    #[error("database search failed: {0}")]
    Search(String),

    /// The executor or searcher did not finish in time.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The task running the node panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// NodeExecutor
// ---------------------------------------------------------------------------

/// Produces a node's output from its composed input (typically an LLM call).
pub trait NodeExecutor: Send + Sync {
    fn execute(
        &self,
        node: &Node,
        input: &str,
    ) -> impl Future<Output = Result<String, NodeError>> + Send;
}

/// Object-safe version of [`NodeExecutor`] with boxed futures.
pub trait NodeExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        node: &'a Node,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, NodeError>> + Send + 'a>>;
}

impl<T: NodeExecutor> NodeExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        node: &'a Node,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, NodeError>> + Send + 'a>> {
        Box::pin(self.execute(node, input))
    }
}

/// Type-erased, cheaply cloneable node executor.
#[derive(Clone)]
pub struct BoxNodeExecutor {
    inner: Arc<dyn NodeExecutorDyn>,
}

impl BoxNodeExecutor {
    pub fn new<T: NodeExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute(&self, node: &Node, input: &str) -> Result<String, NodeError> {
        self.inner.execute_boxed(node, input).await
    }
}

impl std::fmt::Debug for BoxNodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxNodeExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DatabaseSearcher
// ---------------------------------------------------------------------------

/// Looks up context for a node in a named database connection.
pub trait DatabaseSearcher: Send + Sync {
    fn search(
        &self,
        connection: &str,
        query: &str,
    ) -> impl Future<Output = Result<String, NodeError>> + Send;
}

/// Object-safe version of [`DatabaseSearcher`] with boxed futures.
pub trait DatabaseSearcherDyn: Send + Sync {
    fn search_boxed<'a>(
        &'a self,
        connection: &'a str,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, NodeError>> + Send + 'a>>;
}

impl<T: DatabaseSearcher> DatabaseSearcherDyn for T {
    fn search_boxed<'a>(
        &'a self,
        connection: &'a str,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, NodeError>> + Send + 'a>> {
        Box::pin(self.search(connection, query))
    }
}

/// Type-erased, cheaply cloneable database searcher.
#[derive(Clone)]
pub struct BoxDatabaseSearcher {
    inner: Arc<dyn DatabaseSearcherDyn>,
}

impl BoxDatabaseSearcher {
    pub fn new<T: DatabaseSearcher + 'static>(searcher: T) -> Self {
        Self {
            inner: Arc::new(searcher),
        }
    }

    pub async fn search(&self, connection: &str, query: &str) -> Result<String, NodeError> {
        self.inner.search_boxed(connection, query).await
    }
}

impl std::fmt::Debug for BoxDatabaseSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDatabaseSearcher").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Stub implementations
// ---------------------------------------------------------------------------

/// Deterministic executor that describes what it was given.
///
/// Used when no model is wired in, e.g. by the CLI for dry runs.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor {
    /// Artificial latency per call.
    pub delay: Option<Duration>,
}

/// Number of input characters quoted in an echo.
const ECHO_EXCERPT_CHARS: usize = 30;

impl NodeExecutor for EchoExecutor {
    async fn execute(&self, node: &Node, input: &str) -> Result<String, NodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let excerpt: String = input.chars().take(ECHO_EXCERPT_CHARS).collect();
        let ellipsis = if input.chars().count() > ECHO_EXCERPT_CHARS {
            "..."
        } else {
            ""
        };
        Ok(match node.kind {
            NodeKind::Start => format!("{} started: {excerpt}{ellipsis}", node.name),
            NodeKind::Intermediate => {
                format!("{} processed: {excerpt}{ellipsis}", node.name)
            }
            NodeKind::Leaf => format!("final result from {}: {excerpt}{ellipsis}", node.name),
        })
    }
}

/// Searcher that returns a fixed marker for the connection.
#[derive(Debug, Clone, Default)]
pub struct EchoSearcher;

impl DatabaseSearcher for EchoSearcher {
    async fn search(&self, connection: &str, query: &str) -> Result<String, NodeError> {
        tracing::debug!(connection, query, "echo database search");
        Ok(format!("results from {connection}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind, name: &str) -> Node {
        Node {
            id: name.to_lowercase(),
            name: name.to_string(),
            description: String::new(),
            kind,
            prompt: String::new(),
            outgoing_conditions: Vec::new(),
            database_connection: None,
        }
    }

    struct Upper;

    impl NodeExecutor for Upper {
        async fn execute(&self, _node: &Node, input: &str) -> Result<String, NodeError> {
            Ok(input.to_uppercase())
        }
    }

    struct Broken;

    impl DatabaseSearcher for Broken {
        async fn search(&self, connection: &str, _query: &str) -> Result<String, NodeError> {
            Err(NodeError::Search(format!("{connection} offline")))
        }
    }

    #[tokio::test]
    async fn test_box_executor_delegates() {
        let exec = BoxNodeExecutor::new(Upper);
        let cloned = exec.clone();
        let out = cloned.execute(&node(NodeKind::Leaf, "L"), "abc").await.unwrap();
        assert_eq!(out, "ABC");
    }

    #[tokio::test]
    async fn test_box_searcher_propagates_error() {
        let searcher = BoxDatabaseSearcher::new(Broken);
        let err = searcher.search("kb", "q").await.unwrap_err();
        assert_eq!(err, NodeError::Search("kb offline".to_string()));
        assert_eq!(err.to_string(), "database search failed: kb offline");
    }

    #[tokio::test]
    async fn test_echo_executor_by_kind() {
        let exec = EchoExecutor::default();
        let start = exec.execute(&node(NodeKind::Start, "Entry"), "go").await.unwrap();
        assert_eq!(start, "Entry started: go");

        let long = "x".repeat(40);
        let leaf = exec.execute(&node(NodeKind::Leaf, "Out"), &long).await.unwrap();
        assert_eq!(leaf, format!("final result from Out: {}...", "x".repeat(30)));
    }

    #[tokio::test]
    async fn test_echo_searcher() {
        let out = EchoSearcher.search("docs", "anything").await.unwrap();
        assert_eq!(out, "results from docs");
    }

    #[test]
    fn test_node_error_display() {
        assert_eq!(NodeError::Timeout(5).to_string(), "timed out after 5s");
        assert_eq!(
            NodeError::Execution("boom".into()).to_string(),
            "execution failed: boom"
        );
    }
}
