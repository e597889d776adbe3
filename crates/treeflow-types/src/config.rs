//! Engine settings for treeflow.
//!
//! `EngineSettings` controls scheduler concurrency and timeouts. It is usually
//! loaded from a `treeflow.toml` file; every field has a default.

use serde::{Deserialize, Serialize};

/// Tunables for the execution scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of nodes running at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Upper bound for a single executor or database search call, in seconds.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,

    /// Upper bound for a whole run, in seconds.
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,

    /// Capacity of the lifecycle event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_workflow_timeout_secs() -> u64 {
    1800
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            node_timeout_secs: default_node_timeout_secs(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineSettings {
    /// Check that every limit is usable.
    ///
    /// Returns a description of the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.node_timeout_secs == 0 {
            return Err("node_timeout_secs must be at least 1".to_string());
        }
        if self.workflow_timeout_secs == 0 {
            return Err("workflow_timeout_secs must be at least 1".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}
