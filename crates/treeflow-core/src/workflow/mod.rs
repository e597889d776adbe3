//! Workflow engine core.
//!
//! - `graph` -- validated in-memory graph built from configuration
//! - `dag` -- cycle detection and topological ordering
//! - `condition` -- string-match edge conditions
//! - `compose` -- input composition for a node about to run
//! - `executor` -- node executor and database searcher traits, stubs
//! - `aggregator` -- per-run result accumulation
//! - `scheduler` -- event-driven execution engine
//! - `definition` -- YAML/JSON definition files
//! - `error` -- configuration, cycle and engine errors

pub mod aggregator;
pub mod compose;
pub mod condition;
pub mod dag;
pub mod definition;
pub mod error;
pub mod executor;
pub mod graph;
pub mod scheduler;

pub use error::{ConfigError, CycleError, EngineError};
pub use graph::{Edge, GraphModel, GraphWarning, Node};
pub use scheduler::WorkflowEngine;
