//! Workflow execution engine for treeflow.
//!
//! Builds and validates workflow graphs, then runs them with an injected
//! node executor. Depends only on `treeflow-types` for shared data; model
//! calls and database lookups arrive through the traits in
//! [`workflow::executor`].

pub mod config;
pub mod event;
pub mod workflow;
