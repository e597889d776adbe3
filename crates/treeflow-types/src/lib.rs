//! Shared domain types for treeflow.
//!
//! This crate contains the types exchanged between the engine and its
//! callers: workflow configuration as it arrives from storage, engine
//! settings, run results, and lifecycle events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod workflow;
