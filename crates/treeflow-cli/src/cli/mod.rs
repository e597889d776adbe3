//! CLI command definitions for the `treeflow` binary.

pub mod inspect;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;

use treeflow_core::workflow::GraphModel;
use treeflow_core::workflow::dag::validate_acyclic;
use treeflow_core::workflow::definition::load_workflow_file;

/// Validate, inspect and run workflow graphs.
#[derive(Parser)]
#[command(name = "treeflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "TREEFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter implied by `--quiet` and `-v`.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,treeflow_core=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow definition for structural errors and cycles.
    Validate {
        /// Path to a `.yaml`, `.yml` or `.json` definition.
        file: PathBuf,
    },

    /// Run a workflow with the echo executor.
    Run {
        /// Path to a `.yaml`, `.yml` or `.json` definition.
        file: PathBuf,

        /// Engine settings file (TOML).
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Force these nodes to fail (repeatable).
        #[arg(long = "fail", value_name = "NODE_ID")]
        fail: Vec<String>,
    },

    /// Show nodes in execution order with their edges.
    Inspect {
        /// Path to a `.yaml`, `.yml` or `.json` definition.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Load a definition file and build an acyclic graph from it.
pub(crate) fn load_graph(file: &std::path::Path) -> Result<GraphModel> {
    let config = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow from {}", file.display()))?;
    let graph = GraphModel::build(&config).context("invalid workflow definition")?;
    validate_acyclic(&graph).context("invalid workflow graph")?;
    Ok(graph)
}
