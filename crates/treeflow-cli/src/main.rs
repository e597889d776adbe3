//! treeflow command-line entry point.
//!
//! Binary name: `treeflow`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handlers in [`cli`].

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use treeflow_observe::{TracingOptions, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "treeflow", &mut std::io::stdout());
        return Ok(());
    }

    let options = TracingOptions {
        default_directive: cli.log_directive().to_string(),
        json: cli.json,
        otel: cli.otel,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let outcome = dispatch(cli).await;
    shutdown_tracing();
    outcome
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { file } => cli::validate::validate_workflow(&file, cli.json),
        Commands::Run {
            file,
            settings,
            fail,
        } => cli::run::run_workflow(&file, settings.as_deref(), fail, cli.json).await,
        Commands::Inspect { file } => cli::inspect::inspect_workflow(&file, cli.json),
        Commands::Completions { .. } => Ok(()),
    }
}
