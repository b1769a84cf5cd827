//! Triform CLI entry point.
//!
//! Binary name: `triform`
//!
//! Parses CLI arguments, initializes tracing and the engine, then dispatches
//! to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    triform_observe::init_tracing(cli.log_directives(), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    triform_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "triform", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Validate { file } => cli::workflow::validate(&state, &file, json),
        Commands::Run { file } => cli::workflow::run(&state, &file, json, cli.quiet).await,
        Commands::Resume { file } => cli::workflow::resume(&state, &file, json, cli.quiet).await,
        Commands::Status { file } => cli::workflow::status(&state, &file, json).await,
        Commands::Lineage {
            artifact,
            forward,
            depth,
        } => cli::provenance::lineage(&state, &artifact, forward, depth, json).await,
        Commands::Verify { workflow_id } => {
            cli::provenance::verify(&state, &workflow_id, json).await
        }
        Commands::Mode(args) => cli::representation::mode(&state, &args, json).await,
        Commands::Convert { file, to, out } => {
            cli::representation::convert(&state, &file, to, out.as_deref(), json).await
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
