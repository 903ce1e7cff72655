//! flowgate CLI entry point.
//!
//! Binary name: `flowgate`
//!
//! Parses CLI arguments, sets up tracing, loads the config and workflows, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use flowgate_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,flowgate_core=debug,flowgate_infra=debug",
        _ => "trace",
    };
    init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Shell completions and validation don't need app state
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "flowgate", &mut std::io::stdout());
            Ok(())
        }

        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json),

        Commands::List => {
            let state = AppState::init(&cli.config, cli.workflows.as_deref()).await?;
            cli::workflow::handle_list(&state, cli.json)
        }

        Commands::Run {
            name,
            vars,
            parallel,
            sequential,
        } => {
            let state = AppState::init(&cli.config, cli.workflows.as_deref()).await?;
            let parallel = parallel || (state.config.default_parallel && !sequential);
            cli::workflow::handle_run(
                &state,
                &name,
                vars.as_deref(),
                parallel,
                cli.json,
                cli.quiet,
            )
            .await
        }
    }
}
