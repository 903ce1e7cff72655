//! CLI command definitions for the `flowgate` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run dependency-ordered command workflows.
#[derive(Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the engine config file.
    #[arg(long, global = true, env = "FLOWGATE_CONFIG", default_value = "flowgate.toml")]
    pub config: PathBuf,

    /// Directory containing workflow files (overrides the config).
    #[arg(long, global = true, env = "FLOWGATE_WORKFLOWS")]
    pub workflows: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered workflows.
    #[command(alias = "ls")]
    List,

    /// Run a workflow and print its step results.
    Run {
        /// Workflow name (file stem in the workflows directory).
        name: String,

        /// JSON object of variables overriding the workflow defaults.
        #[arg(long)]
        vars: Option<String>,

        /// Run independent steps concurrently, layer by layer.
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Run steps one at a time even if the config defaults to parallel.
        #[arg(long)]
        sequential: bool,
    },

    /// Check a workflow file without running it.
    Validate {
        /// Path to a `.yaml`, `.yml`, or `.json` workflow file.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_vars_and_mode() {
        let cli = Cli::try_parse_from([
            "flowgate",
            "run",
            "deploy",
            "--vars",
            r#"{"target":"prod"}"#,
            "--parallel",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                name,
                vars,
                parallel,
                sequential,
            } => {
                assert_eq!(name, "deploy");
                assert_eq!(vars.as_deref(), Some(r#"{"target":"prod"}"#));
                assert!(parallel);
                assert!(!sequential);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parallel_and_sequential_conflict() {
        let result =
            Cli::try_parse_from(["flowgate", "run", "x", "--parallel", "--sequential"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["flowgate", "list", "--json", "--workflows", "ops"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.workflows, Some(PathBuf::from("ops")));
        assert!(matches!(cli.command, Commands::List));
    }
}
