//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::planner::PlanAction;

/// Convergent - declarative resource reconciliation.
#[derive(Parser, Debug)]
#[command(name = "convergent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CONVERGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// List registered resource kinds.
    Schemas {
        /// Show the field table of one kind.
        kind: Option<String>,
    },

    /// Compute and display the plan for every resource.
    Plan {
        /// Fail unless every resource plans to this action.
        #[arg(long, value_parser = PlanAction::from_str)]
        expect: Option<PlanAction>,

        /// Show field-level changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the plan and verify convergence.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Import an existing resource and print its desired state.
    Import {
        /// Resource kind.
        kind: String,

        /// Remote identifier.
        id: String,

        /// Manifest name for the printed entry.
        #[arg(long)]
        name: Option<String>,
    },

    /// Check that managed resources have not drifted.
    Verify {
        /// Also check that each resource imports back to its desired state.
        #[arg(long)]
        import: bool,
    },

    /// Report drift between the manifest and the remote without applying.
    Drift,

    /// Delete every managed resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect the local journal.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Journal subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the journal.
    Show,

    /// Delete the journal.
    Clear {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_plan_expect() {
        let cli = Cli::try_parse_from(["convergent", "plan", "--expect", "no-op"]).unwrap();
        match cli.command {
            Commands::Plan { expect, detailed } => {
                assert_eq!(expect, Some(PlanAction::NoOp));
                assert!(!detailed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_expect() {
        assert!(Cli::try_parse_from(["convergent", "plan", "--expect", "rebuild"]).is_err());
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from([
            "convergent",
            "--output",
            "json",
            "import",
            "dataplex_datascan",
            "projects/p/locations/us-central1/dataScans/full",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Import { ref kind, .. } if kind == "dataplex_datascan"));
    }
}
