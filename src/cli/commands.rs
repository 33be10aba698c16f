//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::resource::ResourceKind;

/// Declarative resource management for a Dokku host.
#[derive(Parser, Debug)]
#[command(name = "dokku-reconcile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest file.
    #[arg(short, long, global = true, env = "DOKKU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

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
    /// Validate the manifest without contacting the host.
    Validate {
        /// Show warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Refresh state and display the plan.
    Plan {
        /// Show attribute-level changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Keep applying independent actions after a failure.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Show recorded resources.
    Status,

    /// Check for changes made on the host outside this tool.
    Drift,

    /// Destroy every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List the apps present on the host.
    Apps,

    /// Show the host's Dokku version and compatibility.
    Version,

    /// Manage the state file.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },

    /// Record a resource that already exists on the host.
    Import {
        /// Kind of resource.
        #[arg(value_enum)]
        kind: ResourceKind,

        /// Manifest key to record it under.
        key: String,

        /// Name on the host; defaults to the declared name.
        remote_name: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
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
    fn test_apply_flags() {
        let cli =
            Cli::try_parse_from(["dokku-reconcile", "apply", "--yes", "--continue-on-error"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                continue_on_error: true
            }
        ));
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dokku-reconcile",
            "state",
            "unlock",
            "--force",
            "--output",
            "json",
            "-c",
            "infra/dokku.yaml",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("infra/dokku.yaml")));
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { lock_id: None, force: true }
            }
        ));
    }

    #[test]
    fn test_state_import_arguments() {
        let cli = Cli::try_parse_from([
            "dokku-reconcile",
            "state",
            "import",
            "service",
            "db",
            "legacy-db",
        ])
        .unwrap();
        let Commands::State {
            command: StateCommands::Import { kind, key, remote_name },
        } = cli.command
        else {
            panic!("expected state import");
        };
        assert_eq!(kind, ResourceKind::Service);
        assert_eq!(key, "db");
        assert_eq!(remote_name.as_deref(), Some("legacy-db"));

        let unknown = Cli::try_parse_from(["dokku-reconcile", "state", "import", "volume", "x"]);
        assert!(unknown.is_err());
    }
}
