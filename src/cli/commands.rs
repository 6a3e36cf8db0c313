//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::resources::ResourceKind;

/// flyrec - declarative Fly.io apps, machines and IP addresses.
#[derive(Parser, Debug)]
#[command(name = "flyrec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest (defaults to flyrec.yaml in this or a parent directory).
    #[arg(short, long, global = true, env = "FLYREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format.
    #[arg(long, global = true, default_value = "text", env = "FLYREC_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would do.
    Plan {
        /// Refresh tracked state from Fly first.
        #[arg(long)]
        refresh: bool,

        /// Show field-level differences.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Create, update and delete resources to match the manifest.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Keep running independent actions after a failure.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Re-read every tracked resource from Fly.
    Refresh,

    /// Delete every tracked resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Start tracking an existing resource.
    Import {
        /// Resource kind (app, machine, ip).
        kind: ResourceKind,

        /// Local name; the resource is tracked at `<kind>.<name>`.
        name: String,

        /// Remote ID: `<app>` for apps, `<app>/<machine_id>` for machines,
        /// `<app>/<address>` for IP addresses.
        id: String,
    },

    /// Inspect and manage tracked state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show a summary of tracked state.
    Show,

    /// List tracked resources.
    List,

    /// Take the state lock.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Release the state lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
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

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
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
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from(["flyrec", "import", "machine", "web", "hello/148e"])
            .expect("valid arguments");

        match cli.command {
            Commands::Import { kind, name, id } => {
                assert_eq!(kind, ResourceKind::Machine);
                assert_eq!(name, "web");
                assert_eq!(id, "hello/148e");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["flyrec", "apply", "--yes", "--output", "json", "-v"])
            .expect("valid arguments");

        assert!(cli.verbose);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Apply { yes: true, continue_on_error: false }));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["flyrec", "import", "volume", "data", "vol_1"]).is_err());
    }
}
