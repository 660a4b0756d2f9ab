//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Domain operator work engine
#[derive(Parser, Debug)]
#[command(name = "domain-operator")]
#[command(version)]
#[command(about = "Fiber-based reconciliation engine with async remote calls and retry/backoff")]
pub struct Cli {
    /// Operator configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Run the reference chain against canned responses
    Simulate {
        /// Leading list attempts answered with 409 Conflict
        #[arg(long, default_value_t = 0)]
        conflicts: usize,

        /// Pods listed once the conflicts are used up
        #[arg(long, default_value_t = 3)]
        items: usize,

        /// Override the configured retry budget
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "domain-operator",
            "--log-level",
            "debug",
            "simulate",
            "--conflicts",
            "2",
            "--max-retries",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert!(cli.config.is_none());
        assert_eq!(
            cli.command,
            Commands::Simulate {
                conflicts: 2,
                items: 3,
                max_retries: Some(4),
            }
        );
    }

    #[test]
    fn test_parse_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["domain-operator", "config", "--config", "operator.toml"]).unwrap();

        assert_eq!(cli.command, Commands::Config);
        assert_eq!(cli.config, Some(PathBuf::from("operator.toml")));
    }

    #[test]
    fn test_missing_command_is_rejected() {
        assert!(Cli::try_parse_from(["domain-operator"]).is_err());
    }
}
