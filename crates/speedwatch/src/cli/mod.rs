//! Command-line interface for speedwatch.
//!
//! This module provides the CLI structure and command handlers for the
//! `spedw` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, MonitorCommand, OutputFormat, OverridesCommand, PublishedCommand,
    StatusCommand, TripsCommand,
};

/// spedw - Know the limit before the sign does
///
/// Resolves the posted speed limit for your current position, alerts when
/// you drift over it, and remembers the places the map data gets wrong.
#[derive(Debug, Parser)]
#[command(name = "spedw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a monitoring session
    Monitor(MonitorCommand),

    /// Manage remembered limit corrections
    #[command(subcommand)]
    Overrides(OverridesCommand),

    /// Browse and export logged trips
    #[command(subcommand)]
    Trips(TripsCommand),

    /// Browse the filed-note history
    #[command(subcommand)]
    Published(PublishedCommand),

    /// Show stored-data summary
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "spedw");
    }

    #[test]
    fn test_cli_verify() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_quiet() {
        let cli = Cli {
            config: None,
            verbose: 0,
            quiet: true,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_normal() {
        let cli = Cli {
            config: None,
            verbose: 0,
            quiet: false,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Normal);
    }

    #[test]
    fn test_verbosity_levels() {
        let mut cli = Cli {
            config: None,
            verbose: 1,
            quiet: false,
            command: Command::Status(StatusCommand { json: false }),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Verbose);

        cli.verbose = 2;
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Trace);
    }

    #[test]
    fn test_parse_monitor_replay() {
        let args = vec!["spedw", "monitor", "--replay", "trace.jsonl"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Monitor(cmd) => {
                assert_eq!(cmd.replay, PathBuf::from("trace.jsonl"));
                assert!(!cmd.no_pace);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_monitor_requires_replay() {
        let args = vec!["spedw", "monitor"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_overrides_set() {
        let args = vec!["spedw", "overrides", "set", "2", "40"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Overrides(OverridesCommand::Set {
                index: 2,
                limit: 40
            })
        ));
    }

    #[test]
    fn test_parse_overrides_mark() {
        let args = vec![
            "spedw", "overrides", "mark", "25.0330", "121.5654", "-a", "Da'an Xinyi",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Overrides(OverridesCommand::Mark {
                latitude,
                longitude,
                address,
            }) => {
                assert!((latitude - 25.0330).abs() < 1e-9);
                assert!((longitude - 121.5654).abs() < 1e-9);
                assert_eq!(address, "Da'an Xinyi");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_trips_export() {
        let args = vec!["spedw", "trips", "export", "0", "-o", "trip.gpx"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Trips(TripsCommand::Export { index, output }) => {
                assert_eq!(index, 0);
                assert_eq!(output, Some(PathBuf::from("trip.gpx")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_published_list() {
        let args = vec!["spedw", "published", "list", "--format", "json"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Published(PublishedCommand::List {
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_parse_status_json() {
        let args = vec!["spedw", "status", "--json"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Status(cmd) => assert!(cmd.json),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_validate() {
        let args = vec!["spedw", "config", "validate", "-f", "alt.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_globals() {
        let args = vec!["spedw", "-c", "/custom/config.toml", "-v", "status"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbose, 1);
    }
}
