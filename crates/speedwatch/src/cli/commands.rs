//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Monitor command arguments.
#[derive(Debug, Args)]
pub struct MonitorCommand {
    /// Replay a recorded JSONL sample trace instead of a live source
    #[arg(short, long, value_name = "FILE")]
    pub replay: PathBuf,

    /// Replay as fast as possible, ignoring recorded timestamps
    #[arg(long)]
    pub no_pace: bool,
}

/// Override-list management commands.
#[derive(Debug, Subcommand)]
pub enum OverridesCommand {
    /// List remembered limit corrections
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Fill in the limit of a record by index
    Set {
        /// Record index as shown by `overrides list`
        index: usize,

        /// Corrected limit in km/h
        limit: u32,
    },

    /// Mark a location as needing review, with no limit yet
    Mark {
        /// Latitude in decimal degrees
        latitude: f64,

        /// Longitude in decimal degrees
        longitude: f64,

        /// Address label for the location
        #[arg(short, long, default_value = "")]
        address: String,
    },

    /// Remove a record by index
    Remove {
        /// Record index as shown by `overrides list`
        index: usize,
    },

    /// Remove all records
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// File a record as a correction note with the upstream service
    Publish {
        /// Record index as shown by `overrides list`
        index: usize,
    },
}

/// Trip history commands.
#[derive(Debug, Subcommand)]
pub enum TripsCommand {
    /// List logged trips
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Export a trip as a GPX track
    Export {
        /// Trip index as shown by `trips list`
        index: usize,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Delete a trip by index
    Delete {
        /// Trip index as shown by `trips list`
        index: usize,
    },

    /// Delete all trips
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Filed-note history commands.
#[derive(Debug, Subcommand)]
pub enum PublishedCommand {
    /// List filed correction notes
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Clear the filed-note history
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
