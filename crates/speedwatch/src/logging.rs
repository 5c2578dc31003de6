//! Logging configuration for speedwatch.
//!
//! This module provides initialization and configuration for the tracing-based
//! logging system used throughout speedwatch.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Normal output level (info and above).
    #[default]
    Normal,
    /// Verbose output (debug and above).
    Verbose,
    /// Very verbose output (trace level).
    Trace,
}

impl Verbosity {
    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Whether log lines carry their module target.
    ///
    /// Targets only matter when tracing a specific stage of the pipeline;
    /// regular session output stays compact without them.
    #[must_use]
    pub fn shows_target(&self) -> bool {
        matches!(self, Self::Verbose | Self::Trace)
    }
}

/// Initialize the logging system.
///
/// This should be called once at application startup. The verbosity tracks
/// the `-v`/`-q` command-line flags; the `RUST_LOG` environment variable
/// takes precedence when set, so a single stage can be singled out with
/// e.g. `RUST_LOG=speedwatch::monitor=trace`.
///
/// Log lines are timestamped relative to process start, which during a
/// monitoring run reads as time into the drive.
///
/// # Examples
///
/// ```no_run
/// use speedwatch::{init_logging, logging::Verbosity};
///
/// // Normal verbosity
/// init_logging(Verbosity::Normal);
///
/// // Verbose output
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    // Build the default filter based on verbosity
    let default_filter = format!("speedwatch={}", verbosity.to_level_filter());

    // Allow RUST_LOG to override
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    // Configure the subscriber
    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_timer(fmt::time::uptime())
            .with_target(verbosity.shows_target())
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Install the subscriber (ignore error if already set)
    let _ = subscriber.try_init();
}

/// Initialize logging for tests.
///
/// This sets up a minimal logging configuration suitable for tests.
/// It only logs warnings and errors by default to keep test output clean.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
