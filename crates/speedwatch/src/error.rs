//! Error types for speedwatch.
//!
//! This module defines all error types used throughout the speedwatch crate.
//! The failure model of the core: nothing here is fatal to a monitoring
//! session — mirror failures degrade to the default limit, corrupt
//! persistence reads as empty, and a lost fix stream only flips the session
//! into a degraded status.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for speedwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Sensor Errors ===
    /// The position-fix source is unavailable.
    ///
    /// Surfaced as a persistent degraded status; the core does not retry
    /// internally.
    #[error("position source unavailable: {0}")]
    SensorUnavailable(String),

    // === Publish Errors ===
    /// Filing a correction note with the upstream service failed.
    ///
    /// Only the user-initiated publish flow sees this; automatic resolution
    /// and alerting are unaffected.
    #[error("failed to publish correction: {message}")]
    Publish {
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Network Errors ===
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Every configured query mirror failed or timed out.
    ///
    /// The resolver absorbs this by falling back to the default limit.
    #[error("all {count} query mirrors failed")]
    MirrorsExhausted {
        /// Number of mirrors that were tried.
        count: usize,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for speedwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new publish error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Create a new sensor-unavailable error.
    #[must_use]
    pub fn sensor(message: impl Into<String>) -> Self {
        Self::SensorUnavailable(message.into())
    }

    /// Check if this error came from the user-initiated publish flow.
    #[must_use]
    pub fn is_publish_error(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }

    /// Check if this error indicates a lost fix stream.
    #[must_use]
    pub fn is_sensor_error(&self) -> bool {
        matches!(self, Self::SensorUnavailable(_))
    }
}
