//! Persistence layer for speedwatch.
//!
//! The core's durable state is three small bounded collections (limit
//! overrides, trip records, published notes), each stored as one JSON
//! document under a stable key. The [`KvStore`] trait is the injectable
//! persistence capability: the production implementation is
//! `SQLite`-backed, and tests swap in [`MemoryStore`]. Consumers must
//! tolerate a collection being absent or malformed by treating it as empty.

pub mod migrations;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Stable keys for the persisted collections.
pub mod keys {
    /// The limit-override collection (capped at 100 records).
    pub const LIMIT_OVERRIDES: &str = "limit_overrides";
    /// The trip-record collection (capped at 20 records).
    pub const TRIP_RECORDS: &str = "trip_records";
    /// The published-note history (capped at 50 records).
    pub const PUBLISHED_NOTES: &str = "published_notes";
}

/// Injectable persistence capability for the bounded collections.
///
/// Implementations store raw JSON documents addressed by a stable key.
/// `load` returning `Ok(None)` means the collection has never been written;
/// callers treat that, and any unparseable payload, as an empty collection.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Load the raw document stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage read fails.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `raw` under `key`, replacing any previous document.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage write fails.
    fn save(&self, key: &str, raw: &str) -> Result<()>;
}

/// `SQLite`-backed store for the persisted collections.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection, serialized behind a mutex so the store can be
    /// shared with the async session task.
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection mutex poisoned"))
    }
}

impl KvStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM collections WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, raw: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO collections (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            ",
            params![key, raw],
        )?;
        debug!("Saved collection '{}' ({} bytes)", key, raw.len());
        Ok(())
    }
}

/// In-memory store used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("memory store mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, raw: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("memory store mutex poisoned"))?;
        entries.insert(key.to_string(), raw.to_string());
        Ok(())
    }
}
