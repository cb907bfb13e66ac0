//! Storage layer for charterops.
//!
//! This module provides `SQLite`-based persistent storage for the workflow:
//! requests and their history, plans, completion intents and reconciliation
//! tasks. The repository functions in the submodules take a `&Connection`
//! so they run the same inside or outside a transaction.

pub mod completions;
pub mod migrations;
pub mod plans;
pub mod reconciliation;
pub mod requests;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::TIME_FORMAT;

/// Storage format for calendar dates.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage format for plan window bounds.
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Path reported for in-memory databases.
const MEMORY_PATH: &str = ":memory:";

/// Open a connection to a charterops database file.
///
/// Creates the parent directories and database file if they don't exist,
/// switches the journal to WAL, installs `busy_timeout` so concurrent
/// writers wait instead of failing, and brings the schema up to date.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or schema initialization fails.
pub fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    debug!("Opening database at {}", path.display());
    let conn = Connection::open(path).map_err(|source| Error::DatabaseOpen {
        path: path.to_path_buf(),
        source,
    })?;

    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    migrations::initialize_schema(&conn)?;

    Ok(conn)
}

/// Open a fresh in-memory database with the schema installed.
///
/// # Errors
///
/// Returns an error if the in-memory database cannot be created.
pub fn connect_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
        path: PathBuf::from(MEMORY_PATH),
        source,
    })?;
    migrations::initialize_schema(&conn)?;
    Ok(conn)
}

/// Workflow store backed by a single `SQLite` connection.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = connect(&path, busy_timeout)?;
        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            conn: connect_in_memory()?,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the connection for reads and single-statement writes.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction.
    ///
    /// The transaction takes the database write lock up front, so a
    /// read-check-write sequence inside it cannot interleave with another
    /// writer's.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken within the busy timeout.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        let db_size_bytes = if self.path.to_string_lossy() == MEMORY_PATH {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_requests: count("SELECT COUNT(*) FROM requests")?,
            total_plans: count("SELECT COUNT(*) FROM plans")?,
            open_completion_intents: count("SELECT COUNT(*) FROM completion_intents")?,
            open_reconciliation_tasks: count(
                "SELECT COUNT(*) FROM reconciliation_tasks WHERE resolved_at IS NULL",
            )?,
            db_size_bytes,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of requests stored.
    pub total_requests: i64,
    /// Total number of plans stored.
    pub total_plans: i64,
    /// Completions still waiting on a side effect.
    pub open_completion_intents: i64,
    /// Failed side effects nobody has resolved yet.
    pub open_reconciliation_tasks: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

// === Column codecs ===

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn encode_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn encode_datetime(at: NaiveDateTime) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn decode_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{text}': {e}")))
}

pub(crate) fn decode_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date '{text}': {e}")))
}

pub(crate) fn decode_time(idx: usize, text: &str) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(text, TIME_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad time '{text}': {e}")))
}

pub(crate) fn decode_datetime(idx: usize, text: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date-time '{text}': {e}")))
}

/// Decode a text column through the type's `FromStr`.
pub(crate) fn decode_parsed<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse().map_err(|e: T::Err| conversion_error(idx, e.to_string()))
}

/// Read an optional timestamp column.
pub(crate) fn get_timestamp_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| decode_timestamp(idx, &text))
        .transpose()
}

/// Read a required timestamp column.
pub(crate) fn get_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    decode_timestamp(idx, &text)
}
