//! Reconciliation tasks: side effects that failed after their operation
//! committed and need someone to finish them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{decode_parsed, encode_timestamp, get_timestamp, get_timestamp_opt};
use crate::error::{Error, Result};

/// Which side effect failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Logbook entry for a completed plan.
    LogbookWrite,
    /// Notice to a requester or the coordinator pool.
    Notification,
}

impl TaskKind {
    /// Storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogbookWrite => "logbook_write",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logbook_write" => Ok(Self::LogbookWrite),
            "notification" => Ok(Self::Notification),
            other => Err(Error::internal(format!("unknown task kind '{other}'"))),
        }
    }
}

/// One failed side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationTask {
    /// Row id.
    pub id: i64,
    /// Which side effect failed.
    pub kind: TaskKind,
    /// Request or plan the side effect belonged to.
    pub entity_id: String,
    /// Error text at the time of failure.
    pub detail: String,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
    /// When the side effect was finally carried out.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Record a failed side effect. Returns the task id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn record(
    conn: &Connection,
    kind: TaskKind,
    entity_id: &str,
    detail: &str,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        r"
        INSERT INTO reconciliation_tasks (kind, entity_id, detail, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ",
        params![kind.as_str(), entity_id, detail, encode_timestamp(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Mark every open task of `kind` for `entity_id` resolved.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn resolve(
    conn: &Connection,
    kind: TaskKind,
    entity_id: &str,
    at: DateTime<Utc>,
) -> Result<usize> {
    Ok(conn.execute(
        r"
        UPDATE reconciliation_tasks SET resolved_at = ?1
        WHERE kind = ?2 AND entity_id = ?3 AND resolved_at IS NULL
        ",
        params![encode_timestamp(at), kind.as_str(), entity_id],
    )?)
}

/// Unresolved tasks, oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn open_tasks(conn: &Connection) -> Result<Vec<ReconciliationTask>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, kind, entity_id, detail, created_at, resolved_at
        FROM reconciliation_tasks
        WHERE resolved_at IS NULL
        ORDER BY id ASC
        ",
    )?;
    let tasks = stmt
        .query_map([], |row| {
            let kind: String = row.get(1)?;
            Ok(ReconciliationTask {
                id: row.get(0)?,
                kind: decode_parsed(1, &kind)?,
                entity_id: row.get(2)?,
                detail: row.get(3)?,
                created_at: get_timestamp(row, 4)?,
                resolved_at: get_timestamp_opt(row, 5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}
