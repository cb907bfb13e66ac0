//! Completion intents.
//!
//! Completing a plan touches the aircraft registry and the logbook, which
//! live outside this store. An intent row is written before the first of
//! those calls and removed once both have landed, so a crash in between
//! leaves a record the recovery sweep can finish or undo.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{decode_parsed, encode_timestamp, get_timestamp};
use crate::error::{Error, Result};

/// How far a completion has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStage {
    /// Recorded; the hour increment may or may not have been applied.
    Pending,
    /// Hours applied and the plan marked completed; logbook not yet written.
    HoursApplied,
    /// The logbook write failed and awaits a retry.
    LogbookPending,
}

impl IntentStage {
    /// Storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::HoursApplied => "hours_applied",
            Self::LogbookPending => "logbook_pending",
        }
    }
}

impl fmt::Display for IntentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "hours_applied" => Ok(Self::HoursApplied),
            "logbook_pending" => Ok(Self::LogbookPending),
            other => Err(Error::internal(format!("unknown intent stage '{other}'"))),
        }
    }
}

/// A completion in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionIntent {
    /// Plan being completed.
    pub plan_id: String,
    /// Idempotency key handed to the aircraft registry.
    pub op_key: String,
    /// Aircraft whose hours are incremented.
    pub aircraft_id: String,
    /// Hours flown.
    pub hours: f64,
    /// Current stage.
    pub stage: IntentStage,
    /// When the completion started.
    pub created_at: DateTime<Utc>,
    /// When the stage last changed.
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "plan_id, op_key, aircraft_id, hours, stage, created_at, updated_at";

/// Insert a new intent.
///
/// # Errors
///
/// Returns an error if the database operation fails, including when the
/// plan already has an intent.
pub fn insert(conn: &Connection, intent: &CompletionIntent) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO completion_intents (plan_id, op_key, aircraft_id, hours, stage, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            intent.plan_id,
            intent.op_key,
            intent.aircraft_id,
            intent.hours,
            intent.stage.as_str(),
            encode_timestamp(intent.created_at),
            encode_timestamp(intent.updated_at),
        ],
    )?;
    Ok(())
}

/// Get the intent for a plan, if any.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, plan_id: &str) -> Result<Option<CompletionIntent>> {
    let sql = format!("SELECT {COLUMNS} FROM completion_intents WHERE plan_id = ?1");
    Ok(conn.query_row(&sql, [plan_id], row_to_intent).optional()?)
}

/// Move an intent to a new stage.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_stage(
    conn: &Connection,
    plan_id: &str,
    stage: IntentStage,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE completion_intents SET stage = ?1, updated_at = ?2 WHERE plan_id = ?3",
        params![stage.as_str(), encode_timestamp(at), plan_id],
    )?;
    Ok(())
}

/// Remove an intent. Returns whether one existed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete(conn: &Connection, plan_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM completion_intents WHERE plan_id = ?1",
        [plan_id],
    )?;
    Ok(deleted > 0)
}

/// Intents last touched before `cutoff`, oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn stale(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<CompletionIntent>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM completion_intents WHERE updated_at <= ?1 ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let intents = stmt
        .query_map([encode_timestamp(cutoff)], row_to_intent)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(intents)
}

fn row_to_intent(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompletionIntent> {
    let stage: String = row.get(4)?;
    Ok(CompletionIntent {
        plan_id: row.get(0)?,
        op_key: row.get(1)?,
        aircraft_id: row.get(2)?,
        hours: row.get(3)?,
        stage: decode_parsed(4, &stage)?,
        created_at: get_timestamp(row, 5)?,
        updated_at: get_timestamp(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connect_in_memory;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn intent(plan_id: &str) -> CompletionIntent {
        CompletionIntent {
            plan_id: plan_id.to_string(),
            op_key: format!("complete:{plan_id}"),
            aircraft_id: "A1".to_string(),
            hours: 2.1,
            stage: IntentStage::Pending,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn test_insert_get_delete() {
        let conn = connect_in_memory().unwrap();
        insert(&conn, &intent("p1")).unwrap();
        assert_eq!(get(&conn, "p1").unwrap(), Some(intent("p1")));

        assert!(insert(&conn, &intent("p1")).is_err());

        assert!(delete(&conn, "p1").unwrap());
        assert!(!delete(&conn, "p1").unwrap());
        assert!(get(&conn, "p1").unwrap().is_none());
    }

    #[test]
    fn test_set_stage() {
        let conn = connect_in_memory().unwrap();
        insert(&conn, &intent("p1")).unwrap();
        let later = t0() + Duration::minutes(1);
        set_stage(&conn, "p1", IntentStage::LogbookPending, later).unwrap();

        let loaded = get(&conn, "p1").unwrap().unwrap();
        assert_eq!(loaded.stage, IntentStage::LogbookPending);
        assert_eq!(loaded.updated_at, later);
        assert_eq!(loaded.created_at, t0());
    }

    #[test]
    fn test_stale_respects_cutoff() {
        let conn = connect_in_memory().unwrap();
        insert(&conn, &intent("old")).unwrap();
        let mut fresh = intent("fresh");
        fresh.created_at = t0() + Duration::minutes(10);
        fresh.updated_at = fresh.created_at;
        insert(&conn, &fresh).unwrap();

        let found = stale(&conn, t0() + Duration::minutes(5)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].plan_id, "old");
    }

    #[test]
    fn test_stage_names() {
        for stage in [
            IntentStage::Pending,
            IntentStage::HoursApplied,
            IntentStage::LogbookPending,
        ] {
            assert_eq!(stage.as_str().parse::<IntentStage>().unwrap(), stage);
        }
        assert!("done".parse::<IntentStage>().is_err());
    }
}
