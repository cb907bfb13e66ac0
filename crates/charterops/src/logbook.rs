//! Flight logbook (diário de bordo): one entry per completed flight.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::FlightPlan;
use crate::storage::{
    connect, connect_in_memory, decode_date, decode_time, encode_date, encode_time,
    encode_timestamp, get_timestamp,
};

/// Derive the deduplication key for a plan's logbook entry.
///
/// The same plan always yields the same key, so a retried write lands on
/// the entry that already exists.
#[must_use]
pub fn flight_key(plan_id: &str) -> String {
    blake3::hash(format!("flight:{plan_id}").as_bytes())
        .to_hex()
        .to_string()
}

/// What gets written to the logbook for a flown plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Deduplication key, see [`flight_key`].
    pub flight_key: String,
    /// Plan that was flown.
    pub plan_id: String,
    /// Aircraft flown.
    pub aircraft_id: String,
    /// Day of the flight.
    pub date: NaiveDate,
    /// Departure time.
    pub departure: NaiveTime,
    /// Arrival time.
    pub arrival: NaiveTime,
    /// Departure location code.
    pub origin: String,
    /// Arrival location code.
    pub destination: String,
    /// Pilot in command.
    pub pilot_id: String,
    /// Copilot, if one flew.
    pub copilot_id: Option<String>,
    /// Hours flown.
    pub hours: f64,
}

impl FlightRecord {
    /// Build the record for a plan flown for `hours`.
    #[must_use]
    pub fn from_plan(plan: &FlightPlan, hours: f64) -> Self {
        Self {
            flight_key: flight_key(&plan.id),
            plan_id: plan.id.clone(),
            aircraft_id: plan.aircraft_id.clone(),
            date: plan.scheduled_date,
            departure: plan.scheduled_departure,
            arrival: plan.estimated_arrival,
            origin: plan.origin.clone(),
            destination: plan.destination.clone(),
            pilot_id: plan.pilot_id.clone(),
            copilot_id: plan.copilot.id().map(String::from),
            hours,
        }
    }
}

/// A stored logbook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogbookEntry {
    /// Entry id.
    pub id: String,
    /// What was recorded.
    #[serde(flatten)]
    pub record: FlightRecord,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Destination for completed flights.
pub trait LogbookWriter: Send + Sync {
    /// Record a flight and return its entry id.
    ///
    /// A record whose `flight_key` was already written returns the existing
    /// entry id without writing a second entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the logbook cannot be written.
    fn record_flight(&self, record: &FlightRecord) -> Result<String>;
}

/// Logbook stored in the charterops database.
#[derive(Debug)]
pub struct SqliteLogbook {
    conn: Mutex<Connection>,
}

const COLUMNS: &str = "id, flight_key, plan_id, aircraft_id, flight_date, departure, arrival, \
     origin, destination, pilot_id, copilot_id, hours, recorded_at";

impl SqliteLogbook {
    /// Open the logbook in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(connect(path, busy_timeout)?),
        })
    }

    /// Create an in-memory logbook for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(connect_in_memory()?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entries for one aircraft, most recent flight first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn entries_for_aircraft(&self, aircraft_id: &str) -> Result<Vec<LogbookEntry>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {COLUMNS} FROM logbook_entries WHERE aircraft_id = ?1 \
             ORDER BY flight_date DESC, departure DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([aircraft_id], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entry written for a plan, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn entry_for_plan(&self, plan_id: &str) -> Result<Option<LogbookEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM logbook_entries WHERE flight_key = ?1");
        Ok(self
            .lock()
            .query_row(&sql, [flight_key(plan_id)], row_to_entry)
            .optional()?)
    }
}

impl LogbookWriter for SqliteLogbook {
    fn record_flight(&self, record: &FlightRecord) -> Result<String> {
        let conn = self.lock();
        let id = uuid::Uuid::new_v4().to_string();

        let inserted = conn.execute(
            r"
            INSERT INTO logbook_entries (id, flight_key, plan_id, aircraft_id, flight_date,
                departure, arrival, origin, destination, pilot_id, copilot_id, hours, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(flight_key) DO NOTHING
            ",
            params![
                id,
                record.flight_key,
                record.plan_id,
                record.aircraft_id,
                encode_date(record.date),
                encode_time(record.departure),
                encode_time(record.arrival),
                record.origin,
                record.destination,
                record.pilot_id,
                record.copilot_id,
                record.hours,
                encode_timestamp(Utc::now()),
            ],
        )?;

        if inserted == 1 {
            debug!("Logbook entry {} for plan {}", id, record.plan_id);
            return Ok(id);
        }

        let existing: String = conn.query_row(
            "SELECT id FROM logbook_entries WHERE flight_key = ?1",
            [&record.flight_key],
            |row| row.get(0),
        )?;
        debug!("Plan {} already logged as {}", record.plan_id, existing);
        Ok(existing)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogbookEntry> {
    let date: String = row.get(4)?;
    let departure: String = row.get(5)?;
    let arrival: String = row.get(6)?;

    Ok(LogbookEntry {
        id: row.get(0)?,
        record: FlightRecord {
            flight_key: row.get(1)?,
            plan_id: row.get(2)?,
            aircraft_id: row.get(3)?,
            date: decode_date(4, &date)?,
            departure: decode_time(5, &departure)?,
            arrival: decode_time(6, &arrival)?,
            origin: row.get(7)?,
            destination: row.get(8)?,
            pilot_id: row.get(9)?,
            copilot_id: row.get(10)?,
            hours: row.get(11)?,
        },
        recorded_at: get_timestamp(row, 12)?,
    })
}
