//! Aircraft registry: availability, seat capacity and cumulative flight hours.
//!
//! The workflow only reads aircraft and increments their hours. The
//! increment is keyed by an operation key so a retried completion cannot
//! count the same flight twice.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::{connect, connect_in_memory, decode_parsed, encode_timestamp};

/// Operational status of an aircraft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AircraftStatus {
    /// Available for flights.
    #[default]
    Active,
    /// Grounded for maintenance.
    Maintenance,
    /// Out of service.
    Inactive,
}

impl AircraftStatus {
    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Inactive => "inactive",
        }
    }

    /// Whether flights may be planned on the aircraft.
    #[must_use]
    pub fn is_available(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for AircraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AircraftStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" | "ativa" => Ok(Self::Active),
            "maintenance" | "manutencao" | "manutenção" => Ok(Self::Maintenance),
            "inactive" | "inativa" => Ok(Self::Inactive),
            other => Err(Error::invalid_field(
                "status",
                format!("unknown aircraft status '{other}'"),
            )),
        }
    }
}

/// An aircraft as the workflow sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    /// Registry id.
    pub id: String,
    /// Registration mark, e.g. `PT-ABC`.
    pub registration: String,
    /// Operational status.
    pub status: AircraftStatus,
    /// Passenger seats, when known.
    pub seat_capacity: Option<u32>,
    /// Total hours flown.
    pub cumulative_hours: f64,
}

/// Read and hour-increment access to aircraft.
pub trait AircraftRegistry: Send + Sync {
    /// Look up an aircraft.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be reached.
    fn get_aircraft(&self, id: &str) -> Result<Option<Aircraft>>;

    /// Add `hours` to the aircraft's total, once per `op_key`.
    ///
    /// Repeating a call with an `op_key` that was already applied changes
    /// nothing and returns the current total.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown aircraft, or an error if the
    /// registry cannot be reached.
    fn increment_hours(&self, id: &str, hours: f64, op_key: &str) -> Result<f64>;

    /// Whether an increment with `op_key` has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be reached.
    fn hours_applied(&self, op_key: &str) -> Result<bool>;
}

/// Registry stored in the charterops database.
#[derive(Debug)]
pub struct SqliteAircraftRegistry {
    conn: Mutex<Connection>,
}

impl SqliteAircraftRegistry {
    /// Open the registry in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(connect(path, busy_timeout)?),
        })
    }

    /// Create an in-memory registry for testing.
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

    /// Add or replace an aircraft. Existing hours are kept.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank id or registration, or a
    /// database error.
    pub fn register(&self, aircraft: &Aircraft) -> Result<()> {
        let mut errors = crate::error::FieldErrors::default();
        if aircraft.id.trim().is_empty() {
            errors.push("id", "is required");
        }
        if aircraft.registration.trim().is_empty() {
            errors.push("registration", "is required");
        }
        if !aircraft.cumulative_hours.is_finite() || aircraft.cumulative_hours < 0.0 {
            errors.push("cumulative_hours", "must be a non-negative number");
        }
        errors.into_result()?;

        self.lock().execute(
            r"
            INSERT INTO aircraft (id, registration, status, seat_capacity, cumulative_hours)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                registration = excluded.registration,
                status = excluded.status,
                seat_capacity = excluded.seat_capacity
            ",
            params![
                aircraft.id.trim(),
                aircraft.registration.trim().to_uppercase(),
                aircraft.status.as_str(),
                aircraft.seat_capacity,
                aircraft.cumulative_hours,
            ],
        )?;
        info!("Registered aircraft {}", aircraft.id);
        Ok(())
    }

    /// Change an aircraft's operational status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown aircraft, or a database error.
    pub fn set_status(&self, id: &str, status: AircraftStatus) -> Result<()> {
        let updated = self.lock().execute(
            "UPDATE aircraft SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(Error::not_found("aircraft", id));
        }
        info!("Aircraft {} is now {}", id, status);
        Ok(())
    }

    /// Every registered aircraft, by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self) -> Result<Vec<Aircraft>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, registration, status, seat_capacity, cumulative_hours FROM aircraft ORDER BY id",
        )?;
        let aircraft = stmt
            .query_map([], row_to_aircraft)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(aircraft)
    }
}

impl AircraftRegistry for SqliteAircraftRegistry {
    fn get_aircraft(&self, id: &str) -> Result<Option<Aircraft>> {
        Ok(self
            .lock()
            .query_row(
                "SELECT id, registration, status, seat_capacity, cumulative_hours FROM aircraft WHERE id = ?1",
                [id],
                row_to_aircraft,
            )
            .optional()?)
    }

    fn increment_hours(&self, id: &str, hours: f64, op_key: &str) -> Result<f64> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(Error::invalid_field("hours", "must be a positive number"));
        }

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<f64> = tx
            .query_row(
                "SELECT cumulative_hours FROM aircraft WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(Error::not_found("aircraft", id));
        };

        let seen: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM aircraft_hour_ledger WHERE op_key = ?1)",
            [op_key],
            |row| row.get(0),
        )?;
        if seen {
            debug!("Hour increment {} already applied to {}", op_key, id);
            return Ok(current);
        }

        tx.execute(
            "INSERT INTO aircraft_hour_ledger (op_key, aircraft_id, delta, applied_at) VALUES (?1, ?2, ?3, ?4)",
            params![op_key, id, hours, encode_timestamp(Utc::now())],
        )?;
        tx.execute(
            "UPDATE aircraft SET cumulative_hours = cumulative_hours + ?1 WHERE id = ?2",
            params![hours, id],
        )?;
        tx.commit()?;

        let total = current + hours;
        debug!("Aircraft {} now at {:.1} hours", id, total);
        Ok(total)
    }

    fn hours_applied(&self, op_key: &str) -> Result<bool> {
        Ok(self.lock().query_row(
            "SELECT EXISTS(SELECT 1 FROM aircraft_hour_ledger WHERE op_key = ?1)",
            [op_key],
            |row| row.get(0),
        )?)
    }
}

fn row_to_aircraft(row: &rusqlite::Row<'_>) -> rusqlite::Result<Aircraft> {
    let status: String = row.get(2)?;
    Ok(Aircraft {
        id: row.get(0)?,
        registration: row.get(1)?,
        status: decode_parsed(2, &status)?,
        seat_capacity: row.get(3)?,
        cumulative_hours: row.get(4)?,
    })
}
