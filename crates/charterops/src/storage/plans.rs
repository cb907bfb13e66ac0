//! Plan repository: rows, the aircraft overlap query, listings and guarded
//! status moves.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use super::{
    decode_date, decode_datetime, decode_parsed, decode_time, encode_date, encode_datetime,
    encode_time, encode_timestamp, get_timestamp,
};
use crate::error::{Error, Result};
use crate::model::{CopilotSlot, FlightPlan, PlanFilter, PlanStatus};

const ENTITY: &str = "plan";

const COLUMNS: &str = "id, source_request_id, aircraft_id, scheduled_date, scheduled_departure, \
     estimated_arrival, departure_at, arrival_at, origin, destination, pilot_id, copilot_id, \
     copilot_vacant, estimated_fuel, coordinator_notes, status, status_reason, actual_hours, \
     logbook_entry_id, created_at, updated_at";

/// What accompanies a plan status move.
#[derive(Debug, Clone, Copy)]
pub struct PlanMove<'a> {
    /// Reason recorded with a cancellation.
    pub reason: Option<&'a str>,
    /// Hours flown, recorded with a completion.
    pub actual_hours: Option<f64>,
    /// Commit time.
    pub at: DateTime<Utc>,
}

/// Insert a new plan.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert(conn: &Connection, plan: &FlightPlan) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO plans (id, source_request_id, aircraft_id, scheduled_date, scheduled_departure,
            estimated_arrival, departure_at, arrival_at, origin, destination, pilot_id, copilot_id,
            copilot_vacant, estimated_fuel, coordinator_notes, status, status_reason, actual_hours,
            logbook_entry_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21)
        ",
        params![
            plan.id,
            plan.source_request_id,
            plan.aircraft_id,
            encode_date(plan.scheduled_date),
            encode_time(plan.scheduled_departure),
            encode_time(plan.estimated_arrival),
            encode_datetime(plan.departure_at),
            encode_datetime(plan.arrival_at),
            plan.origin,
            plan.destination,
            plan.pilot_id,
            plan.copilot.id(),
            plan.copilot == CopilotSlot::Vacant,
            plan.estimated_fuel,
            plan.coordinator_notes,
            plan.status.as_str(),
            plan.status_reason,
            plan.actual_hours,
            plan.logbook_entry_id,
            encode_timestamp(plan.created_at),
            encode_timestamp(plan.updated_at),
        ],
    )?;
    debug!("Inserted plan {} for aircraft {}", plan.id, plan.aircraft_id);
    Ok(())
}

/// Get a plan by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: &str) -> Result<Option<FlightPlan>> {
    let sql = format!("SELECT {COLUMNS} FROM plans WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_plan).optional()?)
}

/// Get a plan by id, failing with `NotFound` if it doesn't exist.
///
/// # Errors
///
/// Returns `NotFound` or a database error.
pub fn require(conn: &Connection, id: &str) -> Result<FlightPlan> {
    get(conn, id)?.ok_or_else(|| Error::not_found(ENTITY, id))
}

fn status_of(conn: &Connection, id: &str) -> Result<Option<PlanStatus>> {
    let text: Option<String> = conn
        .query_row("SELECT status FROM plans WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    text.map(|t| t.parse()).transpose()
}

/// Find an active plan on `aircraft_id` whose window intersects
/// `[departure_at, arrival_at]`. Touching endpoints count as a conflict.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_conflict(
    conn: &Connection,
    aircraft_id: &str,
    departure_at: NaiveDateTime,
    arrival_at: NaiveDateTime,
) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            r"
            SELECT id FROM plans
            WHERE aircraft_id = ?1
              AND status IN (?2, ?3)
              AND departure_at <= ?4
              AND ?5 <= arrival_at
            ORDER BY departure_at ASC
            LIMIT 1
            ",
            params![
                aircraft_id,
                PlanStatus::ACTIVE[0].as_str(),
                PlanStatus::ACTIVE[1].as_str(),
                encode_datetime(arrival_at),
                encode_datetime(departure_at),
            ],
            |row| row.get(0),
        )
        .optional()?)
}

/// List plans matching `filter`, earliest departure first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list(conn: &Connection, filter: &PlanFilter) -> Result<Vec<FlightPlan>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        values.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(aircraft) = &filter.aircraft_id {
        values.push(aircraft.clone());
        clauses.push(format!("aircraft_id = ?{}", values.len()));
    }
    if let Some(date) = filter.date {
        values.push(encode_date(date));
        clauses.push(format!("scheduled_date = ?{}", values.len()));
    }
    if let Some(crew) = &filter.crew_id {
        values.push(crew.clone());
        let n = values.len();
        clauses.push(format!("(pilot_id = ?{n} OR copilot_id = ?{n})"));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT {COLUMNS} FROM plans {where_clause} ORDER BY departure_at ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let plans = stmt
        .query_map(params_from_iter(values.iter()), row_to_plan)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(plans)
}

/// Count plans in a status.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count_by_status(conn: &Connection, status: PlanStatus) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM plans WHERE status = ?1",
        [status.as_str()],
        |row| row.get(0),
    )?)
}

/// Count plans flying on `date` that were not cancelled.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count_on_date(conn: &Connection, date: NaiveDate) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM plans WHERE scheduled_date = ?1 AND status != ?2",
        params![encode_date(date), PlanStatus::Cancelled.as_str()],
        |row| row.get(0),
    )?)
}

/// Move a plan to `to` if its current status allows it.
///
/// Same guard as request moves: the update only lands while the row still
/// holds the status that was checked. Returns the status moved from.
///
/// # Errors
///
/// Returns `NotFound`, `InvalidStateTransition` (with the status actually
/// found), or a database error.
pub fn transition(
    conn: &Connection,
    id: &str,
    to: PlanStatus,
    change: &PlanMove<'_>,
) -> Result<PlanStatus> {
    let from = status_of(conn, id)?.ok_or_else(|| Error::not_found(ENTITY, id))?;
    if !from.can_transition_to(to) {
        return Err(Error::invalid_transition(ENTITY, id, from, to));
    }

    let updated = conn.execute(
        r"
        UPDATE plans
        SET status = ?1,
            status_reason = COALESCE(?2, status_reason),
            actual_hours = COALESCE(?3, actual_hours),
            updated_at = ?4
        WHERE id = ?5 AND status = ?6
        ",
        params![
            to.as_str(),
            change.reason,
            change.actual_hours,
            encode_timestamp(change.at),
            id,
            from.as_str(),
        ],
    )?;

    if updated == 0 {
        let now = status_of(conn, id)?.ok_or_else(|| Error::not_found(ENTITY, id))?;
        return Err(Error::invalid_transition(ENTITY, id, now, to));
    }

    debug!("Plan {} moved {} -> {}", id, from, to);
    Ok(from)
}

/// Record the logbook entry written for a completed plan.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_logbook_entry(
    conn: &Connection,
    id: &str,
    entry_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE plans SET logbook_entry_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![entry_id, encode_timestamp(at), id],
    )?;
    Ok(())
}

fn row_to_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlightPlan> {
    let date: String = row.get(3)?;
    let departure: String = row.get(4)?;
    let arrival: String = row.get(5)?;
    let departure_at: String = row.get(6)?;
    let arrival_at: String = row.get(7)?;
    let copilot_id: Option<String> = row.get(11)?;
    let copilot_vacant: bool = row.get(12)?;
    let status: String = row.get(15)?;

    let copilot = match (copilot_id, copilot_vacant) {
        (Some(id), _) => CopilotSlot::Assigned(id),
        (None, true) => CopilotSlot::Vacant,
        (None, false) => CopilotSlot::Unset,
    };

    Ok(FlightPlan {
        id: row.get(0)?,
        source_request_id: row.get(1)?,
        aircraft_id: row.get(2)?,
        scheduled_date: decode_date(3, &date)?,
        scheduled_departure: decode_time(4, &departure)?,
        estimated_arrival: decode_time(5, &arrival)?,
        departure_at: decode_datetime(6, &departure_at)?,
        arrival_at: decode_datetime(7, &arrival_at)?,
        origin: row.get(8)?,
        destination: row.get(9)?,
        pilot_id: row.get(10)?,
        copilot,
        estimated_fuel: row.get(13)?,
        coordinator_notes: row.get(14)?,
        status: decode_parsed(15, &status)?,
        status_reason: row.get(16)?,
        actual_hours: row.get(17)?,
        logbook_entry_id: row.get(18)?,
        created_at: get_timestamp(row, 19)?,
        updated_at: get_timestamp(row, 20)?,
    })
}
