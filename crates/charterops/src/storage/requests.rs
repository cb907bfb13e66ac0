//! Request repository: rows, filtered listings, guarded status moves and
//! the append-only history.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use super::{
    decode_date, decode_parsed, decode_time, encode_date, encode_time, encode_timestamp,
    get_timestamp,
};
use crate::error::{Error, Result};
use crate::model::{FlightRequest, HistoryEntry, Priority, RequestFilter, RequestStatus};

const ENTITY: &str = "request";

const COLUMNS: &str = "id, requester_id, requester_name, aircraft_id, aircraft_registration, \
     requested_date, requested_departure_time, origin, destination, passenger_count, priority, \
     notes, status, status_reason, plan_id, submitted_at, updated_at";

/// What accompanies a status move.
#[derive(Debug, Clone, Copy)]
pub struct Move<'a> {
    /// Who is making the change.
    pub actor: &'a str,
    /// Reason recorded on the request and in its history.
    pub reason: Option<&'a str>,
    /// Plan to link, when scheduling.
    pub plan_id: Option<&'a str>,
    /// Commit time.
    pub at: DateTime<Utc>,
}

fn priority_rank(priority: Priority) -> i64 {
    match priority {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
        Priority::Urgent => 3,
    }
}

/// Insert a new request and its submission history row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert(conn: &Connection, request: &FlightRequest) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO requests (id, requester_id, requester_name, aircraft_id, aircraft_registration,
            requested_date, requested_departure_time, origin, destination, passenger_count,
            priority, priority_rank, notes, status, status_reason, plan_id, submitted_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ",
        params![
            request.id,
            request.requester_id,
            request.requester_name,
            request.aircraft_id,
            request.aircraft_registration,
            encode_date(request.requested_date),
            encode_time(request.requested_departure_time),
            request.origin,
            request.destination,
            request.passenger_count,
            request.priority.as_str(),
            priority_rank(request.priority),
            request.notes,
            request.status.as_str(),
            request.status_reason,
            request.plan_id,
            encode_timestamp(request.submitted_at),
            encode_timestamp(request.updated_at),
        ],
    )?;

    append_history(
        conn,
        &HistoryEntry {
            request_id: request.id.clone(),
            from_status: None,
            to_status: request.status,
            actor: request.requester_id.clone(),
            reason: None,
            at: request.submitted_at,
        },
    )?;

    debug!("Inserted request {}", request.id);
    Ok(())
}

/// Get a request by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: &str) -> Result<Option<FlightRequest>> {
    let sql = format!("SELECT {COLUMNS} FROM requests WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_request).optional()?)
}

/// Get a request by id, failing with `NotFound` if it doesn't exist.
///
/// # Errors
///
/// Returns `NotFound` or a database error.
pub fn require(conn: &Connection, id: &str) -> Result<FlightRequest> {
    get(conn, id)?.ok_or_else(|| Error::not_found(ENTITY, id))
}

fn status_of(conn: &Connection, id: &str) -> Result<Option<RequestStatus>> {
    let text: Option<String> = conn
        .query_row("SELECT status FROM requests WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    text.map(|t| t.parse()).transpose()
}

/// List requests matching `filter`, urgent first, then oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list(conn: &Connection, filter: &RequestFilter) -> Result<Vec<FlightRequest>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        values.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(requester) = &filter.requester_id {
        values.push(requester.clone());
        clauses.push(format!("requester_id = ?{}", values.len()));
    }
    if let Some(aircraft) = &filter.aircraft_id {
        values.push(aircraft.clone());
        clauses.push(format!("aircraft_id = ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {COLUMNS} FROM requests {where_clause} \
         ORDER BY priority_rank DESC, submitted_at ASC, id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let requests = stmt
        .query_map(params_from_iter(values.iter()), row_to_request)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(requests)
}

/// Count requests in a status.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count_by_status(conn: &Connection, status: RequestStatus) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM requests WHERE status = ?1",
        [status.as_str()],
        |row| row.get(0),
    )?)
}

/// Move a request from `from` to `to`.
///
/// `from` is the status the caller acted on. The update only applies while
/// the row still holds it, so a request that moved in the meantime fails
/// with `InvalidStateTransition` even when the new status could also reach
/// `to`. Appends a history row on success.
///
/// # Errors
///
/// Returns `NotFound`, `InvalidStateTransition` (with the status actually
/// found), or a database error.
pub fn transition(
    conn: &Connection,
    id: &str,
    from: RequestStatus,
    to: RequestStatus,
    change: &Move<'_>,
) -> Result<()> {
    let updated = if from.can_transition_to(to) {
        conn.execute(
            r"
            UPDATE requests
            SET status = ?1, status_reason = ?2, plan_id = COALESCE(?3, plan_id), updated_at = ?4
            WHERE id = ?5 AND status = ?6
            ",
            params![
                to.as_str(),
                change.reason,
                change.plan_id,
                encode_timestamp(change.at),
                id,
                from.as_str(),
            ],
        )?
    } else {
        0
    };

    if updated == 0 {
        let found = status_of(conn, id)?.ok_or_else(|| Error::not_found(ENTITY, id))?;
        return Err(Error::invalid_transition(ENTITY, id, found, to));
    }

    append_history(
        conn,
        &HistoryEntry {
            request_id: id.to_string(),
            from_status: Some(from),
            to_status: to,
            actor: change.actor.to_string(),
            reason: change.reason.map(String::from),
            at: change.at,
        },
    )?;

    debug!("Request {} moved {} -> {}", id, from, to);
    Ok(())
}

/// Append one history row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn append_history(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO request_history (request_id, from_status, to_status, actor, reason, at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            entry.request_id,
            entry.from_status.map(RequestStatus::as_str),
            entry.to_status.as_str(),
            entry.actor,
            entry.reason,
            encode_timestamp(entry.at),
        ],
    )?;
    Ok(())
}

/// History of a request, oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn history(conn: &Connection, id: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        r"
        SELECT request_id, from_status, to_status, actor, reason, at
        FROM request_history
        WHERE request_id = ?1
        ORDER BY id ASC
        ",
    )?;
    let entries = stmt
        .query_map([id], |row| {
            let from: Option<String> = row.get(1)?;
            let to: String = row.get(2)?;
            Ok(HistoryEntry {
                request_id: row.get(0)?,
                from_status: from.map(|f| decode_parsed(1, &f)).transpose()?,
                to_status: decode_parsed(2, &to)?,
                actor: row.get(3)?,
                reason: row.get(4)?,
                at: get_timestamp(row, 5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FlightRequest> {
    let date: String = row.get(5)?;
    let time: String = row.get(6)?;
    let priority: String = row.get(10)?;
    let status: String = row.get(12)?;

    Ok(FlightRequest {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        requester_name: row.get(2)?,
        aircraft_id: row.get(3)?,
        aircraft_registration: row.get(4)?,
        requested_date: decode_date(5, &date)?,
        requested_departure_time: decode_time(6, &time)?,
        origin: row.get(7)?,
        destination: row.get(8)?,
        passenger_count: row.get(9)?,
        priority: decode_parsed(10, &priority)?,
        notes: row.get(11)?,
        status: decode_parsed(12, &status)?,
        status_reason: row.get(13)?,
        plan_id: row.get(14)?,
        submitted_at: get_timestamp(row, 15)?,
        updated_at: get_timestamp(row, 16)?,
    })
}
