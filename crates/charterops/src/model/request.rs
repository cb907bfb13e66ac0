//! Flight requests submitted by quota-holders.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::{non_blank, normalize_location};
use crate::error::{Error, FieldErrors};

/// Lifecycle status of a flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Submitted, waiting for a coordinator.
    Requested,
    /// Approved by a coordinator, not yet scheduled.
    Approved,
    /// A flight plan exists for it. The workflow continues on the plan.
    Scheduled,
    /// Turned down by a coordinator.
    Rejected,
    /// Withdrawn before scheduling.
    Cancelled,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Requested,
        Self::Approved,
        Self::Scheduled,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Scheduled => "scheduled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses from which a request may move to `to`.
    ///
    /// `Scheduled` is reachable from `Requested` as well: coordinators may
    /// schedule without an explicit approval step.
    #[must_use]
    pub fn sources_of(to: Self) -> &'static [Self] {
        match to {
            Self::Requested => &[],
            Self::Approved => &[Self::Requested],
            Self::Scheduled | Self::Rejected | Self::Cancelled => {
                &[Self::Requested, Self::Approved]
            }
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        Self::sources_of(to).contains(&self)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::invalid_field("status", format!("unknown request status '{s}'")))
    }
}

/// Advisory urgency of a request. Only used to order the pending queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Can wait.
    #[serde(alias = "baixa")]
    Low,
    /// Normal handling.
    #[default]
    #[serde(alias = "media", alias = "média")]
    Medium,
    /// Handle soon.
    #[serde(alias = "alta")]
    High,
    /// Handle first.
    #[serde(alias = "urgente")]
    Urgent,
}

impl Priority {
    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "baixa" => Ok(Self::Low),
            "medium" | "media" | "média" => Ok(Self::Medium),
            "high" | "alta" => Ok(Self::High),
            "urgent" | "urgente" => Ok(Self::Urgent),
            other => Err(Error::invalid_field(
                "priority",
                format!("unknown priority '{other}'"),
            )),
        }
    }
}

/// What a requester submits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInput {
    /// Quota-holder making the request.
    pub requester_id: String,
    /// Display name of the requester.
    pub requester_name: String,
    /// Requested aircraft.
    pub aircraft_id: String,
    /// Display registration. Filled from the registry when absent.
    pub aircraft_registration: Option<String>,
    /// Day of the flight.
    pub requested_date: Option<NaiveDate>,
    /// Desired departure time on that day.
    pub requested_departure_time: Option<NaiveTime>,
    /// Departure location code.
    pub origin: String,
    /// Arrival location code.
    pub destination: String,
    /// Number of passengers.
    pub passenger_count: u32,
    /// Advisory priority.
    pub priority: Priority,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl RequestInput {
    /// Check every field and report all problems at once.
    ///
    /// `seat_capacity` bounds the passenger count when the aircraft's
    /// capacity is known.
    #[must_use]
    pub fn validate(&self, today: NaiveDate, seat_capacity: Option<u32>) -> FieldErrors {
        let mut errors = FieldErrors::default();

        if self.requester_id.trim().is_empty() {
            errors.push("requester_id", "is required");
        }
        if self.aircraft_id.trim().is_empty() {
            errors.push("aircraft_id", "is required");
        }
        match self.requested_date {
            None => errors.push("requested_date", "is required"),
            Some(date) if date < today => {
                errors.push("requested_date", format!("{date} is in the past"));
            }
            Some(_) => {}
        }
        if self.requested_departure_time.is_none() {
            errors.push("requested_departure_time", "is required");
        }
        if self.origin.trim().is_empty() {
            errors.push("origin", "is required");
        }
        if self.destination.trim().is_empty() {
            errors.push("destination", "is required");
        }
        if self.passenger_count == 0 {
            errors.push("passenger_count", "must be at least 1");
        } else if let Some(capacity) = seat_capacity {
            if self.passenger_count > capacity {
                errors.push(
                    "passenger_count",
                    format!(
                        "{} exceeds the aircraft's {capacity} seats",
                        self.passenger_count
                    ),
                );
            }
        }

        errors
    }
}

/// A flight request as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRequest {
    /// System-assigned id.
    pub id: String,
    /// Quota-holder who submitted it.
    pub requester_id: String,
    /// Requester display name. May go stale; never used for checks.
    pub requester_name: String,
    /// Requested aircraft.
    pub aircraft_id: String,
    /// Aircraft registration for display. May go stale; never used for checks.
    pub aircraft_registration: Option<String>,
    /// Day of the flight.
    pub requested_date: NaiveDate,
    /// Desired departure time.
    pub requested_departure_time: NaiveTime,
    /// Departure location code, uppercase.
    pub origin: String,
    /// Arrival location code, uppercase.
    pub destination: String,
    /// Number of passengers.
    pub passenger_count: u32,
    /// Advisory priority.
    pub priority: Priority,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Current status.
    pub status: RequestStatus,
    /// Reason given with the last rejection or cancellation.
    pub status_reason: Option<String>,
    /// Plan created from this request, once scheduled.
    pub plan_id: Option<String>,
    /// When the request was submitted. Never changes.
    pub submitted_at: DateTime<Utc>,
    /// When the request last changed.
    pub updated_at: DateTime<Utc>,
}

impl FlightRequest {
    /// Build a new request from validated input.
    ///
    /// The caller must have checked `input` with [`RequestInput::validate`].
    ///
    /// # Errors
    ///
    /// Returns a validation error if a required date or time is missing.
    pub fn from_input(
        id: String,
        input: RequestInput,
        submitted_at: DateTime<Utc>,
    ) -> crate::error::Result<Self> {
        let requested_date = input
            .requested_date
            .ok_or_else(|| Error::invalid_field("requested_date", "is required"))?;
        let requested_departure_time = input
            .requested_departure_time
            .ok_or_else(|| Error::invalid_field("requested_departure_time", "is required"))?;

        Ok(Self {
            id,
            requester_id: input.requester_id.trim().to_string(),
            requester_name: input.requester_name.trim().to_string(),
            aircraft_id: input.aircraft_id.trim().to_string(),
            aircraft_registration: non_blank(input.aircraft_registration.as_deref()),
            requested_date,
            requested_departure_time: requested_departure_time
                .with_nanosecond(0)
                .unwrap_or(requested_departure_time),
            origin: normalize_location(&input.origin),
            destination: normalize_location(&input.destination),
            passenger_count: input.passenger_count,
            priority: input.priority,
            notes: non_blank(input.notes.as_deref()),
            status: RequestStatus::Requested,
            status_reason: None,
            plan_id: None,
            submitted_at,
            updated_at: submitted_at,
        })
    }
}

/// Filter for listing requests. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Only requests in this status.
    pub status: Option<RequestStatus>,
    /// Only requests from this requester.
    pub requester_id: Option<String>,
    /// Only requests for this aircraft.
    pub aircraft_id: Option<String>,
}

impl RequestFilter {
    /// Pending coordinator queue.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: Some(RequestStatus::Requested),
            ..Self::default()
        }
    }
}

/// One row of a request's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Request the entry belongs to.
    pub request_id: String,
    /// Status before the change. `None` for the submission itself.
    pub from_status: Option<RequestStatus>,
    /// Status after the change.
    pub to_status: RequestStatus,
    /// Who made the change.
    pub actor: String,
    /// Reason given, if any.
    pub reason: Option<String>,
    /// When the change was committed.
    pub at: DateTime<Utc>,
}
