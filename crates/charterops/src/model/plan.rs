//! Flight plans: scheduled, crewed, aircraft-assigned flights.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::request::FlightRequest;
use super::{non_blank, normalize_location};
use crate::error::{Error, FieldErrors};

/// Lifecycle status of a flight plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Booked, not yet flown.
    Scheduled,
    /// Flight under way.
    InProgress,
    /// Flown and logged.
    Completed,
    /// Called off.
    Cancelled,
}

impl PlanStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Scheduled,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Statuses that hold the aircraft for their window.
    pub const ACTIVE: [Self; 2] = [Self::Scheduled, Self::InProgress];

    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses from which a plan may move to `to`.
    #[must_use]
    pub fn sources_of(to: Self) -> &'static [Self] {
        match to {
            Self::Scheduled => &[],
            Self::InProgress => &[Self::Scheduled],
            Self::Completed => &[Self::InProgress],
            Self::Cancelled => &[Self::Scheduled, Self::InProgress],
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        Self::sources_of(to).contains(&self)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::invalid_field("status", format!("unknown plan status '{s}'")))
    }
}

/// Copilot assignment on a plan.
///
/// `Vacant` means a coordinator explicitly said "no copilot" (the UI sends
/// sentinels like `"none"`); `Unset` means the field was never filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum CopilotSlot {
    /// Never filled in.
    #[default]
    Unset,
    /// Explicitly no copilot.
    Vacant,
    /// Assigned crew member.
    Assigned(String),
}

impl CopilotSlot {
    /// Sentinels meaning "no copilot".
    const VACANT_SENTINELS: [&'static str; 4] = ["none", "nenhum", "-", "n/a"];

    /// Normalize a raw copilot field.
    #[must_use]
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None => Self::Unset,
            Some("") => Self::Vacant,
            Some(id)
                if Self::VACANT_SENTINELS
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(id)) =>
            {
                Self::Vacant
            }
            Some(id) => Self::Assigned(id.to_string()),
        }
    }

    /// Assigned crew member id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Unset | Self::Vacant => None,
        }
    }
}

/// What a coordinator supplies to create a plan.
///
/// When scheduling from a request, blank fields are taken from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDraft {
    /// Aircraft to fly.
    pub aircraft_id: Option<String>,
    /// Day of the flight.
    pub scheduled_date: Option<NaiveDate>,
    /// Departure time.
    pub scheduled_departure: Option<NaiveTime>,
    /// Estimated arrival. Earlier than departure means the next day.
    pub estimated_arrival: Option<NaiveTime>,
    /// Departure location code.
    pub origin: Option<String>,
    /// Arrival location code.
    pub destination: Option<String>,
    /// Pilot in command.
    pub pilot_id: String,
    /// Raw copilot field; see [`CopilotSlot::from_raw`].
    pub copilot_id: Option<String>,
    /// Estimated fuel load.
    pub estimated_fuel: Option<f64>,
    /// Notes from the coordinator.
    pub coordinator_notes: Option<String>,
}

impl PlanDraft {
    /// Fill blank fields from the request being scheduled.
    #[must_use]
    pub fn inherit_from(mut self, request: &FlightRequest) -> Self {
        if non_blank(self.aircraft_id.as_deref()).is_none() {
            self.aircraft_id = Some(request.aircraft_id.clone());
        }
        self.scheduled_date = self.scheduled_date.or(Some(request.requested_date));
        self.scheduled_departure = self
            .scheduled_departure
            .or(Some(request.requested_departure_time));
        if non_blank(self.origin.as_deref()).is_none() {
            self.origin = Some(request.origin.clone());
        }
        if non_blank(self.destination.as_deref()).is_none() {
            self.destination = Some(request.destination.clone());
        }
        self
    }

    /// Check every field and resolve the flight window.
    ///
    /// # Errors
    ///
    /// Returns every offending field.
    pub fn validate(&self) -> Result<ValidatedPlan, FieldErrors> {
        let mut errors = FieldErrors::default();

        let aircraft_id = non_blank(self.aircraft_id.as_deref());
        if aircraft_id.is_none() {
            errors.push("aircraft_id", "is required");
        }
        if self.scheduled_date.is_none() {
            errors.push("scheduled_date", "is required");
        }
        if self.scheduled_departure.is_none() {
            errors.push("scheduled_departure", "is required");
        }
        if self.estimated_arrival.is_none() {
            errors.push("estimated_arrival", "is required");
        }
        if let (Some(dep), Some(arr)) = (self.scheduled_departure, self.estimated_arrival) {
            if truncate(dep) == truncate(arr) {
                errors.push("estimated_arrival", "must differ from scheduled_departure");
            }
        }
        let origin = non_blank(self.origin.as_deref()).map(|o| normalize_location(&o));
        if origin.is_none() {
            errors.push("origin", "is required");
        }
        let destination = non_blank(self.destination.as_deref()).map(|d| normalize_location(&d));
        if destination.is_none() {
            errors.push("destination", "is required");
        }

        let pilot_id = self.pilot_id.trim().to_string();
        if pilot_id.is_empty() {
            errors.push("pilot_id", "is required");
        }
        let copilot = CopilotSlot::from_raw(self.copilot_id.as_deref());
        if copilot.id() == Some(pilot_id.as_str()) && !pilot_id.is_empty() {
            errors.push("copilot_id", "must be a different person from the pilot");
        }

        if let Some(fuel) = self.estimated_fuel {
            if !fuel.is_finite() || fuel < 0.0 {
                errors.push("estimated_fuel", "must be a non-negative number");
            }
        }

        match (
            errors.is_empty(),
            aircraft_id,
            self.scheduled_date,
            self.scheduled_departure,
            self.estimated_arrival,
            origin,
            destination,
        ) {
            (true, Some(aircraft_id), Some(date), Some(dep), Some(arr), Some(origin), Some(destination)) => {
                let departure = truncate(dep);
                let arrival = truncate(arr);
                let departure_at = date.and_time(departure);
                let arrival_at = if arrival > departure {
                    date.and_time(arrival)
                } else {
                    date.succ_opt().unwrap_or(date).and_time(arrival)
                };
                Ok(ValidatedPlan {
                    aircraft_id,
                    scheduled_date: date,
                    scheduled_departure: departure,
                    estimated_arrival: arrival,
                    departure_at,
                    arrival_at,
                    origin,
                    destination,
                    pilot_id,
                    copilot,
                    estimated_fuel: self.estimated_fuel,
                    coordinator_notes: non_blank(self.coordinator_notes.as_deref()),
                })
            }
            _ => Err(errors),
        }
    }
}

fn truncate(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// A draft that passed field validation, with its window resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    /// Aircraft to fly.
    pub aircraft_id: String,
    /// Day of the flight.
    pub scheduled_date: NaiveDate,
    /// Departure time.
    pub scheduled_departure: NaiveTime,
    /// Estimated arrival time.
    pub estimated_arrival: NaiveTime,
    /// Start of the window the aircraft is held.
    pub departure_at: NaiveDateTime,
    /// End of the window the aircraft is held.
    pub arrival_at: NaiveDateTime,
    /// Departure location code.
    pub origin: String,
    /// Arrival location code.
    pub destination: String,
    /// Pilot in command.
    pub pilot_id: String,
    /// Copilot assignment.
    pub copilot: CopilotSlot,
    /// Estimated fuel load.
    pub estimated_fuel: Option<f64>,
    /// Notes from the coordinator.
    pub coordinator_notes: Option<String>,
}

/// A flight plan as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    /// System-assigned id.
    pub id: String,
    /// Request this plan was created from, if any.
    pub source_request_id: Option<String>,
    /// Aircraft to fly.
    pub aircraft_id: String,
    /// Day of the flight.
    pub scheduled_date: NaiveDate,
    /// Departure time.
    pub scheduled_departure: NaiveTime,
    /// Estimated arrival time.
    pub estimated_arrival: NaiveTime,
    /// Start of the held window.
    pub departure_at: NaiveDateTime,
    /// End of the held window.
    pub arrival_at: NaiveDateTime,
    /// Departure location code.
    pub origin: String,
    /// Arrival location code.
    pub destination: String,
    /// Pilot in command.
    pub pilot_id: String,
    /// Copilot assignment.
    pub copilot: CopilotSlot,
    /// Estimated fuel load.
    pub estimated_fuel: Option<f64>,
    /// Notes from the coordinator.
    pub coordinator_notes: Option<String>,
    /// Current status.
    pub status: PlanStatus,
    /// Reason given with a cancellation.
    pub status_reason: Option<String>,
    /// Hours actually flown, once completed.
    pub actual_hours: Option<f64>,
    /// Logbook entry recorded for the flight.
    pub logbook_entry_id: Option<String>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// When the plan last changed.
    pub updated_at: DateTime<Utc>,
}

impl FlightPlan {
    /// Build a new scheduled plan.
    #[must_use]
    pub fn new(
        id: String,
        source_request_id: Option<String>,
        plan: ValidatedPlan,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_request_id,
            aircraft_id: plan.aircraft_id,
            scheduled_date: plan.scheduled_date,
            scheduled_departure: plan.scheduled_departure,
            estimated_arrival: plan.estimated_arrival,
            departure_at: plan.departure_at,
            arrival_at: plan.arrival_at,
            origin: plan.origin,
            destination: plan.destination,
            pilot_id: plan.pilot_id,
            copilot: plan.copilot,
            estimated_fuel: plan.estimated_fuel,
            coordinator_notes: plan.coordinator_notes,
            status: PlanStatus::Scheduled,
            status_reason: None,
            actual_hours: None,
            logbook_entry_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Whether two closed windows on the same aircraft intersect.
    #[must_use]
    pub fn overlaps(&self, departure_at: NaiveDateTime, arrival_at: NaiveDateTime) -> bool {
        self.departure_at <= arrival_at && departure_at <= self.arrival_at
    }
}

/// Filter for listing plans. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanFilter {
    /// Only plans in this status.
    pub status: Option<PlanStatus>,
    /// Only plans for this aircraft.
    pub aircraft_id: Option<String>,
    /// Only plans flying on this day.
    pub date: Option<NaiveDate>,
    /// Only plans flown by this pilot (as pilot or copilot).
    pub crew_id: Option<String>,
}
