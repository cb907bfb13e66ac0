//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands and turns their
//! arguments into workflow inputs.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Subcommand};

use crate::model::{
    parse_time, PlanDraft, PlanFilter, PlanStatus, Priority, RequestFilter, RequestInput,
    RequestStatus,
};
use crate::registry::AircraftStatus;

/// Flight request commands.
#[derive(Debug, Subcommand)]
pub enum RequestCommand {
    /// Submit a new flight request
    Submit(SubmitArgs),

    /// Approve a pending request
    Approve {
        /// Request id
        id: String,
    },

    /// Reject a pending or approved request
    Reject {
        /// Request id
        id: String,

        /// Reason given to the requester
        #[arg(short, long)]
        reason: Option<String>,

        /// Status the request is expected to be in; defaults to its current status
        #[arg(long, value_parser = parse_request_status)]
        expect: Option<RequestStatus>,
    },

    /// Withdraw a pending or approved request
    Cancel {
        /// Request id
        id: String,

        /// Reason given to the coordinators
        #[arg(short, long)]
        reason: Option<String>,

        /// Status the request is expected to be in; defaults to its current status
        #[arg(long, value_parser = parse_request_status)]
        expect: Option<RequestStatus>,
    },

    /// Create a plan from a request; blank plan fields come from the request
    Schedule {
        /// Request id
        id: String,

        /// Status the request is expected to be in; defaults to its current status
        #[arg(long, value_parser = parse_request_status)]
        expect: Option<RequestStatus>,

        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Show a request
    Show {
        /// Request id
        id: String,
    },

    /// Show the status history of a request
    History {
        /// Request id
        id: String,
    },

    /// List requests, most urgent first
    List(RequestListArgs),
}

/// Arguments for `request submit`.
#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Id of the person asking for the flight
    #[arg(long)]
    pub requester: String,

    /// Display name of the requester
    #[arg(long, default_value = "")]
    pub name: String,

    /// Aircraft id
    #[arg(short, long)]
    pub aircraft: String,

    /// Flight date (YYYY-MM-DD)
    #[arg(short, long)]
    pub date: NaiveDate,

    /// Departure time (HH:MM)
    #[arg(long, value_parser = parse_clock)]
    pub departure: NaiveTime,

    /// Origin airport code
    #[arg(long)]
    pub origin: String,

    /// Destination airport code
    #[arg(long)]
    pub destination: String,

    /// Number of passengers
    #[arg(short, long, default_value = "1")]
    pub passengers: u32,

    /// Priority (low, medium, high, urgent)
    #[arg(long, default_value = "medium", value_parser = parse_priority)]
    pub priority: Priority,

    /// Free-text notes
    #[arg(long)]
    pub notes: Option<String>,
}

impl SubmitArgs {
    /// Convert into a submission.
    #[must_use]
    pub fn into_input(self) -> RequestInput {
        RequestInput {
            requester_id: self.requester,
            requester_name: self.name,
            aircraft_id: self.aircraft,
            aircraft_registration: None,
            requested_date: Some(self.date),
            requested_departure_time: Some(self.departure),
            origin: self.origin,
            destination: self.destination,
            passenger_count: self.passengers,
            priority: self.priority,
            notes: self.notes,
        }
    }
}

/// Filters for `request list`.
#[derive(Debug, Args)]
pub struct RequestListArgs {
    /// Only requests in this status
    #[arg(short, long, value_parser = parse_request_status, conflicts_with = "pending")]
    pub status: Option<RequestStatus>,

    /// Only requests waiting for a coordinator
    #[arg(long)]
    pub pending: bool,

    /// Only requests from this requester
    #[arg(long)]
    pub requester: Option<String>,

    /// Only requests for this aircraft
    #[arg(short, long)]
    pub aircraft: Option<String>,
}

impl RequestListArgs {
    /// Convert into a store filter.
    #[must_use]
    pub fn into_filter(self) -> RequestFilter {
        let status = if self.pending {
            Some(RequestStatus::Requested)
        } else {
            self.status
        };
        RequestFilter {
            status,
            requester_id: self.requester,
            aircraft_id: self.aircraft,
        }
    }
}

/// Flight plan commands.
#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    /// Create a plan not tied to a request
    Create(PlanArgs),

    /// Mark a scheduled plan as under way
    Start {
        /// Plan id
        id: String,
    },

    /// Complete a plan, booking the hours flown
    Complete {
        /// Plan id
        id: String,

        /// Hours actually flown
        #[arg(long)]
        hours: f64,
    },

    /// Cancel a plan that has not been completed
    Cancel {
        /// Plan id
        id: String,

        /// Reason given to the requester
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show a plan
    Show {
        /// Plan id
        id: String,
    },

    /// List plans, earliest departure first
    List(PlanListArgs),
}

/// Plan fields shared by `plan create` and `request schedule`.
#[derive(Debug, Default, Args)]
pub struct PlanArgs {
    /// Aircraft id
    #[arg(short, long)]
    pub aircraft: Option<String>,

    /// Flight date (YYYY-MM-DD)
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Departure time (HH:MM)
    #[arg(long, value_parser = parse_clock)]
    pub departure: Option<NaiveTime>,

    /// Estimated arrival (HH:MM); earlier than departure means next day
    #[arg(long, value_parser = parse_clock)]
    pub arrival: Option<NaiveTime>,

    /// Origin airport code
    #[arg(long)]
    pub origin: Option<String>,

    /// Destination airport code
    #[arg(long)]
    pub destination: Option<String>,

    /// Pilot in command
    #[arg(long, default_value = "")]
    pub pilot: String,

    /// Copilot; "none" for an explicitly empty seat
    #[arg(long)]
    pub copilot: Option<String>,

    /// Estimated fuel
    #[arg(long)]
    pub fuel: Option<f64>,

    /// Coordinator notes
    #[arg(long)]
    pub notes: Option<String>,
}

impl PlanArgs {
    /// Convert into a plan draft.
    #[must_use]
    pub fn into_draft(self) -> PlanDraft {
        PlanDraft {
            aircraft_id: self.aircraft,
            scheduled_date: self.date,
            scheduled_departure: self.departure,
            estimated_arrival: self.arrival,
            origin: self.origin,
            destination: self.destination,
            pilot_id: self.pilot,
            copilot_id: self.copilot,
            estimated_fuel: self.fuel,
            coordinator_notes: self.notes,
        }
    }
}

/// Filters for `plan list`.
#[derive(Debug, Args)]
pub struct PlanListArgs {
    /// Only plans in this status
    #[arg(short, long, value_parser = parse_plan_status)]
    pub status: Option<PlanStatus>,

    /// Only plans for this aircraft
    #[arg(short, long)]
    pub aircraft: Option<String>,

    /// Only plans on this date
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Only plans flown by this crew member, as pilot or copilot
    #[arg(long)]
    pub crew: Option<String>,
}

impl PlanListArgs {
    /// Convert into a store filter.
    #[must_use]
    pub fn into_filter(self) -> PlanFilter {
        PlanFilter {
            status: self.status,
            aircraft_id: self.aircraft,
            date: self.date,
            crew_id: self.crew,
        }
    }
}

/// Aircraft registry administration.
#[derive(Debug, Subcommand)]
pub enum AircraftCommand {
    /// Register an aircraft, or update one keeping its hours
    Add {
        /// Aircraft id
        id: String,

        /// Registration mark, e.g. PT-ABC
        #[arg(short, long)]
        registration: String,

        /// Passenger seats
        #[arg(short, long)]
        seats: Option<u32>,

        /// Hours already flown, for a new aircraft
        #[arg(long, default_value = "0")]
        hours: f64,
    },

    /// List registered aircraft
    List,

    /// Show an aircraft
    Show {
        /// Aircraft id
        id: String,
    },

    /// Change an aircraft's operational status
    Status {
        /// Aircraft id
        id: String,

        /// New status (active, maintenance, inactive)
        #[arg(value_parser = parse_aircraft_status)]
        status: AircraftStatus,
    },
}

/// Notification inbox commands.
#[derive(Debug, Subcommand)]
pub enum InboxCommand {
    /// List notices for a recipient, newest first
    List {
        /// Recipient id; defaults to the coordinator pool
        recipient: Option<String>,

        /// Only unread notices
        #[arg(short, long)]
        unread: bool,
    },

    /// Mark a notice as read
    Read {
        /// Notice id
        id: String,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn parse_clock(text: &str) -> Result<NaiveTime, String> {
    parse_time("time", text).map_err(|_| format!("'{text}' is not a time (HH:MM)"))
}

fn parse_priority(text: &str) -> Result<Priority, String> {
    text.parse()
        .map_err(|_| format!("'{text}' is not a priority (low, medium, high, urgent)"))
}

fn parse_request_status(text: &str) -> Result<RequestStatus, String> {
    text.parse().map_err(|_| {
        format!("'{text}' is not a request status (requested, approved, scheduled, rejected, cancelled)")
    })
}

fn parse_plan_status(text: &str) -> Result<PlanStatus, String> {
    text.parse().map_err(|_| {
        format!("'{text}' is not a plan status (scheduled, in_progress, completed, cancelled)")
    })
}

fn parse_aircraft_status(text: &str) -> Result<AircraftStatus, String> {
    text.parse()
        .map_err(|_| format!("'{text}' is not an aircraft status (active, maintenance, inactive)"))
}
