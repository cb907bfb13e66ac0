//! `charterops` - A coordination engine for charter flight requests
//!
//! This library moves flight requests from submission to a scheduled plan,
//! keeps aircraft from being double-booked, and records completed flights in
//! the aircraft's hours and logbook.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logbook;
pub mod logging;
pub mod model;
pub mod notify;
pub mod registry;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use engine::{Collaborators, Coordinator, DashboardCounts, SweepReport};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{FlightPlan, FlightRequest, PlanStatus, RequestStatus};
pub use storage::{Storage, StorageStats};
