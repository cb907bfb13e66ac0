//! Coordination engine.
//!
//! [`Coordinator`] is the only component that moves requests and plans
//! between statuses. Every write path re-checks the stored status inside a
//! write transaction, so two actors racing on the same entity cannot both
//! succeed. Side effects that live outside the store (aircraft hours,
//! logbook, notifications) run after the local commit.

mod plans;
mod recovery;
mod requests;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::warn;

pub use recovery::SweepReport;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logbook::{LogbookWriter, SqliteLogbook};
use crate::model::{
    FlightPlan, FlightRequest, HistoryEntry, PlanFilter, PlanStatus, RequestFilter,
    RequestStatus, TransitionEvent,
};
use crate::notify::{notices_for, NoticeContext, NotificationSink, SqliteInbox};
use crate::registry::{Aircraft, AircraftRegistry, SqliteAircraftRegistry};
use crate::storage::reconciliation::{self, ReconciliationTask, TaskKind};
use crate::storage::{self as store, Storage, StorageStats};

/// Systems the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    /// Aircraft status, capacity and hours.
    pub registry: Arc<dyn AircraftRegistry>,
    /// Flight logbook.
    pub logbook: Arc<dyn LogbookWriter>,
    /// Notification delivery.
    pub notifier: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// Bind every collaborator to the charterops database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_sqlite(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(SqliteAircraftRegistry::open(path, busy_timeout)?),
            logbook: Arc::new(SqliteLogbook::open(path, busy_timeout)?),
            notifier: Arc::new(SqliteInbox::open(path, busy_timeout)?),
        })
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Counts shown on the coordinator dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    /// Requests waiting for a coordinator.
    pub pending_requests: i64,
    /// Plans booked but not yet flown.
    pub scheduled_plans: i64,
    /// Plans flying today, whatever their status, cancellations excluded.
    pub flights_today: i64,
}

/// The coordination engine.
pub struct Coordinator {
    storage: Mutex<Storage>,
    registry: Arc<dyn AircraftRegistry>,
    logbook: Arc<dyn LogbookWriter>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Assemble an engine.
    #[must_use]
    pub fn new(
        storage: Storage,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            storage: Mutex::new(storage),
            registry: collaborators.registry,
            logbook: collaborators.logbook,
            notifier: collaborators.notifier,
            clock,
            config,
        }
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current instant, at the microsecond precision timestamps are stored with.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    // === Reads ===

    /// Get a request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a database error.
    pub fn get_request(&self, id: &str) -> Result<FlightRequest> {
        store::requests::require(self.store().connection(), id)
    }

    /// Get a plan.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a database error.
    pub fn get_plan(&self, id: &str) -> Result<FlightPlan> {
        store::plans::require(self.store().connection(), id)
    }

    /// Status history of a request, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown request, or a database error.
    pub fn request_history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        let storage = self.store();
        let conn = storage.connection();
        store::requests::require(conn, id)?;
        store::requests::history(conn, id)
    }

    /// Requests matching `filter`, urgent first, then oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<FlightRequest>> {
        store::requests::list(self.store().connection(), filter)
    }

    /// Plans matching `filter`, earliest departure first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<FlightPlan>> {
        store::plans::list(self.store().connection(), filter)
    }

    /// Dashboard counts, computed from the store on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn dashboard_counts(&self) -> Result<DashboardCounts> {
        let today = self.clock.today();
        let storage = self.store();
        let conn = storage.connection();
        Ok(DashboardCounts {
            pending_requests: store::requests::count_by_status(conn, RequestStatus::Requested)?,
            scheduled_plans: store::plans::count_by_status(conn, PlanStatus::Scheduled)?,
            flights_today: store::plans::count_on_date(conn, today)?,
        })
    }

    /// Unread notices for a recipient.
    ///
    /// # Errors
    ///
    /// Returns `DependencyFailure` if the notification sink cannot be queried.
    pub fn unread_count(&self, recipient_id: &str) -> Result<u64> {
        self.notifier
            .count_unread(recipient_id)
            .map_err(|e| Error::dependency("notification sink", e.to_string()))
    }

    /// Side effects still waiting to be carried out.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn open_reconciliation_tasks(&self) -> Result<Vec<ReconciliationTask>> {
        reconciliation::open_tasks(self.store().connection())
    }

    /// Database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.store().stats()
    }

    // === Shared helpers ===

    fn lookup_aircraft(&self, id: &str) -> Result<Option<Aircraft>> {
        self.registry
            .get_aircraft(id)
            .map_err(|e| Error::dependency("aircraft registry", e.to_string()))
    }

    /// Look up an aircraft that a plan is about to hold.
    ///
    /// Unknown aircraft are `NotFound`; grounded ones fail validation on
    /// `aircraft_id`, as do ones too small for `passengers`.
    fn bookable_aircraft(&self, id: &str, passengers: Option<u32>) -> Result<Aircraft> {
        let aircraft = self
            .lookup_aircraft(id)?
            .ok_or_else(|| Error::not_found("aircraft", id))?;

        if !aircraft.status.is_available() {
            return Err(Error::invalid_field(
                "aircraft_id",
                format!("aircraft {id} is {}", aircraft.status),
            ));
        }
        if let (Some(capacity), Some(passengers)) = (aircraft.seat_capacity, passengers) {
            if passengers > capacity {
                return Err(Error::invalid_field(
                    "aircraft_id",
                    format!("aircraft {id} seats {capacity}, request needs {passengers}"),
                ));
            }
        }
        Ok(aircraft)
    }

    /// Deliver the notices for a committed transition.
    ///
    /// Delivery failures are logged and queued for reconciliation; they
    /// never reach the caller. Must not be called while holding the store.
    fn emit(&self, event: &TransitionEvent, requester_id: Option<&str>, flight: &str, reason: Option<&str>) {
        if !self.config.notifications.enabled {
            return;
        }

        let at = self.now();
        let ctx = NoticeContext {
            requester_id,
            coordinators: &self.config.notifications.coordinator_recipient,
            flight,
            reason,
            at,
        };

        for notice in notices_for(event, &ctx) {
            if let Err(e) = self.notifier.notify(&notice) {
                warn!(
                    entity = %event.entity_type(),
                    entity_id = %event.entity_id,
                    recipient = %notice.recipient_id,
                    error = %e,
                    "notification delivery failed"
                );
                let detail = format!("{} to {}: {e}", notice.subject, notice.recipient_id);
                if let Err(e) = reconciliation::record(
                    self.store().connection(),
                    TaskKind::Notification,
                    &event.entity_id,
                    &detail,
                    at,
                ) {
                    warn!(entity_id = %event.entity_id, error = %e, "could not queue notification retry");
                }
            }
        }
    }
}

/// One-line description of a flight for notices.
fn describe_flight(origin: &str, destination: &str, date: NaiveDate, departure: NaiveTime) -> String {
    format!(
        "{origin} -> {destination} on {date} {}",
        departure.format("%H:%M")
    )
}

fn describe_request(request: &FlightRequest) -> String {
    describe_flight(
        &request.origin,
        &request.destination,
        request.requested_date,
        request.requested_departure_time,
    )
}

fn describe_plan(plan: &FlightPlan) -> String {
    describe_flight(
        &plan.origin,
        &plan.destination,
        plan.scheduled_date,
        plan.scheduled_departure,
    )
}
