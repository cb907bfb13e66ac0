use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use super::*;
use crate::clock::FixedClock;
use crate::logbook::{FlightRecord, SqliteLogbook};
use crate::model::{CopilotSlot, PlanDraft, Priority, RequestInput};
use crate::notify::SqliteInbox;
use crate::registry::AircraftStatus;
use crate::storage::reconciliation::TaskKind;

// === Test doubles ===

#[derive(Debug)]
struct FlakyRegistry {
    inner: SqliteAircraftRegistry,
    fail_lookup: AtomicBool,
    fail_increment: AtomicBool,
    lose_ack: AtomicBool,
    fail_check: AtomicBool,
}

impl FlakyRegistry {
    fn new(inner: SqliteAircraftRegistry) -> Self {
        Self {
            inner,
            fail_lookup: AtomicBool::new(false),
            fail_increment: AtomicBool::new(false),
            lose_ack: AtomicBool::new(false),
            fail_check: AtomicBool::new(false),
        }
    }

    fn hours(&self, id: &str) -> f64 {
        self.inner.get_aircraft(id).unwrap().unwrap().cumulative_hours
    }
}

impl AircraftRegistry for FlakyRegistry {
    fn get_aircraft(&self, id: &str) -> Result<Option<Aircraft>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(Error::internal("registry offline"));
        }
        self.inner.get_aircraft(id)
    }

    fn increment_hours(&self, id: &str, hours: f64, op_key: &str) -> Result<f64> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(Error::internal("registry offline"));
        }
        let total = self.inner.increment_hours(id, hours, op_key)?;
        if self.lose_ack.load(Ordering::SeqCst) {
            return Err(Error::internal("connection reset"));
        }
        Ok(total)
    }

    fn hours_applied(&self, op_key: &str) -> Result<bool> {
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(Error::internal("registry offline"));
        }
        self.inner.hours_applied(op_key)
    }
}

#[derive(Debug)]
struct FlakyLogbook {
    inner: SqliteLogbook,
    fail: AtomicBool,
}

impl LogbookWriter for FlakyLogbook {
    fn record_flight(&self, record: &FlightRecord) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("logbook offline"));
        }
        self.inner.record_flight(record)
    }
}

#[derive(Debug)]
struct FlakyInbox {
    inner: SqliteInbox,
    fail: AtomicBool,
}

impl NotificationSink for FlakyInbox {
    fn notify(&self, notice: &crate::model::Notification) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("inbox offline"));
        }
        self.inner.notify(notice)
    }

    fn count_unread(&self, recipient_id: &str) -> Result<u64> {
        self.inner.count_unread(recipient_id)
    }
}

// === Harness ===

struct Harness {
    engine: Coordinator,
    registry: Arc<FlakyRegistry>,
    logbook: Arc<FlakyLogbook>,
    inbox: Arc<FlakyInbox>,
    clock: Arc<FixedClock>,
}

const REQUESTER: &str = "cotista-1";
const COORDINATORS: &str = "coordinators";

fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

fn flight_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn aircraft(id: &str, registration: &str, status: AircraftStatus) -> Aircraft {
    Aircraft {
        id: id.to_string(),
        registration: registration.to_string(),
        status,
        seat_capacity: Some(4),
        cumulative_hours: 100.0,
    }
}

fn harness_with(config: Config) -> Harness {
    crate::logging::init_test_logging();

    let registry = SqliteAircraftRegistry::open_in_memory().unwrap();
    registry
        .register(&aircraft("A1", "PT-ABC", AircraftStatus::Active))
        .unwrap();
    registry
        .register(&aircraft("A2", "PT-XYZ", AircraftStatus::Maintenance))
        .unwrap();
    registry
        .register(&aircraft("A3", "PT-QRS", AircraftStatus::Active))
        .unwrap();

    let registry = Arc::new(FlakyRegistry::new(registry));
    let logbook = Arc::new(FlakyLogbook {
        inner: SqliteLogbook::open_in_memory().unwrap(),
        fail: AtomicBool::new(false),
    });
    let inbox = Arc::new(FlakyInbox {
        inner: SqliteInbox::open_in_memory().unwrap(),
        fail: AtomicBool::new(false),
    });
    let clock = Arc::new(FixedClock::new(start_of_test()));

    let engine = Coordinator::new(
        Storage::open_in_memory().unwrap(),
        Collaborators {
            registry: registry.clone(),
            logbook: logbook.clone(),
            notifier: inbox.clone(),
        },
        clock.clone(),
        config,
    );

    Harness {
        engine,
        registry,
        logbook,
        inbox,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(Config::default())
}

fn request_input() -> RequestInput {
    RequestInput {
        requester_id: REQUESTER.to_string(),
        requester_name: "Ana".to_string(),
        aircraft_id: "A1".to_string(),
        requested_date: Some(flight_day()),
        requested_departure_time: Some(time(9, 0)),
        origin: "CGR".to_string(),
        destination: "CWB".to_string(),
        passenger_count: 2,
        priority: "media".parse().unwrap(),
        ..RequestInput::default()
    }
}

fn plan_times(dep: NaiveTime, arr: NaiveTime) -> PlanDraft {
    PlanDraft {
        scheduled_departure: Some(dep),
        estimated_arrival: Some(arr),
        pilot_id: "P1".to_string(),
        ..PlanDraft::default()
    }
}

fn direct_plan(aircraft_id: &str, date: NaiveDate, dep: NaiveTime, arr: NaiveTime) -> PlanDraft {
    PlanDraft {
        aircraft_id: Some(aircraft_id.to_string()),
        scheduled_date: Some(date),
        origin: Some("CGR".to_string()),
        destination: Some("CWB".to_string()),
        ..plan_times(dep, arr)
    }
}

/// A plan on A1 that is in progress, created from a request.
fn flying_plan(h: &Harness) -> FlightPlan {
    let request = h.engine.submit_request(request_input()).unwrap();
    let (_, plan) = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap();
    h.engine.start_plan(&plan.id, "P1").unwrap()
}

fn past_grace(h: &Harness) {
    h.clock.advance(Duration::minutes(10));
}

// === Scenario ===

#[test]
fn test_end_to_end_scenario() {
    let h = harness();

    let request = h.engine.submit_request(request_input()).unwrap();
    assert_eq!(request.status, RequestStatus::Requested);
    assert_eq!(request.priority, Priority::Medium);
    assert_eq!(request.aircraft_registration.as_deref(), Some("PT-ABC"));

    let listed = h.engine.list_requests(&RequestFilter::default()).unwrap();
    assert_eq!(listed, vec![request.clone()]);

    let approved = h.engine.approve_request(&request.id, "coord").unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);

    let (scheduled, plan) = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Approved,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap();
    assert_eq!(scheduled.status, RequestStatus::Scheduled);
    assert_eq!(scheduled.plan_id.as_deref(), Some(plan.id.as_str()));
    assert_eq!(plan.status, PlanStatus::Scheduled);
    assert_eq!(plan.source_request_id.as_deref(), Some(request.id.as_str()));
    assert_eq!(plan.aircraft_id, "A1");
    assert_eq!(plan.scheduled_date, flight_day());
    assert_eq!(plan.origin, "CGR");
    assert_eq!(plan.copilot, CopilotSlot::Unset);
    assert_eq!(h.engine.list_plans(&PlanFilter::default()).unwrap().len(), 1);

    let started = h.engine.start_plan(&plan.id, "P1").unwrap();
    assert_eq!(started.status, PlanStatus::InProgress);

    let completed = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap();
    assert_eq!(completed.status, PlanStatus::Completed);
    assert_eq!(completed.actual_hours, Some(2.1));
    assert!(completed.logbook_entry_id.is_some());

    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);
    let entries = h.logbook.inner.entries_for_aircraft("A1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record.aircraft_id, "A1");
    assert!((entries[0].record.hours - 2.1).abs() < 1e-9);
    assert_eq!(Some(&entries[0].id), completed.logbook_entry_id.as_ref());

    let history = h.engine.request_history(&request.id).unwrap();
    let moves: Vec<_> = history.iter().map(|e| (e.from_status, e.to_status)).collect();
    assert_eq!(
        moves,
        [
            (None, RequestStatus::Requested),
            (Some(RequestStatus::Requested), RequestStatus::Approved),
            (Some(RequestStatus::Approved), RequestStatus::Scheduled),
        ]
    );

    // submission -> coordinators; approval, scheduling, completion -> requester
    assert_eq!(h.engine.unread_count(COORDINATORS).unwrap(), 1);
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 3);
    assert!(h.engine.open_reconciliation_tasks().unwrap().is_empty());
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 0);
}

// === Requests ===

#[test]
fn test_approve_twice_is_rejected() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();

    h.engine.approve_request(&request.id, "coord").unwrap();
    let err = h.engine.approve_request(&request.id, "coord").unwrap_err();

    assert!(err.is_invalid_transition());
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 1);
    assert_eq!(h.engine.request_history(&request.id).unwrap().len(), 2);
}

#[test]
fn test_reject_refused_once_request_moved_on() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    h.engine.approve_request(&request.id, "coord-a").unwrap();

    // coord-b still sees the request as pending
    let err = h
        .engine
        .reject_request(&request.id, RequestStatus::Requested, "coord-b", None)
        .unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(
        h.engine.get_request(&request.id).unwrap().status,
        RequestStatus::Approved
    );
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 1);

    let err = h
        .engine
        .cancel_request(&request.id, RequestStatus::Requested, REQUESTER, None)
        .unwrap_err();
    assert!(err.is_invalid_transition());

    let err = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord-b",
        )
        .unwrap_err();
    assert!(err.is_invalid_transition());
    assert!(h.engine.list_plans(&PlanFilter::default()).unwrap().is_empty());

    // With fresh data the rejection goes through
    let rejected = h
        .engine
        .reject_request(&request.id, RequestStatus::Approved, "coord-b", None)
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 2);
}

#[test]
fn test_submitted_request_round_trips_at_sub_microsecond_clock() {
    let h = harness();
    h.clock.advance(Duration::nanoseconds(583_118_227));

    let request = h.engine.submit_request(request_input()).unwrap();
    let listed = h.engine.list_requests(&RequestFilter::default()).unwrap();
    assert_eq!(listed, vec![request.clone()]);
    assert_eq!(request.submitted_at.timestamp_subsec_nanos(), 583_118_000);

    let plan = h
        .engine
        .create_plan(direct_plan("A3", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();
    assert_eq!(h.engine.get_plan(&plan.id).unwrap(), plan);
}

#[test]
fn test_unknown_request_is_not_found() {
    let h = harness();
    assert!(h.engine.approve_request("nope", "coord").unwrap_err().is_not_found());
    assert!(h.engine.get_request("nope").unwrap_err().is_not_found());
    assert!(h.engine.request_history("nope").unwrap_err().is_not_found());
}

#[test]
fn test_reject_records_reason_and_notifies() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    h.engine.approve_request(&request.id, "coord").unwrap();

    let rejected = h
        .engine
        .reject_request(
            &request.id,
            RequestStatus::Approved,
            "coord",
            Some("  aircraft in maintenance "),
        )
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.status_reason.as_deref(), Some("aircraft in maintenance"));

    let notices = h.inbox.inner.list_for(REQUESTER, false).unwrap();
    assert!(notices
        .iter()
        .any(|n| n.body.contains("aircraft in maintenance")));

    let last = h.engine.request_history(&request.id).unwrap().pop().unwrap();
    assert_eq!(last.reason.as_deref(), Some("aircraft in maintenance"));
    assert_eq!(last.actor, "coord");

    assert!(h
        .engine
        .cancel_request(&request.id, RequestStatus::Rejected, REQUESTER, None)
        .unwrap_err()
        .is_invalid_transition());
}

#[test]
fn test_cancel_request_notifies_coordinators() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();

    let cancelled = h
        .engine
        .cancel_request(&request.id, RequestStatus::Requested, REQUESTER, Some("plans changed"))
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(h.engine.unread_count(COORDINATORS).unwrap(), 2);
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 0);
}

#[test]
fn test_submit_lists_every_invalid_field_and_writes_nothing() {
    let h = harness();
    let input = RequestInput {
        aircraft_id: "A1".to_string(),
        passenger_count: 0,
        ..RequestInput::default()
    };

    let err = h.engine.submit_request(input).unwrap_err();
    let fields = err.fields().unwrap();
    for field in [
        "requester_id",
        "requested_date",
        "requested_departure_time",
        "origin",
        "destination",
        "passenger_count",
    ] {
        assert!(fields.contains(field), "missing error for {field}");
    }
    assert!(h.engine.list_requests(&RequestFilter::default()).unwrap().is_empty());
    assert_eq!(h.engine.unread_count(COORDINATORS).unwrap(), 0);
}

#[test]
fn test_requested_date_boundaries() {
    let h = harness();

    let mut input = request_input();
    input.requested_date = Some(today());
    assert!(h.engine.submit_request(input).is_ok());

    let mut input = request_input();
    input.requested_date = today().pred_opt();
    let err = h.engine.submit_request(input).unwrap_err();
    assert!(err.fields().unwrap().contains("requested_date"));
}

#[test]
fn test_passenger_count_bounded_by_seats() {
    let h = harness();
    let mut input = request_input();
    input.passenger_count = 5;
    let err = h.engine.submit_request(input).unwrap_err();
    assert!(err.fields().unwrap().contains("passenger_count"));
}

#[test]
fn test_submit_unknown_aircraft() {
    let h = harness();
    let mut input = request_input();
    input.aircraft_id = "ghost".to_string();
    assert!(h.engine.submit_request(input).unwrap_err().is_not_found());
}

#[test]
fn test_submit_for_grounded_aircraft_stays_pending() {
    let h = harness();
    let mut input = request_input();
    input.aircraft_id = "A2".to_string();
    let request = h.engine.submit_request(input).unwrap();
    assert_eq!(request.status, RequestStatus::Requested);

    let err = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap_err();
    assert!(err.fields().unwrap().contains("aircraft_id"));
    assert_eq!(
        h.engine.get_request(&request.id).unwrap().status,
        RequestStatus::Requested
    );
}

#[test]
fn test_submit_with_registry_offline() {
    let h = harness();
    h.registry.fail_lookup.store(true, Ordering::SeqCst);
    assert!(h
        .engine
        .submit_request(request_input())
        .unwrap_err()
        .is_dependency_failure());
}

#[test]
fn test_pending_queue_orders_by_priority() {
    let h = harness();
    let mut low = request_input();
    low.priority = Priority::Low;
    let low = h.engine.submit_request(low).unwrap();

    h.clock.advance(Duration::minutes(1));
    let mut urgent = request_input();
    urgent.priority = "urgente".parse().unwrap();
    let urgent = h.engine.submit_request(urgent).unwrap();

    let queue = h.engine.list_requests(&RequestFilter::pending()).unwrap();
    let ids: Vec<_> = queue.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, [urgent.id.as_str(), low.id.as_str()]);
}

// === Scheduling ===

#[test]
fn test_schedule_conflict_leaves_request_unchanged() {
    let h = harness();
    let blocking = h
        .engine
        .create_plan(direct_plan("A1", flight_day(), time(10, 0), time(12, 0)), "coord")
        .unwrap();
    let request = h.engine.submit_request(request_input()).unwrap();

    let err = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap_err();

    match err {
        Error::SchedulingConflict {
            aircraft_id,
            conflicting_plan_id,
        } => {
            assert_eq!(aircraft_id, "A1");
            assert_eq!(conflicting_plan_id, blocking.id);
        }
        other => panic!("unexpected error: {other}"),
    }

    let unchanged = h.engine.get_request(&request.id).unwrap();
    assert_eq!(unchanged, request);
    assert_eq!(h.engine.request_history(&request.id).unwrap().len(), 1);
    assert_eq!(h.engine.list_plans(&PlanFilter::default()).unwrap().len(), 1);
}

#[test]
fn test_schedule_on_another_aircraft() {
    let h = harness();
    h.engine
        .create_plan(direct_plan("A1", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();
    let request = h.engine.submit_request(request_input()).unwrap();

    let draft = PlanDraft {
        aircraft_id: Some("A3".to_string()),
        ..plan_times(time(9, 0), time(11, 0))
    };
    let (request, plan) = h
        .engine
        .schedule_from_request(&request.id, RequestStatus::Requested, draft, "coord")
        .unwrap();
    assert_eq!(request.status, RequestStatus::Scheduled);
    assert_eq!(plan.aircraft_id, "A3");
}

#[test]
fn test_direct_scheduling_can_be_disabled() {
    let mut config = Config::default();
    config.workflow.allow_direct_scheduling = false;
    let h = harness_with(config);
    let request = h.engine.submit_request(request_input()).unwrap();

    let err = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap_err();
    assert!(err.is_invalid_transition());

    h.engine.approve_request(&request.id, "coord").unwrap();
    let (scheduled, _) = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Approved,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap();
    assert_eq!(scheduled.status, RequestStatus::Scheduled);
}

#[test]
fn test_direct_scheduling_keeps_audit_trail() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    h.engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Requested,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap();

    let last = h.engine.request_history(&request.id).unwrap().pop().unwrap();
    assert_eq!(last.from_status, Some(RequestStatus::Requested));
    assert_eq!(last.to_status, RequestStatus::Scheduled);
}

#[test]
fn test_schedule_terminal_request_refused() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    h.engine.reject_request(&request.id, RequestStatus::Requested, "coord", None).unwrap();

    let err = h
        .engine
        .schedule_from_request(
            &request.id,
            RequestStatus::Rejected,
            plan_times(time(9, 0), time(11, 0)),
            "coord",
        )
        .unwrap_err();
    assert!(err.is_invalid_transition());
    assert!(h.engine.list_plans(&PlanFilter::default()).unwrap().is_empty());
}

#[test]
fn test_schedule_validates_draft() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    let draft = PlanDraft {
        copilot_id: Some("P1".to_string()),
        ..plan_times(time(9, 0), time(9, 0))
    };

    let err = h
        .engine
        .schedule_from_request(&request.id, RequestStatus::Requested, draft, "coord")
        .unwrap_err();
    let fields = err.fields().unwrap();
    assert!(fields.contains("estimated_arrival"));
    assert!(fields.contains("copilot_id"));
}

// === Plans ===

#[test]
fn test_overlapping_plans_conflict() {
    let h = harness();
    let first = h
        .engine
        .create_plan(direct_plan("A1", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();

    let err = h
        .engine
        .create_plan(direct_plan("A1", flight_day(), time(10, 0), time(12, 0)), "coord")
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains(&first.id));

    h.engine
        .create_plan(direct_plan("A1", flight_day(), time(12, 0), time(14, 0)), "coord")
        .unwrap();
    h.engine
        .create_plan(direct_plan("A3", flight_day(), time(10, 0), time(12, 0)), "coord")
        .unwrap();
}

#[test]
fn test_cancelled_plan_frees_aircraft() {
    let h = harness();
    let first = h
        .engine
        .create_plan(direct_plan("A1", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();
    h.engine.cancel_plan(&first.id, "coord", None).unwrap();

    h.engine
        .create_plan(direct_plan("A1", flight_day(), time(10, 0), time(12, 0)), "coord")
        .unwrap();
}

#[test]
fn test_overnight_plan_blocks_next_morning() {
    let h = harness();
    h.engine
        .create_plan(direct_plan("A1", flight_day(), time(22, 0), time(1, 0)), "coord")
        .unwrap();

    let next_day = flight_day().succ_opt().unwrap();
    let err = h
        .engine
        .create_plan(direct_plan("A1", next_day, time(0, 30), time(2, 0)), "coord")
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn test_create_plan_checks_aircraft() {
    let h = harness();
    let err = h
        .engine
        .create_plan(direct_plan("A2", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap_err();
    assert!(err.fields().unwrap().contains("aircraft_id"));

    let err = h
        .engine
        .create_plan(direct_plan("ghost", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_copilot_sentinel_is_vacant() {
    let h = harness();
    let draft = PlanDraft {
        copilot_id: Some("none".to_string()),
        ..direct_plan("A1", flight_day(), time(9, 0), time(11, 0))
    };
    let plan = h.engine.create_plan(draft, "coord").unwrap();
    assert_eq!(h.engine.get_plan(&plan.id).unwrap().copilot, CopilotSlot::Vacant);
}

#[test]
fn test_plan_transition_guards() {
    let h = harness();
    let plan = h
        .engine
        .create_plan(direct_plan("A1", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();

    assert!(h
        .engine
        .complete_plan(&plan.id, 1.0, "P1")
        .unwrap_err()
        .is_invalid_transition());

    h.engine.start_plan(&plan.id, "P1").unwrap();
    assert!(h.engine.start_plan(&plan.id, "P1").unwrap_err().is_invalid_transition());
    assert!(h.engine.complete_plan(&plan.id, 0.0, "P1").unwrap_err().is_validation());
    assert!(h
        .engine
        .complete_plan(&plan.id, f64::INFINITY, "P1")
        .unwrap_err()
        .is_validation());

    h.engine.complete_plan(&plan.id, 1.5, "P1").unwrap();
    assert!(h
        .engine
        .cancel_plan(&plan.id, "coord", None)
        .unwrap_err()
        .is_invalid_transition());
    assert!(h.engine.start_plan("nope", "P1").unwrap_err().is_not_found());
}

#[test]
fn test_cancel_plan_notifies_linked_requester() {
    let h = harness();
    let plan = flying_plan(&h);
    let before = h.engine.unread_count(REQUESTER).unwrap();

    let cancelled = h
        .engine
        .cancel_plan(&plan.id, "coord", Some("weather"))
        .unwrap();
    assert_eq!(cancelled.status, PlanStatus::Cancelled);
    assert_eq!(cancelled.status_reason.as_deref(), Some("weather"));
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), before + 1);

    let direct = h
        .engine
        .create_plan(direct_plan("A3", flight_day(), time(9, 0), time(11, 0)), "coord")
        .unwrap();
    h.engine.cancel_plan(&direct.id, "coord", None).unwrap();
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), before + 1);
}

// === Completion saga ===

#[test]
fn test_failed_increment_keeps_plan_in_progress() {
    let h = harness();
    let plan = flying_plan(&h);
    h.registry.fail_increment.store(true, Ordering::SeqCst);

    let err = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap_err();
    assert!(err.is_dependency_failure());
    assert_eq!(h.engine.get_plan(&plan.id).unwrap().status, PlanStatus::InProgress);
    assert!((h.registry.hours("A1") - 100.0).abs() < 1e-9);
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 0);
    assert!(h.logbook.inner.entries_for_aircraft("A1").unwrap().is_empty());

    h.registry.fail_increment.store(false, Ordering::SeqCst);
    let done = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);
}

#[test]
fn test_lost_increment_ack_rolls_forward() {
    let h = harness();
    let plan = flying_plan(&h);
    h.registry.lose_ack.store(true, Ordering::SeqCst);

    let done = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);
    assert_eq!(h.logbook.inner.entries_for_aircraft("A1").unwrap().len(), 1);
}

#[test]
fn test_logbook_failure_does_not_undo_completion() {
    let h = harness();
    let plan = flying_plan(&h);
    h.logbook.fail.store(true, Ordering::SeqCst);

    let done = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    assert!(done.logbook_entry_id.is_none());
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);

    let tasks = h.engine.open_reconciliation_tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::LogbookWrite);
    assert_eq!(tasks[0].entity_id, plan.id);
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 1);
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 2);

    // A sweep inside the grace period leaves the intent alone
    h.logbook.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.recover_completions().unwrap().examined, 0);

    past_grace(&h);
    let report = h.engine.recover_completions().unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.logbook_written, 1);

    let recovered = h.engine.get_plan(&plan.id).unwrap();
    assert!(recovered.logbook_entry_id.is_some());
    assert!(h.engine.open_reconciliation_tasks().unwrap().is_empty());
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 0);
    assert_eq!(h.logbook.inner.entries_for_aircraft("A1").unwrap().len(), 1);
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);

    assert_eq!(h.engine.recover_completions().unwrap(), SweepReport::default());
}

#[test]
fn test_sweep_rolls_forward_applied_increment() {
    let h = harness();
    let plan = flying_plan(&h);
    h.registry.lose_ack.store(true, Ordering::SeqCst);
    h.registry.fail_check.store(true, Ordering::SeqCst);

    let err = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap_err();
    assert!(err.is_dependency_failure());
    assert_eq!(h.engine.get_plan(&plan.id).unwrap().status, PlanStatus::InProgress);
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);

    // The half-finished completion blocks competing moves
    assert!(h
        .engine
        .complete_plan(&plan.id, 2.1, "P1")
        .unwrap_err()
        .is_invalid_transition());
    assert!(h
        .engine
        .cancel_plan(&plan.id, "coord", None)
        .unwrap_err()
        .is_invalid_transition());

    h.registry.lose_ack.store(false, Ordering::SeqCst);
    h.registry.fail_check.store(false, Ordering::SeqCst);
    past_grace(&h);
    let report = h.engine.recover_completions().unwrap();
    assert_eq!(report.rolled_forward, 1);

    let plan = h.engine.get_plan(&plan.id).unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.actual_hours, Some(2.1));
    assert!(plan.logbook_entry_id.is_some());
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 0);
}

#[test]
fn test_sweep_rolls_back_unapplied_increment() {
    let h = harness();
    let plan = flying_plan(&h);
    h.registry.fail_increment.store(true, Ordering::SeqCst);
    h.registry.fail_check.store(true, Ordering::SeqCst);

    assert!(h
        .engine
        .complete_plan(&plan.id, 2.1, "P1")
        .unwrap_err()
        .is_dependency_failure());
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 1);

    // Registry still unreachable: nothing can be decided yet
    past_grace(&h);
    let report = h.engine.recover_completions().unwrap();
    assert_eq!(report.deferred, 1);

    h.registry.fail_increment.store(false, Ordering::SeqCst);
    h.registry.fail_check.store(false, Ordering::SeqCst);
    let report = h.engine.recover_completions().unwrap();
    assert_eq!(report.rolled_back, 1);
    assert_eq!(h.engine.get_plan(&plan.id).unwrap().status, PlanStatus::InProgress);
    assert!((h.registry.hours("A1") - 100.0).abs() < 1e-9);

    let done = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap();
    assert_eq!(done.status, PlanStatus::Completed);
    assert!((h.registry.hours("A1") - 102.1).abs() < 1e-9);
}

#[test]
fn test_failed_increment_reported_even_if_intent_cleanup_fails() {
    let h = harness();
    let plan = flying_plan(&h);
    h.registry.fail_increment.store(true, Ordering::SeqCst);
    h.engine
        .store()
        .connection()
        .execute_batch(
            "CREATE TRIGGER keep_intents BEFORE DELETE ON completion_intents
             BEGIN SELECT RAISE(ABORT, 'intents are read-only'); END;",
        )
        .unwrap();

    let err = h.engine.complete_plan(&plan.id, 2.1, "P1").unwrap_err();
    assert!(err.is_dependency_failure(), "unexpected error: {err}");
    assert_eq!(h.engine.get_plan(&plan.id).unwrap().status, PlanStatus::InProgress);
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 1);

    // The leftover intent is rolled back by the sweep
    h.engine
        .store()
        .connection()
        .execute_batch("DROP TRIGGER keep_intents;")
        .unwrap();
    h.registry.fail_increment.store(false, Ordering::SeqCst);
    past_grace(&h);
    let report = h.engine.recover_completions().unwrap();
    assert_eq!(report.rolled_back, 1);
    assert_eq!(h.engine.storage_stats().unwrap().open_completion_intents, 0);
    assert!((h.registry.hours("A1") - 100.0).abs() < 1e-9);
}

// === Notifications ===

#[test]
fn test_notification_failure_does_not_block_transition() {
    let h = harness();
    let request = h.engine.submit_request(request_input()).unwrap();
    h.inbox.fail.store(true, Ordering::SeqCst);

    let approved = h.engine.approve_request(&request.id, "coord").unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);

    let tasks = h.engine.open_reconciliation_tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::Notification);
    assert_eq!(tasks[0].entity_id, request.id);
}

#[test]
fn test_notifications_can_be_disabled() {
    let mut config = Config::default();
    config.notifications.enabled = false;
    let h = harness_with(config);

    let request = h.engine.submit_request(request_input()).unwrap();
    h.engine.approve_request(&request.id, "coord").unwrap();

    assert_eq!(h.engine.unread_count(COORDINATORS).unwrap(), 0);
    assert_eq!(h.engine.unread_count(REQUESTER).unwrap(), 0);
}

// === Dashboard ===

#[test]
fn test_dashboard_counts_follow_store() {
    let h = harness();
    assert_eq!(h.engine.dashboard_counts().unwrap(), DashboardCounts::default());

    let first = h.engine.submit_request(request_input()).unwrap();
    h.engine.submit_request(request_input()).unwrap();
    h.engine.approve_request(&first.id, "coord").unwrap();

    let today_plan = h
        .engine
        .create_plan(direct_plan("A1", today(), time(15, 0), time(16, 0)), "coord")
        .unwrap();
    h.engine
        .create_plan(direct_plan("A1", flight_day(), time(15, 0), time(16, 0)), "coord")
        .unwrap();

    let counts = h.engine.dashboard_counts().unwrap();
    assert_eq!(counts.pending_requests, 1);
    assert_eq!(counts.scheduled_plans, 2);
    assert_eq!(counts.flights_today, 1);

    h.engine.start_plan(&today_plan.id, "P1").unwrap();
    let counts = h.engine.dashboard_counts().unwrap();
    assert_eq!(counts.scheduled_plans, 1);
    assert_eq!(counts.flights_today, 1);

    h.engine.cancel_plan(&today_plan.id, "coord", None).unwrap();
    assert_eq!(h.engine.dashboard_counts().unwrap().flights_today, 0);

    h.clock.advance(Duration::days(9));
    assert_eq!(h.engine.dashboard_counts().unwrap().flights_today, 1);
}

// === Concurrency ===

#[test]
fn test_concurrent_approve_and_reject_only_one_wins() {
    crate::logging::init_test_logging();

    let dir = std::env::temp_dir().join(format!("charterops-race-{}", uuid::Uuid::new_v4()));
    let path = dir.join("charterops.db");
    let timeout = std::time::Duration::from_secs(5);

    SqliteAircraftRegistry::open(&path, timeout)
        .unwrap()
        .register(&aircraft("A1", "PT-ABC", AircraftStatus::Active))
        .unwrap();
    let collaborators = Collaborators::open_sqlite(&path, timeout).unwrap();
    let clock = Arc::new(FixedClock::new(start_of_test()));

    let engine = || {
        Coordinator::new(
            Storage::open(&path, timeout).unwrap(),
            collaborators.clone(),
            clock.clone(),
            Config::default(),
        )
    };
    let approver = engine();
    let rejecter = engine();

    const ROUNDS: u64 = 10;
    for round in 1..=ROUNDS {
        let request = approver.submit_request(request_input()).unwrap();
        let barrier = Barrier::new(2);

        let (approved, rejected) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                approver.approve_request(&request.id, "coord-a")
            });
            let b = s.spawn(|| {
                barrier.wait();
                rejecter.reject_request(&request.id, RequestStatus::Requested, "coord-b", None)
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        let (winner, loser) = match (approved, rejected) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            (Ok(_), Ok(_)) => panic!("approve and reject both succeeded"),
            (Err(a), Err(b)) => panic!("approve and reject both failed: {a}; {b}"),
        };
        assert!(loser.is_invalid_transition(), "unexpected error: {loser}");

        let stored = rejecter.get_request(&request.id).unwrap();
        assert_eq!(stored.status, winner.status);
        assert_eq!(rejecter.request_history(&request.id).unwrap().len(), 2);
        assert_eq!(rejecter.unread_count(REQUESTER).unwrap(), round);
    }

    drop((approver, rejecter, collaborators));
    let _ = std::fs::remove_dir_all(dir);
}
