//! `SQLite` schema definitions for charterops.
//!
//! Timestamps are RFC 3339 UTC text, dates `YYYY-MM-DD`, times `HH:MM:SS`
//! and plan windows `YYYY-MM-DDTHH:MM:SS`. All of them sort lexically.

/// Flight requests.
pub const CREATE_REQUESTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    requester_id TEXT NOT NULL,
    requester_name TEXT NOT NULL,
    aircraft_id TEXT NOT NULL,
    aircraft_registration TEXT,
    requested_date TEXT NOT NULL,
    requested_departure_time TEXT NOT NULL,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    passenger_count INTEGER NOT NULL CHECK (passenger_count >= 1),
    priority TEXT NOT NULL,
    priority_rank INTEGER NOT NULL,
    notes TEXT,
    status TEXT NOT NULL,
    status_reason TEXT,
    plan_id TEXT,
    submitted_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Index for the pending queue and status filters.
pub const CREATE_REQUESTS_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status, priority_rank DESC, submitted_at)
";

/// Index for per-requester listings.
pub const CREATE_REQUESTS_REQUESTER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_requests_requester ON requests(requester_id)
";

/// Append-only status history of requests.
pub const CREATE_REQUEST_HISTORY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS request_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL REFERENCES requests(id),
    from_status TEXT,
    to_status TEXT NOT NULL,
    actor TEXT NOT NULL,
    reason TEXT,
    at TEXT NOT NULL
)
";

/// Index for history lookups.
pub const CREATE_REQUEST_HISTORY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_request_history_request ON request_history(request_id, id)
";

/// Flight plans.
pub const CREATE_PLANS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    source_request_id TEXT REFERENCES requests(id),
    aircraft_id TEXT NOT NULL,
    scheduled_date TEXT NOT NULL,
    scheduled_departure TEXT NOT NULL,
    estimated_arrival TEXT NOT NULL,
    departure_at TEXT NOT NULL,
    arrival_at TEXT NOT NULL,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    pilot_id TEXT NOT NULL,
    copilot_id TEXT,
    copilot_vacant INTEGER NOT NULL DEFAULT 0,
    estimated_fuel REAL,
    coordinator_notes TEXT,
    status TEXT NOT NULL,
    status_reason TEXT,
    actual_hours REAL,
    logbook_entry_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Index for the aircraft overlap check.
pub const CREATE_PLANS_AIRCRAFT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_plans_aircraft_window ON plans(aircraft_id, status, departure_at)
";

/// Index for the dashboard's per-day count.
pub const CREATE_PLANS_DATE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_plans_date ON plans(scheduled_date, status)
";

/// Provisional completions awaiting their side effects.
pub const CREATE_COMPLETION_INTENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS completion_intents (
    plan_id TEXT PRIMARY KEY REFERENCES plans(id),
    op_key TEXT NOT NULL UNIQUE,
    aircraft_id TEXT NOT NULL,
    hours REAL NOT NULL,
    stage TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Side effects that failed without failing their operation.
pub const CREATE_RECONCILIATION_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS reconciliation_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT
)
";

/// Aircraft registry.
pub const CREATE_AIRCRAFT_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS aircraft (
    id TEXT PRIMARY KEY,
    registration TEXT NOT NULL,
    status TEXT NOT NULL,
    seat_capacity INTEGER,
    cumulative_hours REAL NOT NULL DEFAULT 0
)
";

/// Operation keys already applied to aircraft hour totals.
pub const CREATE_HOUR_LEDGER_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS aircraft_hour_ledger (
    op_key TEXT PRIMARY KEY,
    aircraft_id TEXT NOT NULL REFERENCES aircraft(id),
    delta REAL NOT NULL,
    applied_at TEXT NOT NULL
)
";

/// Logbook (flight diary) entries.
pub const CREATE_LOGBOOK_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS logbook_entries (
    id TEXT PRIMARY KEY,
    flight_key TEXT NOT NULL UNIQUE,
    plan_id TEXT NOT NULL,
    aircraft_id TEXT NOT NULL,
    flight_date TEXT NOT NULL,
    departure TEXT NOT NULL,
    arrival TEXT NOT NULL,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    pilot_id TEXT NOT NULL,
    copilot_id TEXT,
    hours REAL NOT NULL,
    recorded_at TEXT NOT NULL
)
";

/// Index for per-aircraft logbook listings.
pub const CREATE_LOGBOOK_AIRCRAFT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_logbook_aircraft ON logbook_entries(aircraft_id, flight_date)
";

/// Notification inbox.
pub const CREATE_NOTIFICATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    recipient_id TEXT NOT NULL,
    recipient_role TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    read_at TEXT
)
";

/// Index for unread counts.
pub const CREATE_NOTIFICATIONS_RECIPIENT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, read_at)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_REQUESTS_TABLE,
    CREATE_REQUESTS_STATUS_INDEX,
    CREATE_REQUESTS_REQUESTER_INDEX,
    CREATE_REQUEST_HISTORY_TABLE,
    CREATE_REQUEST_HISTORY_INDEX,
    CREATE_PLANS_TABLE,
    CREATE_PLANS_AIRCRAFT_INDEX,
    CREATE_PLANS_DATE_INDEX,
    CREATE_COMPLETION_INTENTS_TABLE,
    CREATE_RECONCILIATION_TABLE,
    CREATE_AIRCRAFT_TABLE,
    CREATE_HOUR_LEDGER_TABLE,
    CREATE_LOGBOOK_TABLE,
    CREATE_LOGBOOK_AIRCRAFT_INDEX,
    CREATE_NOTIFICATIONS_TABLE,
    CREATE_NOTIFICATIONS_RECIPIENT_INDEX,
    CREATE_METADATA_TABLE,
];
