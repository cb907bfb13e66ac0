//! `charterops` - CLI for the charter flight coordination engine
//!
//! This binary submits and moves flight requests, schedules and flies plans,
//! and administers the aircraft registry and notification inbox.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;

use charterops::cli::{
    AircraftCommand, Cli, Command, ConfigCommand, InboxCommand, PlanCommand, RequestCommand,
};
use charterops::clock::{Clock, SystemClock};
use charterops::model::{FlightPlan, FlightRequest, HistoryEntry, Notification, RequestStatus};
use charterops::notify::SqliteInbox;
use charterops::registry::{Aircraft, AircraftRegistry, AircraftStatus, SqliteAircraftRegistry};
use charterops::{init_logging, Collaborators, Config, Coordinator, Storage};

/// How results are printed.
#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(self, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;
    let out = Output { json: cli.json };
    let actor = cli.actor.as_str();

    match cli.command {
        Command::Request(cmd) => handle_request(&open_engine(&config)?, cmd, actor, out),
        Command::Plan(cmd) => handle_plan(&open_engine(&config)?, cmd, actor, out),
        Command::Dashboard => {
            let counts = open_engine(&config)?.dashboard_counts()?;
            out.emit(&counts, || {
                println!("Pending requests:  {}", counts.pending_requests);
                println!("Scheduled plans:   {}", counts.scheduled_plans);
                println!("Flights today:     {}", counts.flights_today);
            })
        }
        Command::Recover => {
            let report = open_engine(&config)?.recover_completions()?;
            out.emit(&report, || {
                println!("Examined:        {}", report.examined);
                println!("Rolled forward:  {}", report.rolled_forward);
                println!("Rolled back:     {}", report.rolled_back);
                println!("Logbook written: {}", report.logbook_written);
                println!("Deferred:        {}", report.deferred);
            })
        }
        Command::Aircraft(cmd) => handle_aircraft(&config, cmd, out),
        Command::Inbox(cmd) => handle_inbox(&config, cmd, out),
        Command::Config(cmd) => handle_config(&config, cmd, out),
    }
}

fn open_engine(config: &Config) -> anyhow::Result<Coordinator> {
    let path = config.database_path();
    let storage = Storage::open(&path, config.busy_timeout())
        .with_context(|| format!("opening database {}", path.display()))?;
    let collaborators = Collaborators::open_sqlite(&path, config.busy_timeout())?;
    Ok(Coordinator::new(
        storage,
        collaborators,
        Arc::new(SystemClock),
        config.clone(),
    ))
}

fn handle_request(
    engine: &Coordinator,
    cmd: RequestCommand,
    actor: &str,
    out: Output,
) -> anyhow::Result<()> {
    match cmd {
        RequestCommand::Submit(args) => {
            let request = engine.submit_request(args.into_input())?;
            out.emit(&request, || print_request(&request))
        }
        RequestCommand::Approve { id } => {
            let request = engine.approve_request(&id, actor)?;
            out.emit(&request, || print_request(&request))
        }
        RequestCommand::Reject { id, reason, expect } => {
            let expected = expected_status(engine, &id, expect)?;
            let request = engine.reject_request(&id, expected, actor, reason.as_deref())?;
            out.emit(&request, || print_request(&request))
        }
        RequestCommand::Cancel { id, reason, expect } => {
            let expected = expected_status(engine, &id, expect)?;
            let request = engine.cancel_request(&id, expected, actor, reason.as_deref())?;
            out.emit(&request, || print_request(&request))
        }
        RequestCommand::Schedule { id, expect, plan } => {
            let expected = expected_status(engine, &id, expect)?;
            let (request, plan) =
                engine.schedule_from_request(&id, expected, plan.into_draft(), actor)?;
            let value = serde_json::json!({ "request": request, "plan": plan });
            out.emit(&value, || {
                print_request(&request);
                println!();
                print_plan(&plan);
            })
        }
        RequestCommand::Show { id } => {
            let request = engine.get_request(&id)?;
            out.emit(&request, || print_request(&request))
        }
        RequestCommand::History { id } => {
            let history = engine.request_history(&id)?;
            out.emit(&history, || history.iter().for_each(print_history))
        }
        RequestCommand::List(args) => {
            let requests = engine.list_requests(&args.into_filter())?;
            out.emit(&requests, || {
                if requests.is_empty() {
                    println!("No requests.");
                }
                for r in &requests {
                    println!(
                        "{}  {:<9}  {:<6}  {} {} -> {}  {}",
                        r.id,
                        r.status.as_str(),
                        r.priority.as_str(),
                        r.requested_date,
                        r.origin,
                        r.destination,
                        r.requester_id
                    );
                }
            })
        }
    }
}

/// The status the command acts on: `--expect` if given, else the one stored now.
fn expected_status(
    engine: &Coordinator,
    id: &str,
    expect: Option<RequestStatus>,
) -> anyhow::Result<RequestStatus> {
    match expect {
        Some(status) => Ok(status),
        None => Ok(engine.get_request(id)?.status),
    }
}

fn handle_plan(engine: &Coordinator, cmd: PlanCommand, actor: &str, out: Output) -> anyhow::Result<()> {
    let plan = match cmd {
        PlanCommand::Create(args) => engine.create_plan(args.into_draft(), actor)?,
        PlanCommand::Start { id } => engine.start_plan(&id, actor)?,
        PlanCommand::Complete { id, hours } => engine.complete_plan(&id, hours, actor)?,
        PlanCommand::Cancel { id, reason } => engine.cancel_plan(&id, actor, reason.as_deref())?,
        PlanCommand::Show { id } => engine.get_plan(&id)?,
        PlanCommand::List(args) => {
            let plans = engine.list_plans(&args.into_filter())?;
            return out.emit(&plans, || {
                if plans.is_empty() {
                    println!("No plans.");
                }
                for p in &plans {
                    println!(
                        "{}  {:<11}  {}  {} -> {}  {}  {}",
                        p.id,
                        p.status.as_str(),
                        p.aircraft_id,
                        p.departure_at,
                        p.arrival_at,
                        p.origin,
                        p.destination
                    );
                }
            });
        }
    };
    out.emit(&plan, || print_plan(&plan))
}

fn handle_aircraft(config: &Config, cmd: AircraftCommand, out: Output) -> anyhow::Result<()> {
    let registry = SqliteAircraftRegistry::open(&config.database_path(), config.busy_timeout())?;
    let id = match cmd {
        AircraftCommand::Add {
            id,
            registration,
            seats,
            hours,
        } => {
            registry.register(&Aircraft {
                id: id.clone(),
                registration,
                status: AircraftStatus::Active,
                seat_capacity: seats,
                cumulative_hours: hours,
            })?;
            id
        }
        AircraftCommand::Status { id, status } => {
            registry.set_status(&id, status)?;
            id
        }
        AircraftCommand::Show { id } => id,
        AircraftCommand::List => {
            let fleet = registry.list()?;
            return out.emit(&fleet, || {
                if fleet.is_empty() {
                    println!("No aircraft.");
                }
                for a in &fleet {
                    println!(
                        "{}  {:<8}  {:<11}  {:>8.1} h",
                        a.id,
                        a.registration,
                        a.status.as_str(),
                        a.cumulative_hours
                    );
                }
            });
        }
    };

    let Some(aircraft) = registry.get_aircraft(&id)? else {
        bail!("aircraft not found: {id}");
    };
    out.emit(&aircraft, || {
        println!("Aircraft:      {}", aircraft.id);
        println!("Registration:  {}", aircraft.registration);
        println!("Status:        {}", aircraft.status);
        match aircraft.seat_capacity {
            Some(seats) => println!("Seats:         {seats}"),
            None => println!("Seats:         unknown"),
        }
        println!("Hours:         {:.1}", aircraft.cumulative_hours);
    })
}

fn handle_inbox(config: &Config, cmd: InboxCommand, out: Output) -> anyhow::Result<()> {
    let inbox = SqliteInbox::open(&config.database_path(), config.busy_timeout())?;
    match cmd {
        InboxCommand::List { recipient, unread } => {
            let recipient =
                recipient.unwrap_or_else(|| config.notifications.coordinator_recipient.clone());
            let notices = inbox.list_for(&recipient, unread)?;
            out.emit(&notices, || {
                if notices.is_empty() {
                    println!("No notices for {recipient}.");
                }
                notices.iter().for_each(print_notice);
            })
        }
        InboxCommand::Read { id } => {
            if !inbox.mark_read(&id, SystemClock.now())? {
                bail!("notice not found or already read: {id}");
            }
            out.emit(&serde_json::json!({ "id": id, "read": true }), || {
                println!("Marked {id} as read.");
            })
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand, out: Output) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => out.emit(config, || {
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:        {}", config.database_path().display());
            println!("  Busy timeout (ms):    {}", config.storage.busy_timeout_ms);
            println!();
            println!("[Workflow]");
            println!(
                "  Direct scheduling:    {}",
                config.workflow.allow_direct_scheduling
            );
            println!(
                "  Recovery grace (s):   {}",
                config.workflow.recovery_grace_seconds
            );
            println!();
            println!("[Notifications]");
            println!("  Enabled:              {}", config.notifications.enabled);
            println!(
                "  Coordinator inbox:    {}",
                config.notifications.coordinator_recipient
            );
        }),
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path)).context("configuration is invalid")?;
            println!("Configuration is valid.");
            Ok(())
        }
    }
}

fn print_request(r: &FlightRequest) {
    println!("Request:       {}", r.id);
    println!("Status:        {}", r.status);
    if let Some(reason) = &r.status_reason {
        println!("Reason:        {reason}");
    }
    println!("Requester:     {} ({})", r.requester_name, r.requester_id);
    println!(
        "Aircraft:      {} {}",
        r.aircraft_id,
        r.aircraft_registration.as_deref().unwrap_or_default()
    );
    println!(
        "Flight:        {} -> {} on {} {}",
        r.origin,
        r.destination,
        r.requested_date,
        r.requested_departure_time.format("%H:%M")
    );
    println!("Passengers:    {}", r.passenger_count);
    println!("Priority:      {}", r.priority);
    if let Some(plan_id) = &r.plan_id {
        println!("Plan:          {plan_id}");
    }
}

fn print_plan(p: &FlightPlan) {
    println!("Plan:          {}", p.id);
    println!("Status:        {}", p.status);
    if let Some(reason) = &p.status_reason {
        println!("Reason:        {reason}");
    }
    println!("Aircraft:      {}", p.aircraft_id);
    println!("Route:         {} -> {}", p.origin, p.destination);
    println!("Window:        {} - {}", p.departure_at, p.arrival_at);
    println!("Pilot:         {}", p.pilot_id);
    if let Some(copilot) = p.copilot.id() {
        println!("Copilot:       {copilot}");
    }
    if let Some(request_id) = &p.source_request_id {
        println!("Request:       {request_id}");
    }
    if let Some(hours) = p.actual_hours {
        println!("Hours flown:   {hours:.1}");
    }
    if let Some(entry) = &p.logbook_entry_id {
        println!("Logbook entry: {entry}");
    }
}

fn print_history(e: &HistoryEntry) {
    let from = e.from_status.map_or_else(|| "-".to_string(), |s| s.to_string());
    print!("{}  {from} -> {}  by {}", e.at, e.to_status, e.actor);
    match &e.reason {
        Some(reason) => println!("  ({reason})"),
        None => println!(),
    }
}

fn print_notice(n: &Notification) {
    let marker = if n.read_at.is_some() { " " } else { "*" };
    println!("{marker} {}  {}  {}", n.id, n.created_at, n.subject);
    println!("    {}", n.body);
}
