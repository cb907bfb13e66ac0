//! Plan lifecycle: create, start, complete and cancel.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::{describe_plan, Coordinator};
use crate::error::{Error, Result};
use crate::logbook::FlightRecord;
use crate::model::{non_blank, FlightPlan, PlanDraft, PlanStatus, TransitionEvent};
use crate::storage::completions::{self, CompletionIntent, IntentStage};
use crate::storage::plans::{self, PlanMove};
use crate::storage::reconciliation::{self, TaskKind};
use crate::storage::requests;

/// Status reported for a plan whose completion is under way.
const COMPLETING: &str = "in_progress (completing)";

/// Idempotency key for the hour increment of a plan's completion.
pub(super) fn completion_key(plan_id: &str) -> String {
    format!("complete:{plan_id}")
}

impl Coordinator {
    /// Create a plan that is not tied to a request.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `NotFound` for an unknown aircraft,
    /// `SchedulingConflict`, `DependencyFailure`, or a database error.
    pub fn create_plan(&self, draft: PlanDraft, actor: &str) -> Result<FlightPlan> {
        let validated = draft.validate().map_err(|fields| Error::Validation { fields })?;
        self.bookable_aircraft(&validated.aircraft_id, None)?;

        let plan = FlightPlan::new(uuid::Uuid::new_v4().to_string(), None, validated, self.now());
        {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            self.book(&tx, &plan)?;
            tx.commit()?;
        }

        info!(
            plan_id = %plan.id,
            aircraft = %plan.aircraft_id,
            departure = %plan.departure_at,
            arrival = %plan.arrival_at,
            %actor,
            "plan created"
        );
        Ok(plan)
    }

    /// Insert `plan` unless an active plan already holds its aircraft.
    pub(super) fn book(&self, conn: &Connection, plan: &FlightPlan) -> Result<()> {
        if let Some(conflicting) =
            plans::find_conflict(conn, &plan.aircraft_id, plan.departure_at, plan.arrival_at)?
        {
            debug!(
                aircraft = %plan.aircraft_id,
                conflicting_plan = %conflicting,
                "aircraft already booked"
            );
            return Err(Error::SchedulingConflict {
                aircraft_id: plan.aircraft_id.clone(),
                conflicting_plan_id: conflicting,
            });
        }
        plans::insert(conn, plan)
    }

    /// Mark a scheduled plan as under way.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition`, or a database error.
    pub fn start_plan(&self, id: &str, actor: &str) -> Result<FlightPlan> {
        let change = PlanMove {
            reason: None,
            actual_hours: None,
            at: self.now(),
        };
        let plan = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            plans::transition(&tx, id, PlanStatus::InProgress, &change)
                .map_err(|e| refused(id, PlanStatus::InProgress, actor, e))?;
            let plan = plans::require(&tx, id)?;
            tx.commit()?;
            plan
        };

        info!(plan_id = %id, from = %PlanStatus::Scheduled, to = %PlanStatus::InProgress, %actor, "plan transitioned");
        Ok(plan)
    }

    /// Cancel a plan that has not been completed.
    ///
    /// A plan whose completion is under way cannot be cancelled.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition`, or a database error.
    pub fn cancel_plan(&self, id: &str, actor: &str, reason: Option<&str>) -> Result<FlightPlan> {
        let reason = non_blank(reason);
        let change = PlanMove {
            reason: reason.as_deref(),
            actual_hours: None,
            at: self.now(),
        };

        let (from, plan, requester) = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            if completions::get(&tx, id)?.is_some() {
                debug!(plan_id = %id, %actor, "cancel refused, completion under way");
                return Err(Error::invalid_transition("plan", id, COMPLETING, PlanStatus::Cancelled));
            }
            let from = plans::transition(&tx, id, PlanStatus::Cancelled, &change)
                .map_err(|e| refused(id, PlanStatus::Cancelled, actor, e))?;
            let plan = plans::require(&tx, id)?;
            let requester = requester_of(&tx, &plan)?;
            tx.commit()?;
            (from, plan, requester)
        };

        info!(plan_id = %id, %from, to = %PlanStatus::Cancelled, %actor, "plan transitioned");
        self.emit(
            &TransitionEvent::plan(id, Some(from), PlanStatus::Cancelled, actor),
            requester.as_deref(),
            &describe_plan(&plan),
            reason.as_deref(),
        );
        Ok(plan)
    }

    /// Complete a plan that is under way.
    ///
    /// Adds `actual_hours` to the aircraft's total and writes the logbook
    /// entry. If the hour increment fails the plan stays `in_progress`. A
    /// failed logbook write does not undo the completion; it is queued for
    /// the recovery sweep.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for non-positive hours, `NotFound`,
    /// `InvalidStateTransition`, `DependencyFailure` if the aircraft
    /// registry fails, or a database error.
    pub fn complete_plan(&self, id: &str, actual_hours: f64, actor: &str) -> Result<FlightPlan> {
        if !actual_hours.is_finite() || actual_hours <= 0.0 {
            return Err(Error::invalid_field(
                "actual_flight_hours",
                "must be a positive number of hours",
            ));
        }

        let now = self.now();
        let intent = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            let plan = plans::require(&tx, id)?;
            if plan.status != PlanStatus::InProgress {
                debug!(plan_id = %id, status = %plan.status, %actor, "completion refused");
                return Err(Error::invalid_transition("plan", id, plan.status, PlanStatus::Completed));
            }
            if completions::get(&tx, id)?.is_some() {
                debug!(plan_id = %id, %actor, "completion already under way");
                return Err(Error::invalid_transition("plan", id, COMPLETING, PlanStatus::Completed));
            }
            let intent = CompletionIntent {
                plan_id: plan.id.clone(),
                op_key: completion_key(&plan.id),
                aircraft_id: plan.aircraft_id.clone(),
                hours: actual_hours,
                stage: IntentStage::Pending,
                created_at: now,
                updated_at: now,
            };
            completions::insert(&tx, &intent)?;
            tx.commit()?;
            intent
        };

        if let Err(e) = self
            .registry
            .increment_hours(&intent.aircraft_id, intent.hours, &intent.op_key)
        {
            self.settle_failed_increment(&intent, &e)?;
        }

        self.finish_completion(&intent, actor)
    }

    /// Decide what a failed increment means.
    ///
    /// Returns `Ok` only when the registry confirms the increment landed
    /// despite the error, in which case the completion goes ahead.
    fn settle_failed_increment(&self, intent: &CompletionIntent, error: &Error) -> Result<()> {
        let failure = Error::dependency("aircraft registry", error.to_string());
        match self.registry.hours_applied(&intent.op_key) {
            Ok(true) => {
                info!(plan_id = %intent.plan_id, "hour increment landed despite error");
                Ok(())
            }
            Ok(false) => {
                if let Err(cleanup) = completions::delete(self.store().connection(), &intent.plan_id) {
                    warn!(
                        plan_id = %intent.plan_id,
                        error = %cleanup,
                        "could not drop completion intent, left for recovery"
                    );
                }
                warn!(
                    plan_id = %intent.plan_id,
                    aircraft = %intent.aircraft_id,
                    error = %error,
                    "hour increment failed, completion rolled back"
                );
                Err(failure)
            }
            Err(check) => {
                warn!(
                    plan_id = %intent.plan_id,
                    aircraft = %intent.aircraft_id,
                    error = %error,
                    check_error = %check,
                    "hour increment outcome unknown, left for recovery"
                );
                Err(failure)
            }
        }
    }

    /// Commit a completion whose hours are applied, then write the logbook
    /// and notify.
    pub(super) fn finish_completion(&self, intent: &CompletionIntent, actor: &str) -> Result<FlightPlan> {
        let change = PlanMove {
            reason: None,
            actual_hours: Some(intent.hours),
            at: self.now(),
        };

        let plan = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            plans::transition(&tx, &intent.plan_id, PlanStatus::Completed, &change)?;
            completions::set_stage(&tx, &intent.plan_id, IntentStage::HoursApplied, change.at)?;
            let plan = plans::require(&tx, &intent.plan_id)?;
            tx.commit()?;
            plan
        };

        info!(
            plan_id = %plan.id,
            from = %PlanStatus::InProgress,
            to = %PlanStatus::Completed,
            hours = intent.hours,
            %actor,
            "plan transitioned"
        );

        self.write_logbook(&plan, intent.hours)?;

        let (plan, requester) = {
            let storage = self.store();
            let plan = plans::require(storage.connection(), &intent.plan_id)?;
            let requester = requester_of(storage.connection(), &plan)?;
            (plan, requester)
        };
        self.emit(
            &TransitionEvent::plan(&plan.id, Some(PlanStatus::InProgress), PlanStatus::Completed, actor),
            requester.as_deref(),
            &describe_plan(&plan),
            None,
        );
        Ok(plan)
    }

    /// Write the logbook entry of a completed plan and close its intent.
    ///
    /// Returns whether the entry was written. A failure parks the intent as
    /// `logbook_pending` and queues a reconciliation task.
    pub(super) fn write_logbook(&self, plan: &FlightPlan, hours: f64) -> Result<bool> {
        let record = FlightRecord::from_plan(plan, hours);
        let at = self.now();

        match self.logbook.record_flight(&record) {
            Ok(entry_id) => {
                let mut storage = self.store();
                let tx = storage.transaction()?;
                plans::set_logbook_entry(&tx, &plan.id, &entry_id, at)?;
                completions::delete(&tx, &plan.id)?;
                reconciliation::resolve(&tx, TaskKind::LogbookWrite, &plan.id, at)?;
                tx.commit()?;
                debug!(plan_id = %plan.id, entry = %entry_id, "logbook entry recorded");
                Ok(true)
            }
            Err(e) => {
                warn!(plan_id = %plan.id, error = %e, "logbook write failed, queued for recovery");
                let mut storage = self.store();
                let tx = storage.transaction()?;
                completions::set_stage(&tx, &plan.id, IntentStage::LogbookPending, at)?;
                reconciliation::resolve(&tx, TaskKind::LogbookWrite, &plan.id, at)?;
                reconciliation::record(&tx, TaskKind::LogbookWrite, &plan.id, &e.to_string(), at)?;
                tx.commit()?;
                Ok(false)
            }
        }
    }
}

/// Requester behind a plan's source request, if any.
fn requester_of(conn: &Connection, plan: &FlightPlan) -> Result<Option<String>> {
    match &plan.source_request_id {
        Some(request_id) => Ok(requests::get(conn, request_id)?.map(|r| r.requester_id)),
        None => Ok(None),
    }
}

fn refused(id: &str, to: PlanStatus, actor: &str, error: Error) -> Error {
    debug!(plan_id = %id, %to, %actor, error = %error, "plan transition refused");
    error
}
