//! Request workflow: submit, approve, reject, cancel and schedule.

use tracing::{debug, info};

use super::{describe_plan, describe_request, Coordinator};
use crate::error::{Error, Result};
use crate::model::{
    non_blank, FlightPlan, FlightRequest, PlanDraft, RequestInput, RequestStatus, TransitionEvent,
};
use crate::storage::requests::{self, Move};

impl Coordinator {
    /// Submit a new flight request.
    ///
    /// Every field is checked before anything is written and all problems
    /// are reported together. A request for an unknown aircraft is
    /// `NotFound`; availability is not checked here, only when a plan is
    /// created.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `NotFound`, `DependencyFailure` if the aircraft
    /// registry cannot be reached, or a database error.
    pub fn submit_request(&self, input: RequestInput) -> Result<FlightRequest> {
        let today = self.clock.today();
        let aircraft_id = input.aircraft_id.trim().to_string();
        let aircraft = if aircraft_id.is_empty() {
            None
        } else {
            self.lookup_aircraft(&aircraft_id)?
        };

        let errors = input.validate(today, aircraft.as_ref().and_then(|a| a.seat_capacity));
        if !errors.is_empty() {
            debug!(requester = %input.requester_id, %errors, "request rejected by validation");
        }
        errors.into_result()?;

        let Some(aircraft) = aircraft else {
            return Err(Error::not_found("aircraft", aircraft_id));
        };

        let mut request =
            FlightRequest::from_input(uuid::Uuid::new_v4().to_string(), input, self.now())?;
        if request.aircraft_registration.is_none() {
            request.aircraft_registration = Some(aircraft.registration);
        }

        {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            requests::insert(&tx, &request)?;
            tx.commit()?;
        }

        info!(
            request_id = %request.id,
            requester = %request.requester_id,
            aircraft = %request.aircraft_id,
            priority = %request.priority,
            "request submitted"
        );
        self.emit(
            &TransitionEvent::request(&request.id, None, RequestStatus::Requested, &request.requester_id),
            Some(&request.requester_id),
            &describe_request(&request),
            None,
        );
        Ok(request)
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition` unless the request is
    /// `requested`, or a database error.
    pub fn approve_request(&self, id: &str, actor: &str) -> Result<FlightRequest> {
        self.move_request(id, RequestStatus::Requested, RequestStatus::Approved, actor, None)
    }

    /// Reject a request the caller saw in `expected` status.
    ///
    /// Pending and approved requests can be rejected, but only while the
    /// request is still in `expected`: a request approved or withdrawn by
    /// someone else in the meantime is refused.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition`, or a database error.
    pub fn reject_request(
        &self,
        id: &str,
        expected: RequestStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<FlightRequest> {
        self.move_request(id, expected, RequestStatus::Rejected, actor, reason)
    }

    /// Withdraw a request the caller saw in `expected` status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition`, or a database error.
    pub fn cancel_request(
        &self,
        id: &str,
        expected: RequestStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<FlightRequest> {
        self.move_request(id, expected, RequestStatus::Cancelled, actor, reason)
    }

    fn move_request(
        &self,
        id: &str,
        from: RequestStatus,
        to: RequestStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<FlightRequest> {
        let reason = non_blank(reason);
        let change = Move {
            actor,
            reason: reason.as_deref(),
            plan_id: None,
            at: self.now(),
        };

        let request = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            requests::transition(&tx, id, from, to, &change).map_err(|e| {
                debug!(request_id = %id, %from, %to, %actor, error = %e, "request transition refused");
                e
            })?;
            let request = requests::require(&tx, id)?;
            tx.commit()?;
            request
        };

        info!(request_id = %id, %from, %to, %actor, "request transitioned");
        self.emit(
            &TransitionEvent::request(id, Some(from), to, actor),
            Some(&request.requester_id),
            &describe_request(&request),
            reason.as_deref(),
        );
        Ok(request)
    }

    /// Create a plan from a request the caller saw in `expected` status and
    /// mark the request scheduled.
    ///
    /// Blank draft fields are taken from the request. The plan insert and
    /// the request move commit together: on any failure, including a
    /// scheduling conflict, the request is left as it was.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidStateTransition`, `Validation`,
    /// `SchedulingConflict`, `DependencyFailure`, or a database error.
    pub fn schedule_from_request(
        &self,
        id: &str,
        expected: RequestStatus,
        draft: PlanDraft,
        actor: &str,
    ) -> Result<(FlightRequest, FlightPlan)> {
        let request = self.get_request(id)?;
        let allowed = request.status == expected
            && expected.can_transition_to(RequestStatus::Scheduled)
            && (expected == RequestStatus::Approved
                || self.config.workflow.allow_direct_scheduling);
        if !allowed {
            debug!(request_id = %id, status = %request.status, "request not schedulable");
            return Err(Error::invalid_transition(
                "request",
                id,
                request.status,
                RequestStatus::Scheduled,
            ));
        }

        let validated = draft
            .inherit_from(&request)
            .validate()
            .map_err(|fields| Error::Validation { fields })?;
        self.bookable_aircraft(&validated.aircraft_id, Some(request.passenger_count))?;

        let plan = FlightPlan::new(
            uuid::Uuid::new_v4().to_string(),
            Some(request.id.clone()),
            validated,
            self.now(),
        );
        let change = Move {
            actor,
            reason: None,
            plan_id: Some(&plan.id),
            at: plan.created_at,
        };

        let request = {
            let mut storage = self.store();
            let tx = storage.transaction()?;
            self.book(&tx, &plan)?;
            requests::transition(&tx, id, expected, RequestStatus::Scheduled, &change)?;
            let request = requests::require(&tx, id)?;
            tx.commit()?;
            request
        };

        info!(
            request_id = %id,
            plan_id = %plan.id,
            from = %expected,
            to = %RequestStatus::Scheduled,
            %actor,
            "request scheduled"
        );
        self.emit(
            &TransitionEvent::request(id, Some(expected), RequestStatus::Scheduled, actor),
            Some(&request.requester_id),
            &describe_plan(&plan),
            None,
        );
        Ok((request, plan))
    }
}
