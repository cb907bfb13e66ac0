//! Notices produced by workflow transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::PlanStatus;
use super::request::RequestStatus;
use crate::error::Error;

/// Who a notice is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    /// The quota-holder who submitted the request.
    Requester,
    /// The coordinator pool.
    Coordinator,
}

impl RecipientRole {
    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Self::Requester),
            "coordinator" => Ok(Self::Coordinator),
            other => Err(Error::internal(format!("unknown recipient role '{other}'"))),
        }
    }
}

/// A notice delivered to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// System-assigned id.
    pub id: String,
    /// Recipient id.
    pub recipient_id: String,
    /// Recipient role.
    pub recipient_role: RecipientRole,
    /// One-line subject.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// When the notice was produced.
    pub created_at: DateTime<Utc>,
    /// When the recipient read it.
    pub read_at: Option<DateTime<Utc>>,
}

/// Kind of entity a transition happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A flight request.
    Request,
    /// A flight plan.
    Plan,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Plan => "plan",
        })
    }
}

/// Before and after statuses of a committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// A request moved. `from` is `None` on submission.
    Request {
        /// Status before.
        from: Option<RequestStatus>,
        /// Status after.
        to: RequestStatus,
    },
    /// A plan moved. `from` is `None` on creation.
    Plan {
        /// Status before.
        from: Option<PlanStatus>,
        /// Status after.
        to: PlanStatus,
    },
}

/// A committed status change, as seen by the notification rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    /// Entity id.
    pub entity_id: String,
    /// What changed.
    pub change: StatusChange,
    /// Who made the change.
    pub actor: String,
}

impl TransitionEvent {
    /// Event for a request transition.
    #[must_use]
    pub fn request(
        id: &str,
        from: Option<RequestStatus>,
        to: RequestStatus,
        actor: &str,
    ) -> Self {
        Self {
            entity_id: id.to_string(),
            change: StatusChange::Request { from, to },
            actor: actor.to_string(),
        }
    }

    /// Event for a plan transition.
    #[must_use]
    pub fn plan(id: &str, from: Option<PlanStatus>, to: PlanStatus, actor: &str) -> Self {
        Self {
            entity_id: id.to_string(),
            change: StatusChange::Plan { from, to },
            actor: actor.to_string(),
        }
    }

    /// Kind of entity that moved.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self.change {
            StatusChange::Request { .. } => EntityType::Request,
            StatusChange::Plan { .. } => EntityType::Plan,
        }
    }
}
