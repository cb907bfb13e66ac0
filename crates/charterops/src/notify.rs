//! Notification emission.
//!
//! [`notices_for`] turns a committed transition into at most one notice per
//! interested party. Delivery goes through a [`NotificationSink`]; the
//! engine treats delivery as fire-and-forget.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::Result;
use crate::model::{
    Notification, PlanStatus, RecipientRole, RequestStatus, StatusChange, TransitionEvent,
};
use crate::storage::{
    connect, connect_in_memory, decode_parsed, encode_timestamp, get_timestamp,
    get_timestamp_opt,
};

/// Where notices are delivered.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice could not be delivered.
    fn notify(&self, notice: &Notification) -> Result<()>;

    /// Number of unread notices for a recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot be queried.
    fn count_unread(&self, recipient_id: &str) -> Result<u64>;
}

/// Facts about the entity that the notice text needs.
#[derive(Debug, Clone, Copy)]
pub struct NoticeContext<'a> {
    /// Requester behind the entity, if any.
    pub requester_id: Option<&'a str>,
    /// Recipient id of the coordinator pool.
    pub coordinators: &'a str,
    /// One-line description of the flight, e.g. `CGR -> CWB on 2025-03-10 09:00`.
    pub flight: &'a str,
    /// Reason attached to the transition.
    pub reason: Option<&'a str>,
    /// Commit time of the transition.
    pub at: DateTime<Utc>,
}

/// Build the notices a transition produces.
///
/// Requesters hear about decisions on their own requests and about the
/// outcome of plans created from them; the coordinator pool hears about new
/// and withdrawn requests. Nobody gets two notices for one transition.
#[must_use]
pub fn notices_for(event: &TransitionEvent, ctx: &NoticeContext<'_>) -> Vec<Notification> {
    let id = &event.entity_id;
    let reason = ctx.reason.map(|r| format!(" Reason: {r}")).unwrap_or_default();

    let (role, subject, body) = match event.change {
        StatusChange::Request {
            from: None,
            to: RequestStatus::Requested,
        } => (
            RecipientRole::Coordinator,
            format!("New flight request {id}"),
            format!("{} requested {}.", event.actor, ctx.flight),
        ),
        StatusChange::Request {
            to: RequestStatus::Approved,
            ..
        } => (
            RecipientRole::Requester,
            "Flight request approved".to_string(),
            format!("Your request for {} was approved.", ctx.flight),
        ),
        StatusChange::Request {
            to: RequestStatus::Rejected,
            ..
        } => (
            RecipientRole::Requester,
            "Flight request rejected".to_string(),
            format!("Your request for {} was rejected.{reason}", ctx.flight),
        ),
        StatusChange::Request {
            to: RequestStatus::Scheduled,
            ..
        } => (
            RecipientRole::Requester,
            "Flight scheduled".to_string(),
            format!("Your flight {} is scheduled.", ctx.flight),
        ),
        StatusChange::Request {
            to: RequestStatus::Cancelled,
            ..
        } => (
            RecipientRole::Coordinator,
            format!("Flight request {id} cancelled"),
            format!("{} withdrew the request for {}.{reason}", event.actor, ctx.flight),
        ),
        StatusChange::Plan {
            to: PlanStatus::Completed,
            ..
        } => (
            RecipientRole::Requester,
            "Flight completed".to_string(),
            format!("Your flight {} has been completed.", ctx.flight),
        ),
        StatusChange::Plan {
            to: PlanStatus::Cancelled,
            ..
        } => (
            RecipientRole::Requester,
            "Flight cancelled".to_string(),
            format!("Your flight {} was cancelled.{reason}", ctx.flight),
        ),
        StatusChange::Request { .. } | StatusChange::Plan { .. } => return Vec::new(),
    };

    let recipient = match role {
        RecipientRole::Coordinator => Some(ctx.coordinators),
        RecipientRole::Requester => ctx.requester_id,
    };

    recipient
        .map(|recipient_id| Notification {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            recipient_role: role,
            subject,
            body,
            created_at: ctx.at,
            read_at: None,
        })
        .into_iter()
        .collect()
}

/// Inbox stored in the charterops database.
#[derive(Debug)]
pub struct SqliteInbox {
    conn: Mutex<Connection>,
}

impl SqliteInbox {
    /// Open the inbox in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(connect(path, busy_timeout)?),
        })
    }

    /// Create an in-memory inbox for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(connect_in_memory()?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Notices for a recipient, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_for(&self, recipient_id: &str, unread_only: bool) -> Result<Vec<Notification>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r"
            SELECT id, recipient_id, recipient_role, subject, body, created_at, read_at
            FROM notifications
            WHERE recipient_id = ?1 AND (?2 = 0 OR read_at IS NULL)
            ORDER BY created_at DESC, id ASC
            ",
        )?;
        let notices = stmt
            .query_map(params![recipient_id, unread_only], |row| {
                let role: String = row.get(2)?;
                Ok(Notification {
                    id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    recipient_role: decode_parsed(2, &role)?,
                    subject: row.get(3)?,
                    body: row.get(4)?,
                    created_at: get_timestamp(row, 5)?,
                    read_at: get_timestamp_opt(row, 6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notices)
    }

    /// Mark a notice read. Returns `false` if it was unknown or already read.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_read(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let updated = self.lock().execute(
            "UPDATE notifications SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
            params![encode_timestamp(at), id],
        )?;
        Ok(updated > 0)
    }
}

impl NotificationSink for SqliteInbox {
    fn notify(&self, notice: &Notification) -> Result<()> {
        self.lock().execute(
            r"
            INSERT INTO notifications (id, recipient_id, recipient_role, subject, body, created_at, read_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                notice.id,
                notice.recipient_id,
                notice.recipient_role.as_str(),
                notice.subject,
                notice.body,
                encode_timestamp(notice.created_at),
                notice.read_at.map(encode_timestamp),
            ],
        )?;
        debug!("Notified {}: {}", notice.recipient_id, notice.subject);
        Ok(())
    }

    fn count_unread(&self, recipient_id: &str) -> Result<u64> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read_at IS NULL",
            [recipient_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
