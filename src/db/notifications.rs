//! Notification inbox storage

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::notifications;
use super::models::{
    format_timestamp, NewNotification, Notification, NotificationKind, NotificationState,
};
use crate::error::HubError;

/// One row to write; ids and timestamps are filled in by [`insert`]
#[derive(Debug, Clone)]
pub struct NotificationDraft<'a> {
    pub recipient_id: &'a str,
    pub actor_id: Option<&'a str>,
    pub kind: NotificationKind,
    pub goal_id: Option<&'a str>,
    pub proof_id: Option<&'a str>,
    pub message: &'a str,
}

pub fn insert(
    conn: &mut SqliteConnection,
    draft: &NotificationDraft<'_>,
    at: DateTime<Utc>,
) -> Result<String, HubError> {
    let id = Uuid::new_v4().to_string();
    let created_at = format_timestamp(at);

    diesel::insert_into(notifications::table)
        .values(&NewNotification {
            id: &id,
            recipient_id: draft.recipient_id,
            actor_id: draft.actor_id,
            notification_type: draft.kind.as_str(),
            goal_id: draft.goal_id,
            proof_id: draft.proof_id,
            message: draft.message,
            status: NotificationState::Unread.as_str(),
            created_at: &created_at,
        })
        .execute(conn)?;

    Ok(id)
}

/// Inbox of `recipient_id`, newest first, optionally filtered by status
pub fn list_for_recipient(
    conn: &mut SqliteConnection,
    recipient_id: &str,
    status: Option<NotificationState>,
) -> Result<Vec<Notification>, HubError> {
    let mut query = notifications::table
        .filter(notifications::recipient_id.eq(recipient_id))
        .into_boxed();

    if let Some(status) = status {
        query = query.filter(notifications::status.eq(status.as_str()));
    }

    Ok(query.order(notifications::created_at.desc()).load(conn)?)
}

/// Update the status of one notification. Another user's notification is
/// reported as missing.
pub fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    recipient_id: &str,
    status: NotificationState,
) -> Result<(), HubError> {
    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(id))
            .filter(notifications::recipient_id.eq(recipient_id)),
    )
    .set(notifications::status.eq(status.as_str()))
    .execute(conn)?;

    if updated == 0 {
        return Err(HubError::NotFound(format!("notification '{}'", id)));
    }
    Ok(())
}

pub fn mark_all_read(conn: &mut SqliteConnection, recipient_id: &str) -> Result<usize, HubError> {
    Ok(diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::status.eq(NotificationState::Unread.as_str())),
    )
    .set(notifications::status.eq(NotificationState::Read.as_str()))
    .execute(conn)?)
}

pub fn unread_count(conn: &mut SqliteConnection, recipient_id: &str) -> Result<i64, HubError> {
    Ok(notifications::table
        .filter(notifications::recipient_id.eq(recipient_id))
        .filter(notifications::status.eq(NotificationState::Unread.as_str()))
        .count()
        .get_result(conn)?)
}
