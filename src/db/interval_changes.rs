//! Milestone interval change requests

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::interval_change_requests as icr;
use super::models::{format_timestamp, IntervalChangeRequest, NewIntervalChangeRequest, RequestStatus};
use crate::error::HubError;

pub fn get_request(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<IntervalChangeRequest>, HubError> {
    Ok(icr::table.filter(icr::id.eq(id)).first(conn).optional()?)
}

pub fn has_pending_for_goal(conn: &mut SqliteConnection, goal_id: &str) -> Result<bool, HubError> {
    let count: i64 = icr::table
        .filter(icr::goal_id.eq(goal_id))
        .filter(icr::status.eq(RequestStatus::Pending.as_str()))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Pending requests on any of `goal_ids`, oldest first
pub fn list_pending_on_goals(
    conn: &mut SqliteConnection,
    goal_ids: &[String],
) -> Result<Vec<IntervalChangeRequest>, HubError> {
    if goal_ids.is_empty() {
        return Ok(vec![]);
    }
    Ok(icr::table
        .filter(icr::goal_id.eq_any(goal_ids))
        .filter(icr::status.eq(RequestStatus::Pending.as_str()))
        .order(icr::created_at.asc())
        .load(conn)?)
}

pub fn insert_request(
    conn: &mut SqliteConnection,
    goal_id: &str,
    requester_id: &str,
    current_interval: i32,
    requested_interval: i32,
    at: DateTime<Utc>,
) -> Result<IntervalChangeRequest, HubError> {
    let id = Uuid::new_v4().to_string();
    let created_at = format_timestamp(at);

    diesel::insert_into(icr::table)
        .values(&NewIntervalChangeRequest {
            id: &id,
            goal_id,
            requester_id,
            current_interval,
            requested_interval,
            status: RequestStatus::Pending.as_str(),
            created_at: &created_at,
        })
        .execute(conn)?;

    get_request(conn, &id)?
        .ok_or_else(|| HubError::Internal("Failed to retrieve created interval change request".into()))
}

/// Resolve a pending request. Returns false if it was already resolved.
pub fn resolve(
    conn: &mut SqliteConnection,
    id: &str,
    status: RequestStatus,
    resolved_by: &str,
    at: DateTime<Utc>,
) -> Result<bool, HubError> {
    let updated = diesel::update(
        icr::table
            .filter(icr::id.eq(id))
            .filter(icr::status.eq(RequestStatus::Pending.as_str())),
    )
    .set((
        icr::status.eq(status.as_str()),
        icr::resolved_by.eq(Some(resolved_by)),
        icr::resolved_at.eq(Some(format_timestamp(at))),
    ))
    .execute(conn)?;
    Ok(updated > 0)
}
