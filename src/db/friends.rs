//! Friend link storage
//!
//! Links are stored once with a direction (requester, addressee); every
//! friendship query has to look at both columns.

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::friends;
use super::models::{current_timestamp, FriendLink, FriendStatus, NewFriendLink};
use crate::error::HubError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_link(conn: &mut SqliteConnection, id: &str) -> Result<Option<FriendLink>, HubError> {
    Ok(friends::table
        .filter(friends::id.eq(id))
        .first(conn)
        .optional()?)
}

/// A link between two users that still counts (anything but rejected)
pub fn find_live_link_between(
    conn: &mut SqliteConnection,
    a: &str,
    b: &str,
) -> Result<Option<FriendLink>, HubError> {
    Ok(friends::table
        .filter(friends::status.ne(FriendStatus::Rejected.as_str()))
        .filter(
            friends::requester_id
                .eq(a)
                .and(friends::addressee_id.eq(b))
                .or(friends::requester_id.eq(b).and(friends::addressee_id.eq(a))),
        )
        .first(conn)
        .optional()?)
}

/// Whether `a` and `b` share an accepted link
pub fn are_friends(conn: &mut SqliteConnection, a: &str, b: &str) -> Result<bool, HubError> {
    if a == b {
        return Ok(false);
    }

    let count: i64 = friends::table
        .filter(friends::status.eq(FriendStatus::Accepted.as_str()))
        .filter(
            friends::requester_id
                .eq(a)
                .and(friends::addressee_id.eq(b))
                .or(friends::requester_id.eq(b).and(friends::addressee_id.eq(a))),
        )
        .count()
        .get_result(conn)?;

    Ok(count > 0)
}

/// Ids of every accepted friend of `user_id`, deduplicated and sorted
pub fn accepted_friend_ids(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<String>, HubError> {
    let links: Vec<FriendLink> = friends::table
        .filter(friends::status.eq(FriendStatus::Accepted.as_str()))
        .filter(
            friends::requester_id
                .eq(user_id)
                .or(friends::addressee_id.eq(user_id)),
        )
        .load(conn)?;

    let mut ids: Vec<String> = links
        .iter()
        .map(|link| link.counterpart(user_id).to_string())
        .filter(|id| id != user_id)
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Pending requests addressed to `user_id`
pub fn incoming_requests(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<FriendLink>, HubError> {
    Ok(friends::table
        .filter(friends::addressee_id.eq(user_id))
        .filter(friends::status.eq(FriendStatus::Pending.as_str()))
        .order(friends::created_at.desc())
        .load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn create_link(
    conn: &mut SqliteConnection,
    requester_id: &str,
    addressee_id: &str,
    status: FriendStatus,
) -> Result<FriendLink, HubError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    diesel::insert_into(friends::table)
        .values(&NewFriendLink {
            id: &id,
            requester_id,
            addressee_id,
            status: status.as_str(),
            created_at: &now,
        })
        .execute(conn)?;

    get_link(conn, &id)?
        .ok_or_else(|| HubError::Internal("Failed to retrieve created friend link".into()))
}

/// Move a link from `from` to `to`. Returns false when the link was not in `from`.
pub fn transition_link(
    conn: &mut SqliteConnection,
    id: &str,
    from: FriendStatus,
    to: FriendStatus,
) -> Result<bool, HubError> {
    let updated = diesel::update(
        friends::table
            .filter(friends::id.eq(id))
            .filter(friends::status.eq(from.as_str())),
    )
    .set(friends::status.eq(to.as_str()))
    .execute(conn)?;

    Ok(updated > 0)
}

pub fn set_link_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: FriendStatus,
) -> Result<bool, HubError> {
    let updated = diesel::update(friends::table.filter(friends::id.eq(id)))
        .set(friends::status.eq(status.as_str()))
        .execute(conn)?;
    Ok(updated > 0)
}
