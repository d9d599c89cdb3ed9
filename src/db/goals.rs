//! Goal and milestone storage

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use super::diesel_schema::{goals, milestones};
use super::models::{
    format_date, format_timestamp, Goal, GoalStatus, Milestone, NewGoal, NewMilestone,
};
use crate::error::HubError;

/// Partial goal update. `None` leaves the column untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = goals)]
pub struct GoalChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub privacy_setting: Option<&'a str>,
    pub image_url: Option<&'a str>,
}

impl GoalChanges<'_> {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.privacy_setting.is_none()
            && self.image_url.is_none()
    }
}

// ============================================================================
// Goal Reads
// ============================================================================

pub fn get_goal(conn: &mut SqliteConnection, id: &str) -> Result<Option<Goal>, HubError> {
    Ok(goals::table
        .filter(goals::id.eq(id))
        .first(conn)
        .optional()?)
}

/// Load a goal, failing with `NotFound` unless `owner_id` owns it
pub fn get_owned_goal(
    conn: &mut SqliteConnection,
    id: &str,
    owner_id: &str,
) -> Result<Goal, HubError> {
    goals::table
        .filter(goals::id.eq(id))
        .filter(goals::user_id.eq(owner_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| HubError::NotFound(format!("goal '{}'", id)))
}

/// Non-archived goals of an owner, newest first
pub fn list_goals_for_owner(
    conn: &mut SqliteConnection,
    owner_id: &str,
) -> Result<Vec<Goal>, HubError> {
    Ok(goals::table
        .filter(goals::user_id.eq(owner_id))
        .filter(goals::status.ne(GoalStatus::Archived.as_str()))
        .order(goals::created_at.desc())
        .load(conn)?)
}

/// Ids of goals owned by any of `owner_ids` with the given privacy mode
pub fn goal_ids_for_owners_with_privacy(
    conn: &mut SqliteConnection,
    owner_ids: &[String],
    privacy: &str,
) -> Result<Vec<String>, HubError> {
    if owner_ids.is_empty() {
        return Ok(vec![]);
    }
    Ok(goals::table
        .filter(goals::user_id.eq_any(owner_ids))
        .filter(goals::privacy_setting.eq(privacy))
        .select(goals::id)
        .load(conn)?)
}

// ============================================================================
// Goal Writes
// ============================================================================

pub fn insert_goal(conn: &mut SqliteConnection, goal: &NewGoal<'_>) -> Result<(), HubError> {
    diesel::insert_into(goals::table).values(goal).execute(conn)?;
    Ok(())
}

pub fn update_goal(
    conn: &mut SqliteConnection,
    id: &str,
    changes: &GoalChanges<'_>,
) -> Result<(), HubError> {
    if changes.is_empty() {
        return Ok(());
    }
    diesel::update(goals::table.filter(goals::id.eq(id)))
        .set(changes)
        .execute(conn)?;
    Ok(())
}

pub fn set_goal_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: GoalStatus,
) -> Result<(), HubError> {
    diesel::update(goals::table.filter(goals::id.eq(id)))
        .set(goals::status.eq(status.as_str()))
        .execute(conn)?;
    Ok(())
}

/// Mark the goal finished (verified, pending verification, or failed)
pub fn close_goal(
    conn: &mut SqliteConnection,
    id: &str,
    status: GoalStatus,
    failure_reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), HubError> {
    diesel::update(goals::table.filter(goals::id.eq(id)))
        .set((
            goals::status.eq(status.as_str()),
            goals::is_completed.eq(1),
            goals::completed_at.eq(Some(format_timestamp(at))),
            goals::failure_reason.eq(failure_reason),
        ))
        .execute(conn)?;
    Ok(())
}

/// Transition `from` -> `to` only if the goal is still in `from`
pub fn transition_goal_status(
    conn: &mut SqliteConnection,
    id: &str,
    from: GoalStatus,
    to: GoalStatus,
) -> Result<bool, HubError> {
    let updated = diesel::update(
        goals::table
            .filter(goals::id.eq(id))
            .filter(goals::status.eq(from.as_str())),
    )
    .set(goals::status.eq(to.as_str()))
    .execute(conn)?;
    Ok(updated > 0)
}

pub fn set_interval(
    conn: &mut SqliteConnection,
    id: &str,
    interval_days: i32,
) -> Result<(), HubError> {
    diesel::update(goals::table.filter(goals::id.eq(id)))
        .set(goals::milestone_interval_days.eq(Some(interval_days)))
        .execute(conn)?;
    Ok(())
}

// ============================================================================
// Milestones
// ============================================================================

pub fn get_milestone(conn: &mut SqliteConnection, id: &str) -> Result<Option<Milestone>, HubError> {
    Ok(milestones::table
        .filter(milestones::id.eq(id))
        .first(conn)
        .optional()?)
}

pub fn insert_milestones(
    conn: &mut SqliteConnection,
    rows: &[NewMilestone<'_>],
) -> Result<usize, HubError> {
    // Row by row: SQLite has no DEFAULT keyword inside multi-row VALUES,
    // and optional due dates would need it.
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(milestones::table).values(row).execute(conn)?;
    }
    Ok(inserted)
}

/// Milestones of a goal ordered by index, without the overdue sweep
pub fn list_milestones_raw(
    conn: &mut SqliteConnection,
    goal_id: &str,
) -> Result<Vec<Milestone>, HubError> {
    Ok(milestones::table
        .filter(milestones::goal_id.eq(goal_id))
        .order(milestones::order_index.asc())
        .load(conn)?)
}

/// Mark every incomplete milestone due strictly before `today` as failed.
/// One-way; already completed milestones are never touched.
pub fn fail_overdue_milestones(
    conn: &mut SqliteConnection,
    goal_id: &str,
    today: NaiveDate,
) -> Result<usize, HubError> {
    let today = format_date(today);
    Ok(diesel::update(
        milestones::table
            .filter(milestones::goal_id.eq(goal_id))
            .filter(milestones::completed.eq(0))
            .filter(milestones::due_date.is_not_null())
            .filter(milestones::due_date.lt(today)),
    )
    .set((milestones::completed.eq(1), milestones::failed.eq(1)))
    .execute(conn)?)
}

/// Complete a milestone from an approved proof. An approval overrides an
/// earlier auto-fail. Returns false if it was already completed successfully.
pub fn complete_milestone(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<bool, HubError> {
    let updated = diesel::update(
        milestones::table
            .filter(milestones::id.eq(id))
            .filter(milestones::completed.eq(0).or(milestones::failed.eq(1))),
    )
    .set((
        milestones::completed.eq(1),
        milestones::failed.eq(0),
        milestones::progress.eq(100),
        milestones::completed_at.eq(Some(format_timestamp(at))),
    ))
    .execute(conn)?;
    Ok(updated > 0)
}
