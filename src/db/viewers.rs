//! Allowed viewers of select_friends goals
//!
//! Membership is always checked with an exact (goal_id, user_id) match.
//! Joining proofs against this table instead leaks proofs of other goals to
//! anyone who is a viewer of *some* goal.

use diesel::prelude::*;

use super::diesel_schema::goal_allowed_viewers;
use super::models::AllowedViewer;
use crate::error::HubError;

/// Users allowed to verify the goal (`can_verify = 1`), sorted
pub fn verifier_ids(conn: &mut SqliteConnection, goal_id: &str) -> Result<Vec<String>, HubError> {
    Ok(goal_allowed_viewers::table
        .filter(goal_allowed_viewers::goal_id.eq(goal_id))
        .filter(goal_allowed_viewers::can_verify.eq(1))
        .select(goal_allowed_viewers::user_id)
        .order(goal_allowed_viewers::user_id.asc())
        .load(conn)?)
}

pub fn list_viewers(conn: &mut SqliteConnection, goal_id: &str) -> Result<Vec<AllowedViewer>, HubError> {
    Ok(goal_allowed_viewers::table
        .filter(goal_allowed_viewers::goal_id.eq(goal_id))
        .order(goal_allowed_viewers::user_id.asc())
        .load(conn)?)
}

pub fn is_verifier(conn: &mut SqliteConnection, goal_id: &str, user_id: &str) -> Result<bool, HubError> {
    let count: i64 = goal_allowed_viewers::table
        .filter(goal_allowed_viewers::goal_id.eq(goal_id))
        .filter(goal_allowed_viewers::user_id.eq(user_id))
        .filter(goal_allowed_viewers::can_verify.eq(1))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn is_viewer(conn: &mut SqliteConnection, goal_id: &str, user_id: &str) -> Result<bool, HubError> {
    let count: i64 = goal_allowed_viewers::table
        .filter(goal_allowed_viewers::goal_id.eq(goal_id))
        .filter(goal_allowed_viewers::user_id.eq(user_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Goals on which `user_id` holds verification rights
pub fn goal_ids_verifiable_by(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<String>, HubError> {
    Ok(goal_allowed_viewers::table
        .filter(goal_allowed_viewers::user_id.eq(user_id))
        .filter(goal_allowed_viewers::can_verify.eq(1))
        .select(goal_allowed_viewers::goal_id)
        .load(conn)?)
}

pub fn add_viewer(
    conn: &mut SqliteConnection,
    goal_id: &str,
    user_id: &str,
    can_verify: bool,
) -> Result<(), HubError> {
    diesel::insert_into(goal_allowed_viewers::table)
        .values(&AllowedViewer {
            goal_id: goal_id.to_string(),
            user_id: user_id.to_string(),
            can_verify: if can_verify { 1 } else { 0 },
        })
        .execute(conn)?;
    Ok(())
}

pub fn remove_viewer(conn: &mut SqliteConnection, goal_id: &str, user_id: &str) -> Result<bool, HubError> {
    let deleted = diesel::delete(
        goal_allowed_viewers::table
            .filter(goal_allowed_viewers::goal_id.eq(goal_id))
            .filter(goal_allowed_viewers::user_id.eq(user_id)),
    )
    .execute(conn)?;
    Ok(deleted > 0)
}

/// Replace the viewer list of a goal with `user_ids` (all with can_verify)
pub fn replace_viewers(
    conn: &mut SqliteConnection,
    goal_id: &str,
    user_ids: &[String],
) -> Result<usize, HubError> {
    diesel::delete(goal_allowed_viewers::table.filter(goal_allowed_viewers::goal_id.eq(goal_id)))
        .execute(conn)?;

    let mut unique: Vec<&String> = user_ids.iter().collect();
    unique.sort();
    unique.dedup();

    for user_id in &unique {
        add_viewer(conn, goal_id, user_id, true)?;
    }
    Ok(unique.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{GoalPrivacy, GoalStatus, MilestoneType, NewGoal};
    use crate::db::{goals, users, HubDb};

    fn seed(conn: &mut SqliteConnection) {
        for name in ["owner", "v1", "v2"] {
            users::create_user(conn, name, name, &format!("{}@example.com", name)).unwrap();
        }
        for id in ["g1", "g2"] {
            goals::insert_goal(
                conn,
                &NewGoal {
                    id,
                    user_id: "owner",
                    title: id,
                    description: None,
                    milestone_type: MilestoneType::Flexible.as_str(),
                    milestone_interval_days: Some(7),
                    milestone_quantity: None,
                    milestone_unit: None,
                    start_date: "2024-01-01",
                    deadline: "2024-02-01",
                    privacy_setting: GoalPrivacy::SelectFriends.as_str(),
                    image_url: None,
                    user_story: None,
                    status: GoalStatus::Active.as_str(),
                    created_at: "2024-01-01T00:00:00Z",
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn test_membership_is_per_goal() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        add_viewer(&mut conn, "g1", "v1", true).unwrap();
        add_viewer(&mut conn, "g2", "v2", true).unwrap();

        assert!(is_verifier(&mut conn, "g1", "v1").unwrap());
        assert!(!is_verifier(&mut conn, "g1", "v2").unwrap());
        assert_eq!(goal_ids_verifiable_by(&mut conn, "v1").unwrap(), vec!["g1".to_string()]);
    }

    #[test]
    fn test_view_only_rows_do_not_verify() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        add_viewer(&mut conn, "g1", "v1", false).unwrap();
        assert!(is_viewer(&mut conn, "g1", "v1").unwrap());
        assert!(!is_verifier(&mut conn, "g1", "v1").unwrap());
        assert!(verifier_ids(&mut conn, "g1").unwrap().is_empty());
    }

    #[test]
    fn test_replace_viewers() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        add_viewer(&mut conn, "g1", "v1", true).unwrap();
        let count = replace_viewers(&mut conn, "g1", &["v2".to_string(), "v2".to_string()]).unwrap();

        assert_eq!(count, 1);
        assert_eq!(verifier_ids(&mut conn, "g1").unwrap(), vec!["v2".to_string()]);
        assert!(!remove_viewer(&mut conn, "g1", "v1").unwrap());
        assert!(remove_viewer(&mut conn, "g1", "v2").unwrap());
    }
}
