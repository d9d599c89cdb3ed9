//! Privacy resolver
//!
//! The one place that decides who may see and verify a goal's proofs, and
//! how many approvals a new proof needs. Every service that asks either
//! question goes through here.
//!
//! | privacy          | audience                            | required approvals |
//! |------------------|-------------------------------------|--------------------|
//! | `private`        | nobody                              | 1                  |
//! | `friends`        | accepted friends of the owner       | friend count, >= 1 |
//! | `select_friends` | allowed viewers with `can_verify`   | viewer count, >= 1 |
//!
//! The self-verification ban runs before any of the above.

use diesel::SqliteConnection;

use crate::db::{friends, viewers, Goal, GoalPrivacy};
use crate::error::HubError;

/// Users eligible to verify proofs of `goal`, sorted. Never contains the
/// owner.
pub fn eligible_audience(conn: &mut SqliteConnection, goal: &Goal) -> Result<Vec<String>, HubError> {
    let mut audience = match goal.privacy()? {
        GoalPrivacy::Private => vec![],
        GoalPrivacy::Friends => friends::accepted_friend_ids(conn, &goal.user_id)?,
        GoalPrivacy::SelectFriends => viewers::verifier_ids(conn, &goal.id)?,
    };
    audience.retain(|id| id != &goal.user_id);
    Ok(audience)
}

/// Approvals a proof submitted right now would need
pub fn required_approvals(conn: &mut SqliteConnection, goal: &Goal) -> Result<i32, HubError> {
    let audience = eligible_audience(conn, goal)?;
    Ok(threshold_for(&audience))
}

/// Approval threshold for an already resolved audience
pub fn threshold_for(audience: &[String]) -> i32 {
    audience.len().max(1) as i32
}

/// Whether `candidate` may vote on a proof of `goal` submitted by `submitter`
pub fn can_verify(
    conn: &mut SqliteConnection,
    goal: &Goal,
    candidate: &str,
    submitter: &str,
) -> Result<bool, HubError> {
    if candidate == submitter || candidate == goal.user_id {
        return Ok(false);
    }

    match goal.privacy()? {
        GoalPrivacy::Private => Ok(false),
        GoalPrivacy::Friends => friends::are_friends(conn, candidate, &goal.user_id),
        GoalPrivacy::SelectFriends => viewers::is_verifier(conn, &goal.id, candidate),
    }
}

/// [`can_verify`] as an error, with a specific message for own proofs
pub fn authorize_verifier(
    conn: &mut SqliteConnection,
    goal: &Goal,
    candidate: &str,
    submitter: &str,
) -> Result<(), HubError> {
    if candidate == submitter {
        return Err(HubError::Forbidden("you cannot verify your own proof".into()));
    }
    if !can_verify(conn, goal, candidate, submitter)? {
        return Err(HubError::Forbidden(format!(
            "user '{}' is not allowed to verify proofs on goal '{}'",
            candidate, goal.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{GoalStatus, MilestoneType, NewGoal};
    use crate::db::{goals, users, FriendStatus, HubDb};

    fn seed(conn: &mut SqliteConnection, privacy: GoalPrivacy) -> Goal {
        for name in ["owner", "f1", "f2", "stranger"] {
            users::create_user(conn, name, name, &format!("{}@example.com", name)).unwrap();
        }
        friends::create_link(conn, "owner", "f1", FriendStatus::Accepted).unwrap();
        friends::create_link(conn, "f2", "owner", FriendStatus::Accepted).unwrap();
        goals::insert_goal(
            conn,
            &NewGoal {
                id: "g1",
                user_id: "owner",
                title: "Write",
                description: None,
                milestone_type: MilestoneType::Flexible.as_str(),
                milestone_interval_days: Some(7),
                milestone_quantity: None,
                milestone_unit: None,
                start_date: "2024-01-01",
                deadline: "2024-02-01",
                privacy_setting: privacy.as_str(),
                image_url: None,
                user_story: None,
                status: GoalStatus::Active.as_str(),
                created_at: "2024-01-01T00:00:00Z",
            },
        )
        .unwrap();
        goals::get_goal(conn, "g1").unwrap().unwrap()
    }

    #[test]
    fn test_private_goal_has_no_audience() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let goal = seed(&mut conn, GoalPrivacy::Private);

        assert!(eligible_audience(&mut conn, &goal).unwrap().is_empty());
        assert_eq!(required_approvals(&mut conn, &goal).unwrap(), 1);
        assert!(!can_verify(&mut conn, &goal, "f1", "owner").unwrap());
    }

    #[test]
    fn test_friends_goal_counts_accepted_friends() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let goal = seed(&mut conn, GoalPrivacy::Friends);

        assert_eq!(
            eligible_audience(&mut conn, &goal).unwrap(),
            vec!["f1".to_string(), "f2".to_string()]
        );
        assert_eq!(required_approvals(&mut conn, &goal).unwrap(), 2);
        assert!(can_verify(&mut conn, &goal, "f2", "owner").unwrap());
        assert!(!can_verify(&mut conn, &goal, "stranger", "owner").unwrap());
    }

    #[test]
    fn test_select_friends_uses_exact_viewer_rows() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let goal = seed(&mut conn, GoalPrivacy::SelectFriends);

        // No viewers yet: still needs one approval, nobody can give it
        assert_eq!(required_approvals(&mut conn, &goal).unwrap(), 1);

        viewers::add_viewer(&mut conn, "g1", "f1", true).unwrap();
        assert_eq!(eligible_audience(&mut conn, &goal).unwrap(), vec!["f1".to_string()]);
        assert!(can_verify(&mut conn, &goal, "f1", "owner").unwrap());
        assert!(!can_verify(&mut conn, &goal, "f2", "owner").unwrap());
    }

    #[test]
    fn test_own_proof_is_forbidden_with_specific_message() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let goal = seed(&mut conn, GoalPrivacy::Friends);

        match authorize_verifier(&mut conn, &goal, "owner", "owner") {
            Err(HubError::Forbidden(msg)) => assert!(msg.contains("own proof")),
            other => panic!("expected Forbidden, got {:?}", other),
        }
        assert!(matches!(
            authorize_verifier(&mut conn, &goal, "stranger", "owner"),
            Err(HubError::Forbidden(_))
        ));
        assert!(authorize_verifier(&mut conn, &goal, "f1", "owner").is_ok());
    }
}
