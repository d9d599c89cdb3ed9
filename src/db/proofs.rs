//! Proof and verification storage
//!
//! Status changes are conditional updates (`WHERE status = 'pending'`), so
//! a proof can leave the pending state exactly once no matter how many
//! writers race on it.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use super::diesel_schema::{proof_verifications, proofs};
use super::models::{
    format_timestamp, NewProof, NewProofVerification, Proof, ProofStatus, ProofVerification,
};
use crate::error::HubError;

// ============================================================================
// Proof Reads
// ============================================================================

pub fn get_proof(conn: &mut SqliteConnection, id: &str) -> Result<Option<Proof>, HubError> {
    Ok(proofs::table
        .filter(proofs::id.eq(id))
        .first(conn)
        .optional()?)
}

/// Proofs a user submitted, newest first
pub fn list_by_submitter(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<Proof>, HubError> {
    Ok(proofs::table
        .filter(proofs::user_id.eq(user_id))
        .order(proofs::uploaded_at.desc())
        .load(conn)?)
}

/// Pending proofs on `goal_ids` submitted by someone other than `exclude_user`
pub fn list_pending_on_goals(
    conn: &mut SqliteConnection,
    goal_ids: &[String],
    exclude_user: &str,
) -> Result<Vec<Proof>, HubError> {
    if goal_ids.is_empty() {
        return Ok(vec![]);
    }
    Ok(proofs::table
        .filter(proofs::goal_id.eq_any(goal_ids))
        .filter(proofs::status.eq(ProofStatus::Pending.as_str()))
        .filter(proofs::user_id.ne(exclude_user))
        .order(proofs::uploaded_at.desc())
        .load(conn)?)
}

/// Pending proofs whose window closed strictly before `now`
pub fn list_overdue_pending(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<Proof>, HubError> {
    Ok(proofs::table
        .filter(proofs::status.eq(ProofStatus::Pending.as_str()))
        .filter(proofs::verification_expires_at.lt(format_timestamp(now)))
        .order(proofs::verification_expires_at.asc())
        .load(conn)?)
}

// ============================================================================
// Proof Writes
// ============================================================================

pub fn insert_proof(conn: &mut SqliteConnection, proof: &NewProof<'_>) -> Result<Proof, HubError> {
    diesel::insert_into(proofs::table).values(proof).execute(conn)?;
    get_proof(conn, proof.id)?.ok_or_else(|| HubError::Internal("Failed to retrieve created proof".into()))
}

/// Move a pending proof to `to`. Returns false if the proof was no longer
/// pending, meaning another writer already finalized it.
pub fn finalize_pending(conn: &mut SqliteConnection, id: &str, to: ProofStatus) -> Result<bool, HubError> {
    if to == ProofStatus::Pending {
        return Err(HubError::Internal("cannot finalize a proof back to pending".into()));
    }

    let updated = diesel::update(
        proofs::table
            .filter(proofs::id.eq(id))
            .filter(proofs::status.eq(ProofStatus::Pending.as_str())),
    )
    .set(proofs::status.eq(to.as_str()))
    .execute(conn)?;

    Ok(updated > 0)
}

// ============================================================================
// Verifications
// ============================================================================

pub fn list_verifications(conn: &mut SqliteConnection, proof_id: &str) -> Result<Vec<ProofVerification>, HubError> {
    Ok(proof_verifications::table
        .filter(proof_verifications::proof_id.eq(proof_id))
        .order(proof_verifications::created_at.asc())
        .load(conn)?)
}

pub fn count_approvals(conn: &mut SqliteConnection, proof_id: &str) -> Result<i64, HubError> {
    Ok(proof_verifications::table
        .filter(proof_verifications::proof_id.eq(proof_id))
        .filter(proof_verifications::approved.eq(1))
        .count()
        .get_result(conn)?)
}

pub fn has_voted(conn: &mut SqliteConnection, proof_id: &str, verifier_id: &str) -> Result<bool, HubError> {
    let count: i64 = proof_verifications::table
        .filter(proof_verifications::proof_id.eq(proof_id))
        .filter(proof_verifications::verifier_id.eq(verifier_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Insert one vote. The unique (proof_id, verifier_id) index is the source
/// of truth for one-vote-per-verifier; its violation becomes `DuplicateVote`.
pub fn insert_verification(
    conn: &mut SqliteConnection,
    proof_id: &str,
    verifier_id: &str,
    approved: bool,
    comment: Option<&str>,
    at: DateTime<Utc>,
) -> Result<ProofVerification, HubError> {
    let id = Uuid::new_v4().to_string();
    let created_at = format_timestamp(at);

    let result = diesel::insert_into(proof_verifications::table)
        .values(&NewProofVerification {
            id: &id,
            proof_id,
            verifier_id,
            approved: if approved { 1 } else { 0 },
            comment,
            created_at: &created_at,
        })
        .execute(conn);

    match result {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(HubError::DuplicateVote(format!(
                "user '{}' already voted on proof '{}'",
                verifier_id, proof_id
            )));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(proof_verifications::table
        .filter(proof_verifications::id.eq(&id))
        .first(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{GoalPrivacy, GoalStatus, MilestoneType, NewGoal};
    use crate::db::{goals, users, HubDb};
    use chrono::TimeZone;

    fn seed(conn: &mut SqliteConnection) -> Proof {
        for name in ["owner", "v1", "v2"] {
            users::create_user(conn, name, name, &format!("{}@example.com", name)).unwrap();
        }
        goals::insert_goal(
            conn,
            &NewGoal {
                id: "g1",
                user_id: "owner",
                title: "Read",
                description: None,
                milestone_type: MilestoneType::Flexible.as_str(),
                milestone_interval_days: Some(7),
                milestone_quantity: None,
                milestone_unit: None,
                start_date: "2024-01-01",
                deadline: "2024-02-01",
                privacy_setting: GoalPrivacy::Friends.as_str(),
                image_url: None,
                user_story: None,
                status: GoalStatus::Active.as_str(),
                created_at: "2024-01-01T00:00:00Z",
            },
        )
        .unwrap();
        insert_proof(
            conn,
            &NewProof {
                id: "p1",
                goal_id: "g1",
                milestone_id: None,
                user_id: "owner",
                image_url: "http://blobs/p1.jpg",
                caption: None,
                status: ProofStatus::Pending.as_str(),
                required_verifications: 2,
                uploaded_at: "2024-01-01T00:00:00Z",
                verification_expires_at: "2024-01-04T00:00:00Z",
            },
        )
        .unwrap()
    }

    #[test]
    fn test_unique_index_rejects_second_vote() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        insert_verification(&mut conn, "p1", "v1", true, None, Utc::now()).unwrap();
        let second = insert_verification(&mut conn, "p1", "v1", false, Some("changed my mind"), Utc::now());

        assert!(matches!(second, Err(HubError::DuplicateVote(_))));
        assert_eq!(list_verifications(&mut conn, "p1").unwrap().len(), 1);
        assert_eq!(count_approvals(&mut conn, "p1").unwrap(), 1);
    }

    #[test]
    fn test_finalize_happens_once() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        assert!(finalize_pending(&mut conn, "p1", ProofStatus::Approved).unwrap());
        assert!(!finalize_pending(&mut conn, "p1", ProofStatus::Rejected).unwrap());
        assert_eq!(get_proof(&mut conn, "p1").unwrap().unwrap().status, "approved");
    }

    #[test]
    fn test_overdue_listing_is_strict() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        seed(&mut conn);

        let at_deadline = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        assert!(list_overdue_pending(&mut conn, at_deadline).unwrap().is_empty());

        let after = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 1).unwrap();
        assert_eq!(list_overdue_pending(&mut conn, after).unwrap().len(), 1);
    }
}
