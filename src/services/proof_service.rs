//! Proof lifecycle
//!
//! ```text
//! pending ──(approvals >= required)──> approved ──> milestone completed
//!    │
//!    ├──(first rejection)──────────────> rejected
//!    │
//!    └──(now > verification_expires_at)> rejected  + proof_expired notice
//! ```
//!
//! Terminal states never change again. Every transition is a conditional
//! update on `status = 'pending'`, run inside the caller's `BEGIN IMMEDIATE`
//! transaction, so it fires at most once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use diesel::SqliteConnection;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{format_timestamp, NewProof};
use crate::db::{friends, goals, proofs, viewers};
use crate::db::{Goal, GoalPrivacy, GoalStatus, HubDb, Proof, ProofStatus, ProofWithVerifications};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};
use crate::services::notification_service::{
    NotificationEvent, NotificationLinks, NotificationService,
};
use crate::services::privacy;

/// Default verification window
pub const DEFAULT_VERIFICATION_WINDOW_HOURS: i64 = 72;

/// Proof submission input
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitProofInput {
    pub goal_id: String,
    pub milestone_id: Option<String>,
    pub image_url: String,
    pub caption: Option<String>,
}

/// What an approving vote did to the proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// Threshold not reached yet
    Pending { approvals: i64, required: i32 },
    Approved {
        milestone_id: Option<String>,
        /// The goal moved from completed-pending to completed-verified
        goal_verified: bool,
    },
    Rejected,
    /// Someone else finalized the proof first
    Unchanged,
}

pub struct ProofService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationService>,
    window: Duration,
}

impl ProofService {
    pub fn new(
        db: Arc<HubDb>,
        events: Arc<EventBus>,
        notifier: Arc<NotificationService>,
        window: Duration,
    ) -> Self {
        Self {
            db,
            events,
            notifier,
            window,
        }
    }

    pub fn verification_window(&self) -> Duration {
        self.window
    }

    // ========================================================================
    // Submission
    // ========================================================================

    pub fn submit(&self, submitter_id: &str, input: SubmitProofInput) -> Result<Proof, HubError> {
        self.submit_at(submitter_id, input, Utc::now())
    }

    /// Persist a pending proof, freezing its approval threshold, and notify
    /// the goal's audience.
    pub fn submit_at(
        &self,
        submitter_id: &str,
        input: SubmitProofInput,
        now: DateTime<Utc>,
    ) -> Result<Proof, HubError> {
        if input.image_url.trim().is_empty() {
            return Err(HubError::InvalidInput("proof image reference is required".into()));
        }

        let (proof, goal, audience) = self.db.write_txn(|conn| {
            let goal = goals::get_goal(conn, &input.goal_id)?
                .ok_or_else(|| HubError::NotFound(format!("goal '{}'", input.goal_id)))?;

            if goal.user_id != submitter_id {
                return Err(HubError::Forbidden(
                    "only the goal owner can submit proof".into(),
                ));
            }
            if !matches!(goal.lifecycle()?, GoalStatus::Active | GoalStatus::CompletedPending) {
                return Err(HubError::InvalidInput(format!(
                    "goal '{}' is {} and does not accept proof",
                    goal.id, goal.status
                )));
            }

            if let Some(milestone_id) = &input.milestone_id {
                let milestone = goals::get_milestone(conn, milestone_id)?
                    .ok_or_else(|| HubError::NotFound(format!("milestone '{}'", milestone_id)))?;
                if milestone.goal_id != goal.id {
                    return Err(HubError::InvalidReference(format!(
                        "milestone '{}' does not belong to goal '{}'",
                        milestone_id, goal.id
                    )));
                }
            }

            let audience = privacy::eligible_audience(conn, &goal)?;
            let required = privacy::threshold_for(&audience);

            let id = Uuid::new_v4().to_string();
            let uploaded_at = format_timestamp(now);
            let expires_at = format_timestamp(now + self.window);

            let proof = proofs::insert_proof(
                conn,
                &NewProof {
                    id: &id,
                    goal_id: &goal.id,
                    milestone_id: input.milestone_id.as_deref(),
                    user_id: submitter_id,
                    image_url: &input.image_url,
                    caption: input.caption.as_deref(),
                    status: ProofStatus::Pending.as_str(),
                    required_verifications: required,
                    uploaded_at: &uploaded_at,
                    verification_expires_at: &expires_at,
                },
            )?;

            Ok((proof, goal, audience))
        })?;

        info!(
            proof = %proof.id,
            goal = %goal.id,
            required = proof.required_verifications,
            "Proof submitted"
        );

        self.events.emit(HubEvent::ProofSubmitted {
            proof_id: proof.id.clone(),
            goal_id: goal.id.clone(),
            submitter_id: submitter_id.to_string(),
            required_verifications: proof.required_verifications,
        });

        self.notifier.notify_at(
            &NotificationEvent::ProofSubmitted {
                goal_title: goal.title.clone(),
            },
            NotificationLinks {
                actor_id: Some(submitter_id),
                goal_id: Some(&goal.id),
                proof_id: Some(&proof.id),
            },
            &audience,
            now,
        );

        Ok(proof)
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    pub fn expire_overdue(&self) -> Result<Vec<Proof>, HubError> {
        self.expire_overdue_at(Utc::now())
    }

    /// Reject every pending proof whose window closed before `now`.
    /// Idempotent: a second run finds nothing.
    pub fn expire_overdue_at(&self, now: DateTime<Utc>) -> Result<Vec<Proof>, HubError> {
        // Read first so the common case never takes the write lock
        let overdue = self.db.with_conn(|conn| proofs::list_overdue_pending(conn, now))?;
        if overdue.is_empty() {
            debug!("Expiry sweep found nothing");
            return Ok(vec![]);
        }

        let expired = self.db.write_txn(|conn| {
            let mut expired = Vec::new();
            for proof in proofs::list_overdue_pending(conn, now)? {
                if Self::expire_in_txn(conn, &proof.id)? {
                    let title = goal_title(conn, &proof.goal_id)?;
                    expired.push((proof, title));
                }
            }
            Ok(expired)
        })?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue proofs");
        }

        let mut result = Vec::with_capacity(expired.len());
        for (mut proof, title) in expired {
            proof.status = ProofStatus::Rejected.as_str().to_string();
            self.announce_expiry(&proof, title, now);
            result.push(proof);
        }
        Ok(result)
    }

    /// Materialize expiry for one proof. Returns false if it was no longer pending.
    pub(crate) fn expire_in_txn(conn: &mut SqliteConnection, proof_id: &str) -> Result<bool, HubError> {
        proofs::finalize_pending(conn, proof_id, ProofStatus::Rejected)
    }

    /// Post-commit side effects of an expiry
    pub(crate) fn announce_expiry(&self, proof: &Proof, goal_title: String, now: DateTime<Utc>) {
        self.events.emit(HubEvent::ProofExpired {
            proof_id: proof.id.clone(),
        });
        self.notifier.notify_at(
            &NotificationEvent::ProofExpired { goal_title },
            NotificationLinks {
                actor_id: None,
                goal_id: Some(&proof.goal_id),
                proof_id: Some(&proof.id),
            },
            &[proof.user_id.clone()],
            now,
        );
    }

    // ========================================================================
    // Finalization (called inside the vote transaction)
    // ========================================================================

    /// Approve the proof if its approvals reached the frozen threshold, and
    /// cascade to its milestone (or to a goal awaiting completion).
    pub(crate) fn finalize_if_approved(
        conn: &mut SqliteConnection,
        proof: &Proof,
        now: DateTime<Utc>,
    ) -> Result<Finalization, HubError> {
        let approvals = proofs::count_approvals(conn, &proof.id)?;
        if approvals < i64::from(proof.required_verifications) {
            return Ok(Finalization::Pending {
                approvals,
                required: proof.required_verifications,
            });
        }

        if !proofs::finalize_pending(conn, &proof.id, ProofStatus::Approved)? {
            return Ok(Finalization::Unchanged);
        }

        let mut goal_verified = false;
        match &proof.milestone_id {
            Some(milestone_id) => {
                if !goals::complete_milestone(conn, milestone_id, now)? {
                    debug!(proof = %proof.id, milestone = %milestone_id, "Milestone already completed");
                }
            }
            None => {
                goal_verified = goals::transition_goal_status(
                    conn,
                    &proof.goal_id,
                    GoalStatus::CompletedPending,
                    GoalStatus::CompletedVerified,
                )?;
            }
        }

        Ok(Finalization::Approved {
            milestone_id: proof.milestone_id.clone(),
            goal_verified,
        })
    }

    /// One rejection is enough
    pub(crate) fn finalize_if_rejected(
        conn: &mut SqliteConnection,
        proof: &Proof,
    ) -> Result<Finalization, HubError> {
        if proofs::finalize_pending(conn, &proof.id, ProofStatus::Rejected)? {
            Ok(Finalization::Rejected)
        } else {
            Ok(Finalization::Unchanged)
        }
    }

    // ========================================================================
    // Listing
    // ========================================================================

    pub fn list_visible_proofs(&self, viewer_id: &str) -> Result<Vec<ProofWithVerifications>, HubError> {
        self.list_visible_proofs_at(viewer_id, Utc::now())
    }

    /// The viewer's own proofs plus pending proofs the viewer may verify,
    /// newest first. Runs the expiry sweep first.
    pub fn list_visible_proofs_at(
        &self,
        viewer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProofWithVerifications>, HubError> {
        self.expire_overdue_at(now)?;

        self.db.with_conn(|conn| {
            let mut visible = Vec::new();
            for proof in proofs::list_by_submitter(conn, viewer_id)? {
                visible.push(with_verifications(conn, proof, false)?);
            }

            let friend_ids = friends::accepted_friend_ids(conn, viewer_id)?;
            let mut goal_ids: HashSet<String> = goals::goal_ids_for_owners_with_privacy(
                conn,
                &friend_ids,
                GoalPrivacy::Friends.as_str(),
            )?
            .into_iter()
            .collect();
            goal_ids.extend(viewers::goal_ids_verifiable_by(conn, viewer_id)?);
            let goal_ids: Vec<String> = goal_ids.into_iter().collect();

            let mut goal_cache: HashMap<String, Goal> = HashMap::new();
            for proof in proofs::list_pending_on_goals(conn, &goal_ids, viewer_id)? {
                if !goal_cache.contains_key(&proof.goal_id) {
                    match goals::get_goal(conn, &proof.goal_id)? {
                        Some(goal) => {
                            goal_cache.insert(goal.id.clone(), goal);
                        }
                        None => continue,
                    }
                }
                let Some(goal) = goal_cache.get(&proof.goal_id) else {
                    continue;
                };

                if !privacy::can_verify(conn, goal, viewer_id, &proof.user_id)? {
                    continue;
                }
                let can_vote = !proofs::has_voted(conn, &proof.id, viewer_id)?;
                visible.push(with_verifications(conn, proof, can_vote)?);
            }

            visible.sort_by(|a, b| b.proof.uploaded_at.cmp(&a.proof.uploaded_at));
            Ok(visible)
        })
    }

    /// One proof as seen by `viewer_id`. Proofs the viewer may not see are
    /// reported as missing.
    pub fn view_proof(&self, viewer_id: &str, proof_id: &str) -> Result<ProofWithVerifications, HubError> {
        self.db
            .with_conn(|conn| proof_view(conn, proof_id, viewer_id, Utc::now()))
    }
}

/// Load `proof_id` with its votes for `viewer_id`, or `NotFound` when the
/// viewer is neither the submitter nor in the goal's audience.
pub(crate) fn proof_view(
    conn: &mut SqliteConnection,
    proof_id: &str,
    viewer_id: &str,
    now: DateTime<Utc>,
) -> Result<ProofWithVerifications, HubError> {
    let not_found = || HubError::NotFound(format!("proof '{}'", proof_id));

    let proof = proofs::get_proof(conn, proof_id)?.ok_or_else(not_found)?;
    if proof.user_id == viewer_id {
        return with_verifications(conn, proof, false);
    }

    let goal = goals::get_goal(conn, &proof.goal_id)?.ok_or_else(not_found)?;
    if !privacy::can_verify(conn, &goal, viewer_id, &proof.user_id)? {
        return Err(not_found());
    }

    let can_vote = proof.state()? == ProofStatus::Pending
        && !proof.is_past_deadline(now)?
        && !proofs::has_voted(conn, &proof.id, viewer_id)?;
    with_verifications(conn, proof, can_vote)
}

fn with_verifications(
    conn: &mut SqliteConnection,
    proof: Proof,
    can_verify: bool,
) -> Result<ProofWithVerifications, HubError> {
    let verifications = proofs::list_verifications(conn, &proof.id)?;
    Ok(ProofWithVerifications {
        proof,
        verifications,
        can_verify,
    })
}

pub(crate) fn goal_title(conn: &mut SqliteConnection, goal_id: &str) -> Result<String, HubError> {
    Ok(goals::get_goal(conn, goal_id)?
        .map(|g| g.title)
        .unwrap_or_default())
}
