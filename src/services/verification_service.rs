//! Verification tally engine
//!
//! Records one approve/reject vote per verifier and applies the threshold
//! rule. Checks run in a fixed order inside one `BEGIN IMMEDIATE`
//! transaction:
//!
//! 1. proof exists (`NotFound`)
//! 2. deadline not passed at wall-clock time (`ProofExpired`, committing the
//!    expiry first)
//! 3. verifier authorized (`Forbidden`)
//! 4. verifier has not voted yet (`DuplicateVote`)
//! 5. proof still pending (`AlreadyResolved`)

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::db::{goals, proofs, HubDb, Proof, ProofWithVerifications};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};
use crate::services::notification_service::{
    NotificationEvent, NotificationLinks, NotificationService,
};
use crate::services::privacy;
use crate::services::proof_service::{self, Finalization, ProofService};

/// A verifier's decision
#[derive(Debug, Clone, Deserialize)]
pub struct VoteInput {
    pub approved: bool,
    pub comment: Option<String>,
}

/// Result of the vote transaction, before post-commit side effects
enum VoteOutcome {
    Expired {
        proof: Proof,
        goal_title: String,
        newly_expired: bool,
    },
    Recorded {
        proof: Proof,
        goal_title: String,
        finalization: Finalization,
    },
}

pub struct VerificationService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationService>,
    proofs: Arc<ProofService>,
}

impl VerificationService {
    pub fn new(
        db: Arc<HubDb>,
        events: Arc<EventBus>,
        notifier: Arc<NotificationService>,
        proofs: Arc<ProofService>,
    ) -> Self {
        Self {
            db,
            events,
            notifier,
            proofs,
        }
    }

    pub fn record_vote(
        &self,
        proof_id: &str,
        verifier_id: &str,
        vote: VoteInput,
    ) -> Result<ProofWithVerifications, HubError> {
        self.record_vote_at(proof_id, verifier_id, vote, Utc::now())
    }

    /// Record a vote evaluated at `now`, and return the refreshed proof
    pub fn record_vote_at(
        &self,
        proof_id: &str,
        verifier_id: &str,
        vote: VoteInput,
        now: DateTime<Utc>,
    ) -> Result<ProofWithVerifications, HubError> {
        let outcome = self.db.write_txn(|conn| {
            let proof = proofs::get_proof(conn, proof_id)?
                .ok_or_else(|| HubError::NotFound(format!("proof '{}'", proof_id)))?;
            let goal = goals::get_goal(conn, &proof.goal_id)?
                .ok_or_else(|| HubError::NotFound(format!("goal '{}'", proof.goal_id)))?;

            // Late votes fail even if no sweep has run yet. The expiry must
            // commit, so this returns Ok and the error is raised below.
            if proof.is_past_deadline(now)? {
                let newly_expired = ProofService::expire_in_txn(conn, &proof.id)?;
                return Ok(VoteOutcome::Expired {
                    proof,
                    goal_title: goal.title,
                    newly_expired,
                });
            }

            privacy::authorize_verifier(conn, &goal, verifier_id, &proof.user_id)?;

            if proofs::has_voted(conn, &proof.id, verifier_id)? {
                return Err(HubError::DuplicateVote(format!(
                    "you already voted on proof '{}'",
                    proof.id
                )));
            }

            if proof.state()?.is_terminal() {
                return Err(HubError::AlreadyResolved(format!(
                    "proof '{}' is already {}",
                    proof.id, proof.status
                )));
            }

            proofs::insert_verification(
                conn,
                &proof.id,
                verifier_id,
                vote.approved,
                vote.comment.as_deref(),
                now,
            )?;

            let finalization = if vote.approved {
                ProofService::finalize_if_approved(conn, &proof, now)?
            } else {
                ProofService::finalize_if_rejected(conn, &proof)?
            };

            Ok(VoteOutcome::Recorded {
                proof,
                goal_title: goal.title,
                finalization,
            })
        })?;

        match outcome {
            VoteOutcome::Expired {
                proof,
                goal_title,
                newly_expired,
            } => {
                if newly_expired {
                    info!(proof = %proof.id, "Proof expired on late vote");
                    self.proofs.announce_expiry(&proof, goal_title, now);
                }
                Err(HubError::ProofExpired(format!(
                    "verification window for proof '{}' closed at {}",
                    proof.id, proof.verification_expires_at
                )))
            }
            VoteOutcome::Recorded {
                proof,
                goal_title,
                finalization,
            } => {
                self.announce_vote(&proof, verifier_id, vote.approved, &goal_title, &finalization, now);
                self.db
                    .with_conn(|conn| proof_service::proof_view(conn, &proof.id, verifier_id, now))
            }
        }
    }

    fn announce_vote(
        &self,
        proof: &Proof,
        verifier_id: &str,
        approved: bool,
        goal_title: &str,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) {
        debug!(proof = %proof.id, verifier = %verifier_id, approved, "Vote recorded");
        self.events.emit(HubEvent::VoteRecorded {
            proof_id: proof.id.clone(),
            verifier_id: verifier_id.to_string(),
            approved,
        });

        match finalization {
            Finalization::Approved {
                milestone_id,
                goal_verified,
            } => {
                info!(proof = %proof.id, milestone = ?milestone_id, "Proof approved");
                self.events.emit(HubEvent::ProofApproved {
                    proof_id: proof.id.clone(),
                    milestone_id: milestone_id.clone(),
                });
                if *goal_verified {
                    self.events.emit(HubEvent::GoalStatusChanged {
                        goal_id: proof.goal_id.clone(),
                        status: crate::db::GoalStatus::CompletedVerified.as_str().to_string(),
                    });
                    self.notifier.notify_at(
                        &NotificationEvent::GoalCompleted {
                            goal_title: goal_title.to_string(),
                        },
                        NotificationLinks {
                            actor_id: Some(verifier_id),
                            goal_id: Some(&proof.goal_id),
                            proof_id: Some(&proof.id),
                        },
                        &[proof.user_id.clone()],
                        now,
                    );
                }
            }
            Finalization::Rejected => {
                info!(proof = %proof.id, verifier = %verifier_id, "Proof rejected");
                self.events.emit(HubEvent::ProofRejected {
                    proof_id: proof.id.clone(),
                    verifier_id: verifier_id.to_string(),
                });
            }
            Finalization::Pending { approvals, required } => {
                debug!(proof = %proof.id, approvals, required, "Proof still pending");
            }
            Finalization::Unchanged => {}
        }

        self.notifier.notify_at(
            &NotificationEvent::ProofVerified {
                goal_title: goal_title.to_string(),
                approved,
            },
            NotificationLinks {
                actor_id: Some(verifier_id),
                goal_id: Some(&proof.goal_id),
                proof_id: Some(&proof.id),
            },
            &[proof.user_id.clone()],
            now,
        );
    }
}
