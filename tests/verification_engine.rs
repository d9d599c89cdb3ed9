//! End-to-end scenarios for the proof verification engine
//!
//! Runs the public service API against real SQLite databases: in-memory for
//! the sequential scenarios, file-backed with a multi-connection pool for
//! the races.

use std::sync::{Arc, Barrier};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use accountability_hub::db::{users, GoalPrivacy, GoalStatus, NotificationKind, Proof, ProofStatus};
use accountability_hub::services::{
    CreateGoalInput, GoalDetails, HubEvent, MilestoneDraft, MilestonePlan, NotificationEvent,
    NotificationLinks, SubmitProofInput, VoteInput,
};
use accountability_hub::{HubDb, HubError, Services};

// ============================================================================
// Fixtures
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn hub() -> Services {
    Services::new(Arc::new(HubDb::open_in_memory().unwrap()))
}

fn add_users(hub: &Services, names: &[&str]) {
    hub.db
        .with_conn(|conn| {
            for name in names {
                users::create_user(conn, name, name, &format!("{}@example.com", name))?;
            }
            Ok(())
        })
        .unwrap();
}

fn befriend(hub: &Services, a: &str, b: &str) {
    let link = hub.friends.send_request(a, b).unwrap();
    hub.friends.respond(&link.id, b, true).unwrap();
}

fn create_goal(hub: &Services, owner: &str, privacy: GoalPrivacy, viewers: &[&str]) -> GoalDetails {
    hub.goals
        .create_goal_at(
            owner,
            CreateGoalInput {
                title: "Run a marathon".into(),
                description: Some("Train three times a week".into()),
                start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                deadline: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
                privacy,
                plan: MilestonePlan::Flexible {
                    interval_days: 7,
                    initial_milestones: vec![MilestoneDraft {
                        title: "First 10k".into(),
                        description: None,
                        due_date: NaiveDate::from_ymd_opt(2024, 11, 1),
                    }],
                },
                image_url: None,
                user_story: None,
                selected_friend_ids: viewers.iter().map(|v| v.to_string()).collect(),
            },
            t0(),
        )
        .unwrap()
}

fn submit(hub: &Services, goal: &GoalDetails, milestone: bool, at: DateTime<Utc>) -> Proof {
    hub.proofs
        .submit_at(
            &goal.goal.user_id,
            SubmitProofInput {
                goal_id: goal.goal.id.clone(),
                milestone_id: milestone.then(|| goal.milestones[0].id.clone()),
                image_url: "http://localhost:9000/goal-proofs/run.jpg".into(),
                caption: Some("10k done".into()),
            },
            at,
        )
        .unwrap()
}

fn vote(hub: &Services, proof: &Proof, verifier: &str, approved: bool, at: DateTime<Utc>) -> Result<String, HubError> {
    hub.verifications
        .record_vote_at(
            &proof.id,
            verifier,
            VoteInput {
                approved,
                comment: None,
            },
            at,
        )
        .map(|view| view.proof.status)
}

fn status_of(hub: &Services, proof: &Proof) -> ProofStatus {
    hub.proofs
        .view_proof(&proof.user_id, &proof.id)
        .unwrap()
        .proof
        .state()
        .unwrap()
}

// ============================================================================
// Threshold and rejection
// ============================================================================

#[test]
fn select_friends_proof_needs_every_viewer() {
    let hub = hub();
    add_users(&hub, &["owner", "v1", "v2", "v3"]);
    for v in ["v1", "v2", "v3"] {
        befriend(&hub, "owner", v);
    }
    let goal = create_goal(&hub, "owner", GoalPrivacy::SelectFriends, &["v1", "v2", "v3"]);
    let proof = submit(&hub, &goal, false, t0());
    assert_eq!(proof.required_verifications, 3);

    assert_eq!(vote(&hub, &proof, "v1", true, t0()).unwrap(), "pending");
    assert_eq!(vote(&hub, &proof, "v2", true, t0()).unwrap(), "pending");
    assert_eq!(vote(&hub, &proof, "v3", true, t0()).unwrap(), "approved");
}

#[test]
fn friends_scenario_both_approve_completes_milestone() {
    let hub = hub();
    add_users(&hub, &["owner", "f1", "f2"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "f2", "owner");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, true, t0());
    assert_eq!(proof.required_verifications, 2);

    assert_eq!(vote(&hub, &proof, "f1", true, t0()).unwrap(), "pending");
    assert_eq!(vote(&hub, &proof, "f2", true, t0() + Duration::hours(1)).unwrap(), "approved");

    let milestone = &hub
        .goals
        .get_goal_on("owner", &goal.goal.id, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap())
        .unwrap()
        .milestones[0];
    assert!(milestone.is_completed());
    assert!(!milestone.is_failed());
    assert_eq!(milestone.progress, 100);
    assert!(milestone.completed_at.is_some());
}

#[test]
fn friends_scenario_single_rejection_wins() {
    let hub = hub();
    add_users(&hub, &["owner", "f1", "f2"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "owner", "f2");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, true, t0());

    assert_eq!(vote(&hub, &proof, "f1", true, t0()).unwrap(), "pending");
    assert_eq!(vote(&hub, &proof, "f2", false, t0()).unwrap(), "rejected");

    // The earlier approval stays on record
    let view = hub.proofs.view_proof("owner", &proof.id).unwrap();
    assert_eq!(view.verifications.len(), 2);
    assert_eq!(view.approval_count(), 1);

    let milestone = &hub.goals.get_goal_on("owner", &goal.goal.id, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()).unwrap().milestones[0];
    assert!(!milestone.is_completed());
}

#[test]
fn rejection_after_approvals_is_final() {
    let hub = hub();
    add_users(&hub, &["owner", "f1", "f2", "f3", "late"]);
    for f in ["f1", "f2", "f3"] {
        befriend(&hub, "owner", f);
    }
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());

    vote(&hub, &proof, "f1", true, t0()).unwrap();
    vote(&hub, &proof, "f2", true, t0()).unwrap();
    assert_eq!(vote(&hub, &proof, "f3", false, t0()).unwrap(), "rejected");

    // A friend added later is authorized but the proof is closed
    befriend(&hub, "late", "owner");
    assert!(matches!(
        vote(&hub, &proof, "late", true, t0()),
        Err(HubError::AlreadyResolved(_))
    ));
    assert_eq!(status_of(&hub, &proof), ProofStatus::Rejected);
}

// ============================================================================
// Authorization
// ============================================================================

#[test]
fn nobody_verifies_their_own_proof() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");

    for privacy in GoalPrivacy::ALL {
        let goal = create_goal(&hub, "owner", *privacy, &["f1"]);
        let proof = submit(&hub, &goal, false, t0());

        match vote(&hub, &proof, "owner", true, t0()) {
            Err(HubError::Forbidden(msg)) => assert!(msg.contains("own proof"), "{}", msg),
            other => panic!("{:?}: expected Forbidden, got {:?}", privacy, other),
        }
    }
}

#[test]
fn private_goal_proofs_cannot_be_verified_by_friends() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Private, &[]);
    let proof = submit(&hub, &goal, false, t0());

    assert_eq!(proof.required_verifications, 1);
    assert!(matches!(vote(&hub, &proof, "f1", true, t0()), Err(HubError::Forbidden(_))));
    assert!(hub.proofs.list_visible_proofs_at("f1", t0()).unwrap().is_empty());
}

#[test]
fn select_friends_audience_is_exact() {
    let hub = hub();
    add_users(&hub, &["owner", "v1", "v2"]);
    befriend(&hub, "owner", "v1");
    befriend(&hub, "owner", "v2");

    let shared_with_v1 = create_goal(&hub, "owner", GoalPrivacy::SelectFriends, &["v1"]);
    // v2 is an allowed viewer somewhere else, which must not leak the first goal
    let _shared_with_v2 = create_goal(&hub, "owner", GoalPrivacy::SelectFriends, &["v2"]);
    let proof = submit(&hub, &shared_with_v1, false, t0());

    let seen_by_v1 = hub.proofs.list_visible_proofs_at("v1", t0()).unwrap();
    assert_eq!(seen_by_v1.len(), 1);
    assert_eq!(seen_by_v1[0].proof.id, proof.id);
    assert!(seen_by_v1[0].can_verify);

    assert!(hub.proofs.list_visible_proofs_at("v2", t0()).unwrap().is_empty());
    assert!(matches!(vote(&hub, &proof, "v2", true, t0()), Err(HubError::Forbidden(_))));
    assert_eq!(vote(&hub, &proof, "v1", true, t0()).unwrap(), "approved");
}

#[test]
fn threshold_is_frozen_at_submission() {
    let hub = hub();
    add_users(&hub, &["owner", "v1", "v2", "v3"]);
    for v in ["v1", "v2", "v3"] {
        befriend(&hub, "owner", v);
    }
    let goal = create_goal(&hub, "owner", GoalPrivacy::SelectFriends, &["v1", "v2"]);
    let proof = submit(&hub, &goal, false, t0());
    assert_eq!(proof.required_verifications, 2);

    hub.goals.remove_viewer("owner", &goal.goal.id, "v2").unwrap();
    hub.goals.add_viewer("owner", &goal.goal.id, "v3").unwrap();

    assert_eq!(vote(&hub, &proof, "v1", true, t0()).unwrap(), "pending");
    // v2 lost the right to vote, v3 gained it
    assert!(matches!(vote(&hub, &proof, "v2", true, t0()), Err(HubError::Forbidden(_))));
    assert_eq!(vote(&hub, &proof, "v3", true, t0()).unwrap(), "approved");
}

#[test]
fn milestone_must_belong_to_goal() {
    let hub = hub();
    add_users(&hub, &["owner"]);
    let a = create_goal(&hub, "owner", GoalPrivacy::Private, &[]);
    let b = create_goal(&hub, "owner", GoalPrivacy::Private, &[]);

    let result = hub.proofs.submit_at(
        "owner",
        SubmitProofInput {
            goal_id: a.goal.id.clone(),
            milestone_id: Some(b.milestones[0].id.clone()),
            image_url: "http://localhost:9000/goal-proofs/x.png".into(),
            caption: None,
        },
        t0(),
    );
    assert!(matches!(result, Err(HubError::InvalidReference(_))));
}

#[test]
fn approval_after_due_date_completes_swept_milestone() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = hub
        .goals
        .create_goal_at(
            "owner",
            CreateGoalInput {
                title: "Read more".into(),
                description: None,
                start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                deadline: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                privacy: GoalPrivacy::Friends,
                plan: MilestonePlan::Flexible {
                    interval_days: 1,
                    initial_milestones: vec![MilestoneDraft {
                        title: "Finish chapter one".into(),
                        description: None,
                        due_date: NaiveDate::from_ymd_opt(2024, 3, 2),
                    }],
                },
                image_url: None,
                user_story: None,
                selected_friend_ids: Vec::new(),
            },
            t0(),
        )
        .unwrap();
    let proof = submit(&hub, &goal, true, t0());

    // A read after the due date marks the still-open milestone failed
    let swept = hub
        .goals
        .get_goal_on("owner", &goal.goal.id, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap())
        .unwrap();
    assert!(swept.milestones[0].is_failed());

    assert_eq!(vote(&hub, &proof, "f1", true, t0() + Duration::hours(30)).unwrap(), "approved");

    let milestone = &hub
        .goals
        .get_goal_on("owner", &goal.goal.id, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap())
        .unwrap()
        .milestones[0];
    assert!(milestone.is_completed());
    assert!(!milestone.is_failed());
    assert_eq!(milestone.progress, 100);
    assert!(milestone.completed_at.is_some());
}

// ============================================================================
// Expiry
// ============================================================================

#[test]
fn vote_one_second_late_expires_the_proof() {
    let hub = hub();
    add_users(&hub, &["owner", "f1", "f2"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "owner", "f2");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());
    let deadline = t0() + Duration::hours(72);
    assert_eq!(proof.verification_expires_at, "2024-03-04T10:00:00Z");

    // Just inside the window
    assert_eq!(vote(&hub, &proof, "f1", true, deadline - Duration::seconds(1)).unwrap(), "pending");

    // No sweep has run; the vote itself notices
    assert!(matches!(
        vote(&hub, &proof, "f2", true, deadline + Duration::seconds(1)),
        Err(HubError::ProofExpired(_))
    ));
    assert_eq!(status_of(&hub, &proof), ProofStatus::Rejected);

    let expired_notices: Vec<_> = hub
        .notifications
        .list("owner", None)
        .unwrap()
        .into_iter()
        .filter(|n| n.notification_type == NotificationKind::ProofExpired.as_str())
        .collect();
    assert_eq!(expired_notices.len(), 1);

    // The sweep has nothing left to do
    assert!(hub.proofs.expire_overdue_at(deadline + Duration::hours(1)).unwrap().is_empty());
}

#[test]
fn vote_at_the_deadline_still_counts() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());

    assert_eq!(vote(&hub, &proof, "f1", true, t0() + Duration::hours(72)).unwrap(), "approved");
}

#[test]
fn listing_sweeps_overdue_proofs() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());

    let later = t0() + Duration::hours(80);
    assert!(hub.proofs.list_visible_proofs_at("f1", later).unwrap().is_empty());
    assert_eq!(status_of(&hub, &proof), ProofStatus::Rejected);
}

// ============================================================================
// Goal completion
// ============================================================================

#[test]
fn approved_completion_proof_verifies_the_goal() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);

    let completed = hub.goals.complete_goal_at("owner", &goal.goal.id, t0()).unwrap();
    assert_eq!(completed.lifecycle().unwrap(), GoalStatus::CompletedPending);

    let proof = submit(&hub, &goal, false, t0());
    assert_eq!(vote(&hub, &proof, "f1", true, t0()).unwrap(), "approved");

    let details = hub.goals.get_goal_on("owner", &goal.goal.id, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()).unwrap();
    assert_eq!(details.goal.lifecycle().unwrap(), GoalStatus::CompletedVerified);

    let kinds: Vec<String> = hub
        .notifications
        .list("owner", None)
        .unwrap()
        .into_iter()
        .map(|n| n.notification_type)
        .collect();
    assert!(kinds.contains(&NotificationKind::GoalCompleted.as_str().to_string()));
    assert!(kinds.contains(&NotificationKind::ProofVerified.as_str().to_string()));
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn submission_and_votes_notify_the_right_people() {
    let hub = hub();
    add_users(&hub, &["owner", "f1", "f2", "outsider"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "owner", "f2");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());

    for f in ["f1", "f2"] {
        let inbox = hub.notifications.list(f, None).unwrap();
        assert!(inbox
            .iter()
            .any(|n| n.notification_type == "proof_submission" && n.proof_id.as_deref() == Some(proof.id.as_str())));
    }
    assert_eq!(hub.notifications.unread_count("outsider").unwrap(), 0);

    vote(&hub, &proof, "f1", false, t0()).unwrap();
    let verdicts: Vec<_> = hub
        .notifications
        .list("owner", None)
        .unwrap()
        .into_iter()
        .filter(|n| n.notification_type == "proof_verified")
        .collect();
    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].actor_id.as_deref(), Some("f1"));
    assert!(verdicts[0].message.contains("rejected"));
}

#[test]
fn failed_notification_does_not_touch_the_proof() {
    let hub = hub();
    add_users(&hub, &["owner", "f1"]);
    befriend(&hub, "owner", "f1");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, t0());

    let written = hub.notifications.notify(
        &NotificationEvent::ProofVerified {
            goal_title: goal.goal.title.clone(),
            approved: true,
        },
        NotificationLinks {
            actor_id: Some("f1"),
            goal_id: Some(&goal.goal.id),
            proof_id: Some(&proof.id),
        },
        &["no-such-user".to_string()],
    );

    assert_eq!(written, 0);
    assert_eq!(status_of(&hub, &proof), ProofStatus::Pending);
    assert_eq!(vote(&hub, &proof, "f1", true, t0()).unwrap(), "approved");
}

// ============================================================================
// Races (file-backed database, several pooled connections)
// ============================================================================

fn file_hub(dir: &tempfile::TempDir) -> Services {
    let db = HubDb::open_path(&dir.path().join("hub.db"), 4, 5_000).unwrap();
    Services::new(Arc::new(db))
}

#[test]
fn concurrent_duplicate_votes_succeed_once() {
    let dir = tempfile::tempdir().unwrap();
    let hub = file_hub(&dir);
    add_users(&hub, &["owner", "f1", "f2"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "owner", "f2");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, false, Utc::now());

    let barrier = Barrier::new(2);
    let results: Vec<Result<String, HubError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (hub, proof, barrier) = (&hub, &proof, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    vote(hub, proof, "f1", true, Utc::now())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(HubError::DuplicateVote(_))))
        .count();
    assert_eq!((ok, duplicates), (1, 1), "{:?}", results);

    let view = hub.proofs.view_proof("owner", &proof.id).unwrap();
    assert_eq!(view.verifications.len(), 1);
    assert_eq!(view.proof.status, "pending");
}

#[test]
fn concurrent_threshold_votes_finalize_once() {
    let dir = tempfile::tempdir().unwrap();
    let hub = file_hub(&dir);
    add_users(&hub, &["owner", "f1", "f2"]);
    befriend(&hub, "owner", "f1");
    befriend(&hub, "owner", "f2");
    let goal = create_goal(&hub, "owner", GoalPrivacy::Friends, &[]);
    let proof = submit(&hub, &goal, true, Utc::now());

    let mut events = hub.events.subscribe();
    let barrier = Barrier::new(2);
    let results: Vec<Result<String, HubError>> = std::thread::scope(|s| {
        let handles: Vec<_> = ["f1", "f2"]
            .into_iter()
            .map(|verifier| {
                let (hub, proof, barrier) = (&hub, &proof, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    vote(hub, proof, verifier, true, Utc::now())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    assert_eq!(status_of(&hub, &proof), ProofStatus::Approved);

    let mut approvals = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, HubEvent::ProofApproved { .. }) {
            approvals += 1;
        }
    }
    assert_eq!(approvals, 1);

    let milestone = &hub.goals.get_goal("owner", &goal.goal.id).unwrap().milestones[0];
    assert_eq!(milestone.progress, 100);
}
