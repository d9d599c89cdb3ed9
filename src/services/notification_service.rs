//! Notification fan-out
//!
//! Writes one notification row per recipient. The caller decides who the
//! recipients are; nothing here checks permissions.
//!
//! Delivery is best-effort: each row is written in its own transaction,
//! after the transaction that caused it has committed. A failed write is
//! logged and skipped, never returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::notifications::{self, NotificationDraft};
use crate::db::{users, HubDb, Notification, NotificationKind, NotificationState};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};

/// What happened, with whatever the message template needs
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    FriendRequest,
    FriendRequestAccepted,
    ProofSubmitted { goal_title: String },
    ProofVerified { goal_title: String, approved: bool },
    ProofExpired { goal_title: String },
    GoalCompletionRequest { goal_title: String },
    GoalCompleted { goal_title: String },
    IntervalChangeRequested { goal_title: String, from: i32, to: i32 },
    IntervalChangeResolved { goal_title: String, approved: bool },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationEvent::FriendRequest => NotificationKind::FriendRequest,
            NotificationEvent::FriendRequestAccepted => NotificationKind::FriendRequestAccepted,
            NotificationEvent::ProofSubmitted { .. } => NotificationKind::ProofSubmission,
            NotificationEvent::ProofVerified { .. } => NotificationKind::ProofVerified,
            NotificationEvent::ProofExpired { .. } => NotificationKind::ProofExpired,
            NotificationEvent::GoalCompletionRequest { .. } => NotificationKind::GoalCompletionRequest,
            NotificationEvent::GoalCompleted { .. } => NotificationKind::GoalCompleted,
            NotificationEvent::IntervalChangeRequested { .. }
            | NotificationEvent::IntervalChangeResolved { .. } => NotificationKind::IntervalChangeRequest,
        }
    }

    /// Human readable message with the actor's display name filled in
    pub fn message(&self, actor: &str) -> String {
        match self {
            NotificationEvent::FriendRequest => format!("{} sent you a friend request", actor),
            NotificationEvent::FriendRequestAccepted => format!("{} accepted your friend request", actor),
            NotificationEvent::ProofSubmitted { goal_title } => {
                format!("{} submitted proof for '{}' and needs your verification", actor, goal_title)
            }
            NotificationEvent::ProofVerified { goal_title, approved } => format!(
                "{} {} your proof for '{}'",
                actor,
                if *approved { "approved" } else { "rejected" },
                goal_title
            ),
            NotificationEvent::ProofExpired { goal_title } => format!(
                "Your proof for '{}' expired before it was verified",
                goal_title
            ),
            NotificationEvent::GoalCompletionRequest { goal_title } => {
                format!("{} completed '{}' and asks you to confirm it", actor, goal_title)
            }
            NotificationEvent::GoalCompleted { goal_title } => {
                format!("Your goal '{}' has been verified as completed", goal_title)
            }
            NotificationEvent::IntervalChangeRequested { goal_title, from, to } => format!(
                "{} requested to change milestone interval for '{}' from {} to {} days",
                actor, goal_title, from, to
            ),
            NotificationEvent::IntervalChangeResolved { goal_title, approved } => format!(
                "{} {} your interval change request for '{}'",
                actor,
                if *approved { "approved" } else { "rejected" },
                goal_title
            ),
        }
    }
}

/// Optional links carried by a notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationLinks<'a> {
    pub actor_id: Option<&'a str>,
    pub goal_id: Option<&'a str>,
    pub proof_id: Option<&'a str>,
}

pub struct NotificationService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
}

impl NotificationService {
    pub fn new(db: Arc<HubDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Fan `event` out to `recipients`. Returns how many rows were written.
    pub fn notify(
        &self,
        event: &NotificationEvent,
        links: NotificationLinks<'_>,
        recipients: &[String],
    ) -> usize {
        self.notify_at(event, links, recipients, Utc::now())
    }

    pub fn notify_at(
        &self,
        event: &NotificationEvent,
        links: NotificationLinks<'_>,
        recipients: &[String],
        now: DateTime<Utc>,
    ) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let message = match self.db.with_conn(|conn| users::display_name(conn, links.actor_id)) {
            Ok(actor) => event.message(&actor),
            Err(e) => {
                warn!(error = %e, "Could not resolve actor name, using fallback");
                event.message(users::UNKNOWN_ACTOR)
            }
        };
        let kind = event.kind();

        let mut delivered = 0;
        for recipient in recipients {
            let draft = NotificationDraft {
                recipient_id: recipient,
                actor_id: links.actor_id,
                kind,
                goal_id: links.goal_id,
                proof_id: links.proof_id,
                message: &message,
            };

            match self.db.write_txn(|conn| notifications::insert(conn, &draft, now)) {
                Ok(id) => {
                    delivered += 1;
                    self.events.emit(HubEvent::NotificationCreated {
                        notification_id: id,
                        recipient_id: recipient.clone(),
                        kind: kind.as_str().to_string(),
                    });
                }
                Err(e) => {
                    warn!(recipient = %recipient, kind = %kind, error = %e, "Failed to write notification");
                }
            }
        }

        debug!(kind = %kind, delivered, total = recipients.len(), "Notification fan-out done");
        delivered
    }

    // ========================================================================
    // Inbox
    // ========================================================================

    pub fn list(
        &self,
        recipient_id: &str,
        status: Option<NotificationState>,
    ) -> Result<Vec<Notification>, HubError> {
        self.db
            .with_conn(|conn| notifications::list_for_recipient(conn, recipient_id, status))
    }

    pub fn set_status(
        &self,
        recipient_id: &str,
        notification_id: &str,
        status: NotificationState,
    ) -> Result<(), HubError> {
        self.db.write_txn(|conn| {
            notifications::set_status(conn, notification_id, recipient_id, status)
        })
    }

    pub fn mark_all_read(&self, recipient_id: &str) -> Result<usize, HubError> {
        self.db
            .write_txn(|conn| notifications::mark_all_read(conn, recipient_id))
    }

    pub fn unread_count(&self, recipient_id: &str) -> Result<i64, HubError> {
        self.db
            .with_conn(|conn| notifications::unread_count(conn, recipient_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<HubDb>, NotificationService) {
        let db = Arc::new(HubDb::open_in_memory().unwrap());
        db.with_conn(|conn| {
            users::create_user(conn, "alice", "alice", "alice@example.com")?;
            users::create_user(conn, "bob", "bob", "bob@example.com")?;
            Ok(())
        })
        .unwrap();
        let service = NotificationService::new(db.clone(), Arc::new(EventBus::new()));
        (db, service)
    }

    #[test]
    fn test_message_templates() {
        let event = NotificationEvent::ProofVerified {
            goal_title: "Run 5k".into(),
            approved: false,
        };
        assert_eq!(event.kind(), NotificationKind::ProofVerified);
        assert_eq!(event.message("bob"), "bob rejected your proof for 'Run 5k'");

        let event = NotificationEvent::IntervalChangeRequested {
            goal_title: "Swim".into(),
            from: 7,
            to: 14,
        };
        assert_eq!(
            event.message("alice"),
            "alice requested to change milestone interval for 'Swim' from 7 to 14 days"
        );
    }

    #[test]
    fn test_one_row_per_recipient_with_actor_name() {
        let (_db, service) = setup();

        let written = service.notify(
            &NotificationEvent::FriendRequest,
            NotificationLinks {
                actor_id: Some("alice"),
                ..Default::default()
            },
            &["bob".to_string()],
        );
        assert_eq!(written, 1);

        let inbox = service.list("bob", None).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message, "alice sent you a friend request");
        assert_eq!(inbox[0].notification_type, "friend_request");
        assert_eq!(service.unread_count("bob").unwrap(), 1);
    }

    #[test]
    fn test_bad_recipient_is_skipped_not_fatal() {
        let (_db, service) = setup();

        let written = service.notify(
            &NotificationEvent::FriendRequestAccepted,
            NotificationLinks {
                actor_id: Some("alice"),
                ..Default::default()
            },
            &["ghost".to_string(), "bob".to_string()],
        );

        assert_eq!(written, 1);
        assert_eq!(service.unread_count("bob").unwrap(), 1);
    }

    #[test]
    fn test_set_status_on_foreign_notification_is_not_found() {
        let (_db, service) = setup();
        service.notify(
            &NotificationEvent::FriendRequest,
            NotificationLinks::default(),
            &["bob".to_string()],
        );
        let id = service.list("bob", None).unwrap()[0].id.clone();

        assert!(matches!(
            service.set_status("alice", &id, NotificationState::Read),
            Err(HubError::NotFound(_))
        ));
        service.set_status("bob", &id, NotificationState::Read).unwrap();
        assert_eq!(service.unread_count("bob").unwrap(), 0);
        assert_eq!(service.mark_all_read("bob").unwrap(), 0);
    }
}
