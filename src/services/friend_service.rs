//! Friend graph service
//!
//! Request/accept workflow on top of the `friends` table. The verification
//! engine only ever reads accepted links through the privacy resolver.

use std::sync::Arc;

use tracing::info;

use crate::db::{friends, users, FriendLink, FriendStatus, HubDb};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};
use crate::services::notification_service::{
    NotificationEvent, NotificationLinks, NotificationService,
};

pub struct FriendService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationService>,
}

impl FriendService {
    pub fn new(db: Arc<HubDb>, events: Arc<EventBus>, notifier: Arc<NotificationService>) -> Self {
        Self { db, events, notifier }
    }

    /// Send a friend request. Fails if any non-rejected link already exists
    /// between the two users, in either direction.
    pub fn send_request(&self, requester_id: &str, addressee_id: &str) -> Result<FriendLink, HubError> {
        if requester_id == addressee_id {
            return Err(HubError::InvalidInput("you cannot befriend yourself".into()));
        }

        let link = self.db.write_txn(|conn| {
            if users::get_user(conn, addressee_id)?.is_none() {
                return Err(HubError::NotFound(format!("user '{}'", addressee_id)));
            }
            if let Some(existing) = friends::find_live_link_between(conn, requester_id, addressee_id)? {
                return Err(HubError::InvalidInput(format!(
                    "a friend link already exists ({})",
                    existing.status
                )));
            }
            friends::create_link(conn, requester_id, addressee_id, FriendStatus::Pending)
        })?;

        info!(link = %link.id, "Friend request sent");
        self.emit_link(&link);
        self.notifier.notify(
            &NotificationEvent::FriendRequest,
            NotificationLinks {
                actor_id: Some(requester_id),
                ..Default::default()
            },
            &[addressee_id.to_string()],
        );
        Ok(link)
    }

    /// Accept or reject a pending request. Only the addressee may answer.
    pub fn respond(&self, link_id: &str, responder_id: &str, accept: bool) -> Result<FriendLink, HubError> {
        let to = if accept {
            FriendStatus::Accepted
        } else {
            FriendStatus::Rejected
        };

        let link = self.db.write_txn(|conn| {
            let link = friends::get_link(conn, link_id)?
                .ok_or_else(|| HubError::NotFound(format!("friend request '{}'", link_id)))?;
            if link.addressee_id != responder_id {
                return Err(HubError::Forbidden("only the addressee can answer a friend request".into()));
            }
            if !friends::transition_link(conn, link_id, FriendStatus::Pending, to)? {
                return Err(HubError::AlreadyResolved(format!(
                    "friend request '{}' is already {}",
                    link_id, link.status
                )));
            }
            friends::get_link(conn, link_id)?
                .ok_or_else(|| HubError::Internal("friend link vanished".into()))
        })?;

        info!(link = %link.id, status = %link.status, "Friend request answered");
        self.emit_link(&link);
        if accept {
            self.notifier.notify(
                &NotificationEvent::FriendRequestAccepted,
                NotificationLinks {
                    actor_id: Some(responder_id),
                    ..Default::default()
                },
                &[link.requester_id.clone()],
            );
        }
        Ok(link)
    }

    /// Block a link. Either side may block.
    pub fn block(&self, link_id: &str, actor_id: &str) -> Result<FriendLink, HubError> {
        let link = self.db.write_txn(|conn| {
            let link = friends::get_link(conn, link_id)?
                .ok_or_else(|| HubError::NotFound(format!("friend link '{}'", link_id)))?;
            if link.requester_id != actor_id && link.addressee_id != actor_id {
                return Err(HubError::NotFound(format!("friend link '{}'", link_id)));
            }
            friends::set_link_status(conn, link_id, FriendStatus::Blocked)?;
            friends::get_link(conn, link_id)?
                .ok_or_else(|| HubError::Internal("friend link vanished".into()))
        })?;

        info!(link = %link.id, "Friend link blocked");
        self.emit_link(&link);
        Ok(link)
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<String>, HubError> {
        self.db.with_conn(|conn| friends::accepted_friend_ids(conn, user_id))
    }

    pub fn incoming_requests(&self, user_id: &str) -> Result<Vec<FriendLink>, HubError> {
        self.db.with_conn(|conn| friends::incoming_requests(conn, user_id))
    }

    pub fn are_friends(&self, a: &str, b: &str) -> Result<bool, HubError> {
        self.db.with_conn(|conn| friends::are_friends(conn, a, b))
    }

    fn emit_link(&self, link: &FriendLink) {
        self.events.emit(HubEvent::FriendLinkChanged {
            link_id: link.id.clone(),
            status: link.status.clone(),
        });
    }
}
