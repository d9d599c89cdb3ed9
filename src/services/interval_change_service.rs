//! Interval change requests
//!
//! An owner who wants a different milestone cadence on a shared goal has to
//! ask the goal's audience. Any one authorized verifier resolves it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{friends, goals, interval_changes, viewers};
use crate::db::{Goal, GoalPrivacy, HubDb, IntervalChangeRequest, RequestStatus};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};
use crate::services::notification_service::{
    NotificationEvent, NotificationLinks, NotificationService,
};
use crate::services::privacy;

pub struct IntervalChangeService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationService>,
}

impl IntervalChangeService {
    pub fn new(db: Arc<HubDb>, events: Arc<EventBus>, notifier: Arc<NotificationService>) -> Self {
        Self { db, events, notifier }
    }

    pub fn request(
        &self,
        owner_id: &str,
        goal_id: &str,
        requested_interval: i32,
    ) -> Result<IntervalChangeRequest, HubError> {
        self.request_at(owner_id, goal_id, requested_interval, Utc::now())
    }

    pub fn request_at(
        &self,
        owner_id: &str,
        goal_id: &str,
        requested_interval: i32,
        now: DateTime<Utc>,
    ) -> Result<IntervalChangeRequest, HubError> {
        if requested_interval <= 0 {
            return Err(HubError::InvalidInput("requested interval must be positive".into()));
        }

        let (request, goal, audience) = self.db.write_txn(|conn| {
            let goal = goals::get_owned_goal(conn, goal_id, owner_id)?;
            if goal.privacy()? == GoalPrivacy::Private {
                return Err(HubError::InvalidInput(
                    "private goals have nobody to approve an interval change".into(),
                ));
            }
            if interval_changes::has_pending_for_goal(conn, goal_id)? {
                return Err(HubError::InvalidInput(
                    "an interval change request is already pending for this goal".into(),
                ));
            }

            let current = goal.milestone_interval_days.unwrap_or(0);
            let request =
                interval_changes::insert_request(conn, goal_id, owner_id, current, requested_interval, now)?;
            let audience = privacy::eligible_audience(conn, &goal)?;
            Ok((request, goal, audience))
        })?;

        info!(request = %request.id, goal = %goal.id, "Interval change requested");
        self.events.emit(HubEvent::IntervalChangeRequested {
            request_id: request.id.clone(),
            goal_id: goal.id.clone(),
        });
        self.notifier.notify_at(
            &NotificationEvent::IntervalChangeRequested {
                goal_title: goal.title.clone(),
                from: request.current_interval,
                to: request.requested_interval,
            },
            NotificationLinks {
                actor_id: Some(owner_id),
                goal_id: Some(&goal.id),
                proof_id: None,
            },
            &audience,
            now,
        );

        Ok(request)
    }

    /// Pending requests on goals `verifier_id` may verify
    pub fn list_pending_for(&self, verifier_id: &str) -> Result<Vec<IntervalChangeRequest>, HubError> {
        self.db.with_conn(|conn| {
            let friend_ids = friends::accepted_friend_ids(conn, verifier_id)?;
            let mut goal_ids =
                goals::goal_ids_for_owners_with_privacy(conn, &friend_ids, GoalPrivacy::Friends.as_str())?;
            goal_ids.extend(viewers::goal_ids_verifiable_by(conn, verifier_id)?);
            goal_ids.sort();
            goal_ids.dedup();

            let mut goal_cache: HashMap<String, Goal> = HashMap::new();
            let mut visible = Vec::new();
            for request in interval_changes::list_pending_on_goals(conn, &goal_ids)? {
                if !goal_cache.contains_key(&request.goal_id) {
                    let Some(goal) = goals::get_goal(conn, &request.goal_id)? else {
                        continue;
                    };
                    goal_cache.insert(goal.id.clone(), goal);
                }
                let Some(goal) = goal_cache.get(&request.goal_id) else {
                    continue;
                };
                if privacy::can_verify(conn, goal, verifier_id, &request.requester_id)? {
                    visible.push(request);
                }
            }
            Ok(visible)
        })
    }

    pub fn resolve(
        &self,
        request_id: &str,
        verifier_id: &str,
        approved: bool,
    ) -> Result<IntervalChangeRequest, HubError> {
        self.resolve_at(request_id, verifier_id, approved, Utc::now())
    }

    /// Approve or reject a pending request. Approval updates the goal's
    /// interval in the same transaction.
    pub fn resolve_at(
        &self,
        request_id: &str,
        verifier_id: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<IntervalChangeRequest, HubError> {
        let (request, goal) = self.db.write_txn(|conn| {
            let request = interval_changes::get_request(conn, request_id)?
                .ok_or_else(|| HubError::NotFound(format!("interval change request '{}'", request_id)))?;
            if request.state()? != RequestStatus::Pending {
                return Err(HubError::AlreadyResolved(format!(
                    "interval change request '{}' is already {}",
                    request_id, request.status
                )));
            }

            let goal = goals::get_goal(conn, &request.goal_id)?
                .ok_or_else(|| HubError::NotFound(format!("goal '{}'", request.goal_id)))?;
            privacy::authorize_verifier(conn, &goal, verifier_id, &request.requester_id)?;

            let status = if approved {
                RequestStatus::Approved
            } else {
                RequestStatus::Rejected
            };
            if !interval_changes::resolve(conn, request_id, status, verifier_id, now)? {
                return Err(HubError::AlreadyResolved(format!(
                    "interval change request '{}' was resolved concurrently",
                    request_id
                )));
            }
            if approved {
                goals::set_interval(conn, &goal.id, request.requested_interval)?;
            }

            let request = interval_changes::get_request(conn, request_id)?
                .ok_or_else(|| HubError::Internal("interval change request vanished".into()))?;
            Ok((request, goal))
        })?;

        info!(request = %request.id, approved, "Interval change resolved");
        self.events.emit(HubEvent::IntervalChangeResolved {
            request_id: request.id.clone(),
            approved,
        });
        self.notifier.notify_at(
            &NotificationEvent::IntervalChangeResolved {
                goal_title: goal.title.clone(),
                approved,
            },
            NotificationLinks {
                actor_id: Some(verifier_id),
                goal_id: Some(&goal.id),
                proof_id: None,
            },
            &[request.requester_id.clone()],
            now,
        );

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{GoalStatus, MilestoneType, NewGoal};
    use crate::db::{users, FriendStatus};

    fn setup(privacy: GoalPrivacy) -> (Arc<HubDb>, Arc<NotificationService>, IntervalChangeService) {
        let db = Arc::new(HubDb::open_in_memory().unwrap());
        db.with_conn(|conn| {
            for name in ["owner", "f1", "stranger"] {
                users::create_user(conn, name, name, &format!("{}@example.com", name))?;
            }
            friends::create_link(conn, "owner", "f1", FriendStatus::Accepted)?;
            goals::insert_goal(
                conn,
                &NewGoal {
                    id: "g1",
                    user_id: "owner",
                    title: "Stretch",
                    description: None,
                    milestone_type: MilestoneType::Flexible.as_str(),
                    milestone_interval_days: Some(7),
                    milestone_quantity: None,
                    milestone_unit: None,
                    start_date: "2024-01-01",
                    deadline: "2024-06-01",
                    privacy_setting: privacy.as_str(),
                    image_url: None,
                    user_story: None,
                    status: GoalStatus::Active.as_str(),
                    created_at: "2024-01-01T00:00:00Z",
                },
            )
        })
        .unwrap();
        let events = Arc::new(EventBus::new());
        let notifier = Arc::new(NotificationService::new(db.clone(), events.clone()));
        let service = IntervalChangeService::new(db.clone(), events, notifier.clone());
        (db, notifier, service)
    }

    #[test]
    fn test_request_and_approve() {
        let (db, notifier, service) = setup(GoalPrivacy::Friends);

        let request = service.request("owner", "g1", 14).unwrap();
        assert_eq!(request.current_interval, 7);
        assert_eq!(notifier.unread_count("f1").unwrap(), 1);
        assert!(matches!(service.request("owner", "g1", 3), Err(HubError::InvalidInput(_))));

        assert_eq!(service.list_pending_for("f1").unwrap().len(), 1);
        assert!(service.list_pending_for("stranger").unwrap().is_empty());

        assert!(matches!(
            service.resolve(&request.id, "stranger", true),
            Err(HubError::Forbidden(_))
        ));
        assert!(matches!(
            service.resolve(&request.id, "owner", true),
            Err(HubError::Forbidden(_))
        ));

        let resolved = service.resolve(&request.id, "f1", true).unwrap();
        assert_eq!(resolved.state().unwrap(), RequestStatus::Approved);
        let goal = db.with_conn(|conn| goals::get_goal(conn, "g1")).unwrap().unwrap();
        assert_eq!(goal.milestone_interval_days, Some(14));
        assert_eq!(notifier.unread_count("owner").unwrap(), 1);

        assert!(matches!(
            service.resolve(&request.id, "f1", false),
            Err(HubError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_rejection_keeps_interval() {
        let (db, _notifier, service) = setup(GoalPrivacy::Friends);
        let request = service.request("owner", "g1", 30).unwrap();
        service.resolve(&request.id, "f1", false).unwrap();

        let goal = db.with_conn(|conn| goals::get_goal(conn, "g1")).unwrap().unwrap();
        assert_eq!(goal.milestone_interval_days, Some(7));
    }

    #[test]
    fn test_request_preconditions() {
        let (_db, _notifier, service) = setup(GoalPrivacy::Private);
        assert!(matches!(service.request("owner", "g1", 14), Err(HubError::InvalidInput(_))));
        assert!(matches!(service.request("f1", "g1", 14), Err(HubError::NotFound(_))));
        assert!(matches!(service.request("owner", "g1", 0), Err(HubError::InvalidInput(_))));
        assert!(matches!(
            service.resolve("missing", "f1", true),
            Err(HubError::NotFound(_))
        ));
    }
}
