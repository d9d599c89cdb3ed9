//! Goal service
//!
//! Goal creation with milestone generation, viewer management, and the
//! owner-driven lifecycle (complete, give up, archive). Every read of a
//! goal's milestones runs the overdue sweep first.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::goals::GoalChanges;
use crate::db::models::{format_date, format_timestamp, NewGoal, NewMilestone};
use crate::db::{friends, goals, viewers};
use crate::db::{AllowedViewer, Goal, GoalPrivacy, GoalStatus, HubDb, Milestone, MilestoneType};
use crate::error::HubError;
use crate::services::events::{EventBus, HubEvent};
use crate::services::notification_service::{
    NotificationEvent, NotificationLinks, NotificationService,
};
use crate::services::privacy;

/// A milestone the owner lays out up front
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

/// How a goal's milestones are generated
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "milestone_type", rename_all = "snake_case")]
pub enum MilestonePlan {
    /// Milestones given by the owner, one batch
    Flexible {
        interval_days: i32,
        initial_milestones: Vec<MilestoneDraft>,
    },
    /// One milestone every `interval_days` until the deadline
    Defined {
        interval_days: i32,
        quantity: i32,
        unit: String,
    },
}

impl MilestonePlan {
    pub fn milestone_type(&self) -> MilestoneType {
        match self {
            MilestonePlan::Flexible { .. } => MilestoneType::Flexible,
            MilestonePlan::Defined { .. } => MilestoneType::Defined,
        }
    }

    pub fn interval_days(&self) -> i32 {
        match self {
            MilestonePlan::Flexible { interval_days, .. } | MilestonePlan::Defined { interval_days, .. } => {
                *interval_days
            }
        }
    }

    fn validate(&self) -> Result<(), HubError> {
        if self.interval_days() <= 0 {
            return Err(HubError::InvalidInput("milestone interval must be positive".into()));
        }
        match self {
            MilestonePlan::Flexible { initial_milestones, .. } => {
                if initial_milestones.iter().any(|m| m.title.trim().is_empty()) {
                    return Err(HubError::InvalidInput("milestone title is required".into()));
                }
            }
            MilestonePlan::Defined { quantity, unit, .. } => {
                if *quantity <= 0 {
                    return Err(HubError::InvalidInput("milestone quantity must be positive".into()));
                }
                if unit.trim().is_empty() {
                    return Err(HubError::InvalidInput("milestone unit is required".into()));
                }
            }
        }
        Ok(())
    }
}

/// Upper bound on milestones a single goal may be created with
pub const MAX_PLANNED_MILESTONES: usize = 500;

/// A generated milestone, before it gets an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMilestone {
    pub title: String,
    pub description: Option<String>,
    pub is_flexible: bool,
    pub order_index: i32,
    pub due_date: Option<NaiveDate>,
}

/// Expand a plan into milestones.
///
/// Defined plans produce `ceil(days / interval)` milestones, the i-th due
/// `(i + 1) * interval` days after the start. Plans with a non-positive
/// interval or more than [`MAX_PLANNED_MILESTONES`] milestones are rejected.
pub fn plan_milestones(
    plan: &MilestonePlan,
    start: NaiveDate,
    deadline: NaiveDate,
) -> Result<Vec<PlannedMilestone>, HubError> {
    if plan.interval_days() <= 0 {
        return Err(HubError::InvalidInput("milestone interval must be positive".into()));
    }

    let count = match plan {
        MilestonePlan::Flexible { initial_milestones, .. } => initial_milestones.len() as i64,
        MilestonePlan::Defined { interval_days, .. } => {
            let total_days = (deadline - start).num_days().max(0);
            let interval = i64::from(*interval_days);
            (total_days + interval - 1) / interval
        }
    };
    if count > MAX_PLANNED_MILESTONES as i64 {
        return Err(HubError::InvalidInput(format!(
            "a goal may have at most {} milestones, this plan needs {}",
            MAX_PLANNED_MILESTONES, count
        )));
    }

    Ok(match plan {
        MilestonePlan::Flexible { initial_milestones, .. } => initial_milestones
            .iter()
            .enumerate()
            .map(|(i, draft)| PlannedMilestone {
                title: draft.title.clone(),
                description: draft.description.clone(),
                is_flexible: true,
                order_index: i as i32,
                due_date: draft.due_date,
            })
            .collect(),
        MilestonePlan::Defined {
            interval_days,
            quantity,
            unit,
        } => {
            let interval = i64::from(*interval_days);
            (0..count)
                .map(|i| PlannedMilestone {
                    title: format!("Complete {} {}", quantity, unit),
                    description: None,
                    is_flexible: false,
                    order_index: i as i32,
                    due_date: start.checked_add_days(chrono::Days::new(((i + 1) * interval) as u64)),
                })
                .collect()
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGoalInput {
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub deadline: NaiveDate,
    pub privacy: GoalPrivacy,
    #[serde(flatten)]
    pub plan: MilestonePlan,
    pub image_url: Option<String>,
    pub user_story: Option<String>,
    #[serde(default)]
    pub selected_friend_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateGoalInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub privacy: Option<GoalPrivacy>,
    pub image_url: Option<String>,
    /// Replaces the allowed viewer list when present
    pub selected_friend_ids: Option<Vec<String>>,
}

/// Goal with its milestones and allowed viewers
#[derive(Debug, Clone, Serialize)]
pub struct GoalDetails {
    #[serde(flatten)]
    pub goal: Goal,
    pub milestones: Vec<Milestone>,
    pub viewers: Vec<AllowedViewer>,
}

pub struct GoalService {
    db: Arc<HubDb>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationService>,
}

impl GoalService {
    pub fn new(db: Arc<HubDb>, events: Arc<EventBus>, notifier: Arc<NotificationService>) -> Self {
        Self { db, events, notifier }
    }

    // ========================================================================
    // Create / Update
    // ========================================================================

    pub fn create_goal(&self, owner_id: &str, input: CreateGoalInput) -> Result<GoalDetails, HubError> {
        self.create_goal_at(owner_id, input, Utc::now())
    }

    pub fn create_goal_at(
        &self,
        owner_id: &str,
        input: CreateGoalInput,
        now: DateTime<Utc>,
    ) -> Result<GoalDetails, HubError> {
        if input.title.trim().is_empty() {
            return Err(HubError::InvalidInput("goal title is required".into()));
        }
        if input.deadline < input.start_date {
            return Err(HubError::InvalidInput("deadline must not be before the start date".into()));
        }
        input.plan.validate()?;

        let planned = plan_milestones(&input.plan, input.start_date, input.deadline)?;
        let goal_id = Uuid::new_v4().to_string();

        let details = self.db.write_txn(|conn| {
            if input.privacy == GoalPrivacy::SelectFriends {
                ensure_friends(conn, owner_id, &input.selected_friend_ids)?;
            }

            let (quantity, unit) = match &input.plan {
                MilestonePlan::Defined { quantity, unit, .. } => (Some(*quantity), Some(unit.as_str())),
                MilestonePlan::Flexible { .. } => (None, None),
            };
            let start = format_date(input.start_date);
            let deadline = format_date(input.deadline);
            let created_at = format_timestamp(now);

            goals::insert_goal(
                conn,
                &NewGoal {
                    id: &goal_id,
                    user_id: owner_id,
                    title: input.title.trim(),
                    description: input.description.as_deref(),
                    milestone_type: input.plan.milestone_type().as_str(),
                    milestone_interval_days: Some(input.plan.interval_days()),
                    milestone_quantity: quantity,
                    milestone_unit: unit,
                    start_date: &start,
                    deadline: &deadline,
                    privacy_setting: input.privacy.as_str(),
                    image_url: input.image_url.as_deref(),
                    user_story: input.user_story.as_deref(),
                    status: GoalStatus::Active.as_str(),
                    created_at: &created_at,
                },
            )?;

            let ids: Vec<String> = planned.iter().map(|_| Uuid::new_v4().to_string()).collect();
            let due: Vec<Option<String>> = planned.iter().map(|m| m.due_date.map(format_date)).collect();
            let rows: Vec<NewMilestone<'_>> = planned
                .iter()
                .enumerate()
                .map(|(i, m)| NewMilestone {
                    id: &ids[i],
                    goal_id: &goal_id,
                    title: &m.title,
                    description: m.description.as_deref(),
                    is_flexible: if m.is_flexible { 1 } else { 0 },
                    batch_number: 1,
                    order_index: m.order_index,
                    due_date: due[i].as_deref(),
                })
                .collect();
            goals::insert_milestones(conn, &rows)?;

            if input.privacy == GoalPrivacy::SelectFriends {
                viewers::replace_viewers(conn, &goal_id, &input.selected_friend_ids)?;
            }

            load_details(conn, &goal_id)
        })?;

        info!(goal = %goal_id, owner = %owner_id, milestones = details.milestones.len(), "Goal created");
        self.events.emit(HubEvent::GoalCreated {
            goal_id,
            owner_id: owner_id.to_string(),
            milestone_count: details.milestones.len(),
        });

        Ok(details)
    }

    pub fn update_goal(
        &self,
        owner_id: &str,
        goal_id: &str,
        input: UpdateGoalInput,
    ) -> Result<GoalDetails, HubError> {
        if matches!(&input.title, Some(t) if t.trim().is_empty()) {
            return Err(HubError::InvalidInput("goal title cannot be empty".into()));
        }

        self.db.write_txn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;

            if let Some(ids) = &input.selected_friend_ids {
                ensure_friends(conn, owner_id, ids)?;
            }

            goals::update_goal(
                conn,
                goal_id,
                &GoalChanges {
                    title: input.title.as_deref().map(str::trim),
                    description: input.description.as_deref(),
                    privacy_setting: input.privacy.map(|p| p.as_str()),
                    image_url: input.image_url.as_deref(),
                },
            )?;

            if let Some(ids) = &input.selected_friend_ids {
                viewers::replace_viewers(conn, goal_id, ids)?;
            }

            load_details(conn, goal_id)
        })
    }

    // ========================================================================
    // Reads (with milestone sweep)
    // ========================================================================

    pub fn get_goal(&self, owner_id: &str, goal_id: &str) -> Result<GoalDetails, HubError> {
        self.get_goal_on(owner_id, goal_id, Utc::now().date_naive())
    }

    pub fn get_goal_on(&self, owner_id: &str, goal_id: &str, today: NaiveDate) -> Result<GoalDetails, HubError> {
        let (details, failed) = self.db.write_txn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;
            let failed = goals::fail_overdue_milestones(conn, goal_id, today)?;
            Ok((load_details(conn, goal_id)?, failed))
        })?;
        self.report_failed(goal_id, failed);
        Ok(details)
    }

    pub fn list_goals(&self, owner_id: &str) -> Result<Vec<GoalDetails>, HubError> {
        self.list_goals_on(owner_id, Utc::now().date_naive())
    }

    /// Non-archived goals of the owner, newest first
    pub fn list_goals_on(&self, owner_id: &str, today: NaiveDate) -> Result<Vec<GoalDetails>, HubError> {
        let listed = self.db.write_txn(|conn| {
            let mut listed = Vec::new();
            for goal in goals::list_goals_for_owner(conn, owner_id)? {
                let failed = goals::fail_overdue_milestones(conn, &goal.id, today)?;
                listed.push((load_details(conn, &goal.id)?, failed));
            }
            Ok(listed)
        })?;

        Ok(listed
            .into_iter()
            .map(|(details, failed)| {
                self.report_failed(&details.goal.id, failed);
                details
            })
            .collect())
    }

    fn report_failed(&self, goal_id: &str, count: usize) {
        if count > 0 {
            debug!(goal = %goal_id, count, "Overdue milestones marked failed");
            self.events.emit(HubEvent::MilestonesFailed {
                goal_id: goal_id.to_string(),
                count,
            });
        }
    }

    // ========================================================================
    // Allowed Viewers
    // ========================================================================

    pub fn list_viewers(&self, owner_id: &str, goal_id: &str) -> Result<Vec<AllowedViewer>, HubError> {
        self.db.with_conn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;
            viewers::list_viewers(conn, goal_id)
        })
    }

    pub fn add_viewer(&self, owner_id: &str, goal_id: &str, viewer_id: &str) -> Result<AllowedViewer, HubError> {
        self.db.write_txn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;
            ensure_friends(conn, owner_id, &[viewer_id.to_string()])?;
            if viewers::is_viewer(conn, goal_id, viewer_id)? {
                return Err(HubError::InvalidInput(format!(
                    "user '{}' is already an allowed viewer",
                    viewer_id
                )));
            }
            viewers::add_viewer(conn, goal_id, viewer_id, true)?;
            Ok(AllowedViewer {
                goal_id: goal_id.to_string(),
                user_id: viewer_id.to_string(),
                can_verify: 1,
            })
        })
    }

    /// Removing a viewer never touches the threshold of proofs already submitted
    pub fn remove_viewer(&self, owner_id: &str, goal_id: &str, viewer_id: &str) -> Result<(), HubError> {
        self.db.write_txn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;
            if !viewers::remove_viewer(conn, goal_id, viewer_id)? {
                return Err(HubError::NotFound(format!("viewer '{}'", viewer_id)));
            }
            Ok(())
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn complete_goal(&self, owner_id: &str, goal_id: &str) -> Result<Goal, HubError> {
        self.complete_goal_at(owner_id, goal_id, Utc::now())
    }

    /// Mark the goal done. With an audience it waits for their confirmation,
    /// otherwise it is verified straight away.
    pub fn complete_goal_at(&self, owner_id: &str, goal_id: &str, now: DateTime<Utc>) -> Result<Goal, HubError> {
        let (goal, audience) = self.db.write_txn(|conn| {
            let goal = goals::get_owned_goal(conn, goal_id, owner_id)?;
            require_active(&goal)?;

            let audience = privacy::eligible_audience(conn, &goal)?;
            let status = if audience.is_empty() {
                GoalStatus::CompletedVerified
            } else {
                GoalStatus::CompletedPending
            };
            goals::close_goal(conn, goal_id, status, None, now)?;

            let goal = goals::get_owned_goal(conn, goal_id, owner_id)?;
            Ok((goal, audience))
        })?;

        info!(goal = %goal.id, status = %goal.status, "Goal completed by owner");
        self.events.emit(HubEvent::GoalStatusChanged {
            goal_id: goal.id.clone(),
            status: goal.status.clone(),
        });

        self.notifier.notify_at(
            &NotificationEvent::GoalCompletionRequest {
                goal_title: goal.title.clone(),
            },
            NotificationLinks {
                actor_id: Some(owner_id),
                goal_id: Some(&goal.id),
                proof_id: None,
            },
            &audience,
            now,
        );

        Ok(goal)
    }

    pub fn give_up(&self, owner_id: &str, goal_id: &str, reason: &str) -> Result<Goal, HubError> {
        if reason.trim().is_empty() {
            return Err(HubError::InvalidInput("a reason is required to give up a goal".into()));
        }

        let goal = self.db.write_txn(|conn| {
            let goal = goals::get_owned_goal(conn, goal_id, owner_id)?;
            require_active(&goal)?;
            goals::close_goal(conn, goal_id, GoalStatus::Failed, Some(reason.trim()), Utc::now())?;
            goals::get_owned_goal(conn, goal_id, owner_id)
        })?;

        info!(goal = %goal.id, "Goal given up");
        self.events.emit(HubEvent::GoalStatusChanged {
            goal_id: goal.id.clone(),
            status: goal.status.clone(),
        });
        Ok(goal)
    }

    /// Soft delete
    pub fn archive(&self, owner_id: &str, goal_id: &str) -> Result<(), HubError> {
        self.db.write_txn(|conn| {
            goals::get_owned_goal(conn, goal_id, owner_id)?;
            goals::set_goal_status(conn, goal_id, GoalStatus::Archived)
        })?;

        self.events.emit(HubEvent::GoalStatusChanged {
            goal_id: goal_id.to_string(),
            status: GoalStatus::Archived.as_str().to_string(),
        });
        Ok(())
    }
}

fn require_active(goal: &Goal) -> Result<(), HubError> {
    if goal.lifecycle()? != GoalStatus::Active {
        return Err(HubError::AlreadyResolved(format!(
            "goal '{}' is already {}",
            goal.id, goal.status
        )));
    }
    Ok(())
}

/// Every id must be an accepted friend of the owner
fn ensure_friends(conn: &mut SqliteConnection, owner_id: &str, ids: &[String]) -> Result<(), HubError> {
    for id in ids {
        if !friends::are_friends(conn, owner_id, id)? {
            return Err(HubError::InvalidInput(format!(
                "user '{}' is not a friend and cannot be an allowed viewer",
                id
            )));
        }
    }
    Ok(())
}

fn load_details(conn: &mut SqliteConnection, goal_id: &str) -> Result<GoalDetails, HubError> {
    let goal = goals::get_goal(conn, goal_id)?
        .ok_or_else(|| HubError::NotFound(format!("goal '{}'", goal_id)))?;
    let milestones = goals::list_milestones_raw(conn, goal_id)?;
    let viewers = viewers::list_viewers(conn, goal_id)?;
    Ok(GoalDetails {
        goal,
        milestones,
        viewers,
    })
}
