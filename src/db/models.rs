//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Enumerated columns are stored as TEXT and parsed on demand through the
//! typed enums at the bottom of this file.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;
use crate::error::HubError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a UTC instant for SQLite TEXT columns.
/// Fixed width, so lexicographic order equals chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, HubError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| HubError::Internal(format!("Bad timestamp '{}': {}", value, e)))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, HubError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| HubError::Internal(format!("Bad date '{}': {}", value, e)))
}

// ============================================================================
// User Models
// ============================================================================

/// Projection of the identity provider's user, used for display names
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Friend Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = friends)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FriendLink {
    pub id: String,
    pub requester_id: String,
    pub addressee_id: String,
    pub status: String,
    pub created_at: String,
}

impl FriendLink {
    /// The other side of the link, seen from `user_id`
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.requester_id == user_id {
            &self.addressee_id
        } else {
            &self.requester_id
        }
    }

    pub fn state(&self) -> Result<FriendStatus, HubError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = friends)]
pub struct NewFriendLink<'a> {
    pub id: &'a str,
    pub requester_id: &'a str,
    pub addressee_id: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Goal Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = goals)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub milestone_type: String,
    pub milestone_interval_days: Option<i32>,
    pub milestone_quantity: Option<i32>,
    pub milestone_unit: Option<String>,
    pub start_date: String,
    pub deadline: String,
    pub privacy_setting: String,
    pub image_url: Option<String>,
    pub user_story: Option<String>,
    pub status: String,
    pub is_completed: i32,
    pub completed_at: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: String,
}

impl Goal {
    pub fn privacy(&self) -> Result<GoalPrivacy, HubError> {
        self.privacy_setting.parse()
    }

    pub fn lifecycle(&self) -> Result<GoalStatus, HubError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = goals)]
pub struct NewGoal<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub milestone_type: &'a str,
    pub milestone_interval_days: Option<i32>,
    pub milestone_quantity: Option<i32>,
    pub milestone_unit: Option<&'a str>,
    pub start_date: &'a str,
    pub deadline: &'a str,
    pub privacy_setting: &'a str,
    pub image_url: Option<&'a str>,
    pub user_story: Option<&'a str>,
    pub status: &'a str,
    pub created_at: &'a str,
}

/// Allowed viewer of a select_friends goal
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = goal_allowed_viewers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AllowedViewer {
    pub goal_id: String,
    pub user_id: String,
    pub can_verify: i32,
}

// ============================================================================
// Milestone Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = milestones)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Milestone {
    pub id: String,
    pub goal_id: String,
    pub title: String,
    pub description: Option<String>,
    pub is_flexible: i32,
    pub batch_number: i32,
    pub order_index: i32,
    pub due_date: Option<String>,
    pub completed: i32,
    pub failed: i32,
    pub progress: i32,
    pub completed_at: Option<String>,
}

impl Milestone {
    pub fn is_completed(&self) -> bool {
        self.completed != 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed != 0
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone<'a> {
    pub id: &'a str,
    pub goal_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub is_flexible: i32,
    pub batch_number: i32,
    pub order_index: i32,
    pub due_date: Option<&'a str>,
}

// ============================================================================
// Proof Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = proofs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Proof {
    pub id: String,
    pub goal_id: String,
    pub milestone_id: Option<String>,
    pub user_id: String,
    pub image_url: String,
    pub caption: Option<String>,
    pub status: String,
    pub required_verifications: i32,
    pub uploaded_at: String,
    pub verification_expires_at: String,
}

impl Proof {
    pub fn state(&self) -> Result<ProofStatus, HubError> {
        self.status.parse()
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>, HubError> {
        parse_timestamp(&self.verification_expires_at)
    }

    /// Strictly after the deadline. A vote at exactly the deadline still counts.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> Result<bool, HubError> {
        Ok(now > self.expires_at()?)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = proofs)]
pub struct NewProof<'a> {
    pub id: &'a str,
    pub goal_id: &'a str,
    pub milestone_id: Option<&'a str>,
    pub user_id: &'a str,
    pub image_url: &'a str,
    pub caption: Option<&'a str>,
    pub status: &'a str,
    pub required_verifications: i32,
    pub uploaded_at: &'a str,
    pub verification_expires_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = proof_verifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProofVerification {
    pub id: String,
    pub proof_id: String,
    pub verifier_id: String,
    pub approved: i32,
    pub comment: Option<String>,
    pub created_at: String,
}

impl ProofVerification {
    pub fn is_approval(&self) -> bool {
        self.approved != 0
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = proof_verifications)]
pub struct NewProofVerification<'a> {
    pub id: &'a str,
    pub proof_id: &'a str,
    pub verifier_id: &'a str,
    pub approved: i32,
    pub comment: Option<&'a str>,
    pub created_at: &'a str,
}

/// Proof with its full vote history (API response)
#[derive(Debug, Clone, Serialize)]
pub struct ProofWithVerifications {
    #[serde(flatten)]
    pub proof: Proof,
    pub verifications: Vec<ProofVerification>,
    /// Whether the requesting user may vote on this proof right now
    pub can_verify: bool,
}

impl ProofWithVerifications {
    pub fn approval_count(&self) -> usize {
        self.verifications.iter().filter(|v| v.is_approval()).count()
    }
}

// ============================================================================
// Notification Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub actor_id: Option<String>,
    pub notification_type: String,
    pub goal_id: Option<String>,
    pub proof_id: Option<String>,
    pub message: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub id: &'a str,
    pub recipient_id: &'a str,
    pub actor_id: Option<&'a str>,
    pub notification_type: &'a str,
    pub goal_id: Option<&'a str>,
    pub proof_id: Option<&'a str>,
    pub message: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Interval Change Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = interval_change_requests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IntervalChangeRequest {
    pub id: String,
    pub goal_id: String,
    pub requester_id: String,
    pub current_interval: i32,
    pub requested_interval: i32,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
}

impl IntervalChangeRequest {
    pub fn state(&self) -> Result<RequestStatus, HubError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = interval_change_requests)]
pub struct NewIntervalChangeRequest<'a> {
    pub id: &'a str,
    pub goal_id: &'a str,
    pub requester_id: &'a str,
    pub current_interval: i32,
    pub requested_interval: i32,
    pub status: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Enumerated Columns
// ============================================================================

/// Declares a TEXT-backed enum with its stored spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = HubError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(HubError::InvalidInput(format!(
                        "'{}' is not a valid {}",
                        other,
                        stringify!($name)
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum! {
    /// Who can see and verify a goal's proofs
    GoalPrivacy {
        Private => "private",
        Friends => "friends",
        SelectFriends => "select_friends",
    }
}

text_enum! {
    GoalStatus {
        Active => "active",
        Failed => "failed",
        CompletedPending => "completed-pending-verification",
        CompletedVerified => "completed-verified",
        Archived => "archived",
    }
}

text_enum! {
    MilestoneType {
        Flexible => "flexible",
        Defined => "defined",
    }
}

text_enum! {
    ProofStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Expired => "expired",
    }
}

impl ProofStatus {
    /// Terminal proofs accept no further votes
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProofStatus::Pending)
    }
}

text_enum! {
    FriendStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
        Blocked => "blocked",
    }
}

text_enum! {
    NotificationKind {
        FriendRequest => "friend_request",
        FriendRequestAccepted => "friend_request_accepted",
        ProofSubmission => "proof_submission",
        ProofVerified => "proof_verified",
        ProofExpired => "proof_expired",
        GoalCompletionRequest => "goal_completion_request",
        GoalCompleted => "goal_completed",
        IntervalChangeRequest => "interval_change_request",
    }
}

text_enum! {
    NotificationState {
        Unread => "unread",
        Read => "read",
        Archived => "archived",
    }
}

text_enum! {
    /// Status of an interval change request
    RequestStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_keeps_order() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_timestamp(&format_timestamp(late)).unwrap(), late);
    }

    #[test]
    fn test_enum_text_spelling() {
        assert_eq!(GoalPrivacy::SelectFriends.as_str(), "select_friends");
        assert_eq!(
            "completed-pending-verification".parse::<GoalStatus>().unwrap(),
            GoalStatus::CompletedPending
        );
        assert!("public".parse::<GoalPrivacy>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ProofStatus::Pending.is_terminal());
        assert!(ProofStatus::Approved.is_terminal());
        assert!(ProofStatus::Rejected.is_terminal());
        assert!(ProofStatus::Expired.is_terminal());
    }

    #[test]
    fn test_friend_link_counterpart() {
        let link = FriendLink {
            id: "f1".into(),
            requester_id: "alice".into(),
            addressee_id: "bob".into(),
            status: "accepted".into(),
            created_at: current_timestamp(),
        };
        assert_eq!(link.counterpart("alice"), "bob");
        assert_eq!(link.counterpart("bob"), "alice");
    }
}
