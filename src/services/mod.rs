//! Service layer for the accountability hub
//!
//! Services own transaction boundaries and post-commit side effects. Each
//! operation that changes state:
//! - opens one `BEGIN IMMEDIATE` transaction through [`HubDb::write_txn`]
//! - composes repository calls (`db/*.rs`) inside it
//! - after commit, emits [`HubEvent`]s and fans out notifications
//!
//! ## Architecture
//!
//! ```text
//! Caller (CLI, HTTP layer, tests)
//!     ↓
//! Services (verification, proofs, goals, friends, interval changes)
//!     ↓                ↘
//! Privacy resolver     Notification fan-out
//!     ↓
//! Repository layer (db/*.rs)
//!     ↓
//! SQLite
//! ```

pub mod events;
pub mod privacy;
pub mod notification_service;
pub mod proof_service;
pub mod verification_service;
pub mod goal_service;
pub mod friend_service;
pub mod interval_change_service;

// Re-exports
pub use events::{spawn_logging_listener, EventBus, EventListener, HubEvent, LoggingEventListener};
pub use friend_service::FriendService;
pub use goal_service::{
    CreateGoalInput, GoalDetails, GoalService, MilestoneDraft, MilestonePlan, UpdateGoalInput,
};
pub use interval_change_service::IntervalChangeService;
pub use notification_service::{NotificationEvent, NotificationLinks, NotificationService};
pub use proof_service::{Finalization, ProofService, SubmitProofInput};
pub use verification_service::{VerificationService, VoteInput};

use std::sync::Arc;

use chrono::Duration;

use crate::config::Config;
use crate::db::HubDb;
use proof_service::DEFAULT_VERIFICATION_WINDOW_HOURS;

/// Service container
///
/// Holds every service over one shared database and event bus.
pub struct Services {
    pub db: Arc<HubDb>,
    pub events: Arc<EventBus>,
    pub notifications: Arc<NotificationService>,
    pub proofs: Arc<ProofService>,
    pub verifications: Arc<VerificationService>,
    pub goals: Arc<GoalService>,
    pub friends: Arc<FriendService>,
    pub interval_changes: Arc<IntervalChangeService>,
}

impl Services {
    /// Create all services with the default 72 hour verification window
    pub fn new(db: Arc<HubDb>) -> Self {
        Self::with_window(db, Duration::hours(DEFAULT_VERIFICATION_WINDOW_HOURS))
    }

    /// Create all services using the configured verification window
    pub fn from_config(db: Arc<HubDb>, config: &Config) -> Self {
        Self::with_window(db, config.verification_window())
    }

    pub fn with_window(db: Arc<HubDb>, window: Duration) -> Self {
        let events = Arc::new(EventBus::new());
        let notifications = Arc::new(NotificationService::new(db.clone(), events.clone()));
        let proofs = Arc::new(ProofService::new(
            db.clone(),
            events.clone(),
            notifications.clone(),
            window,
        ));

        Self {
            verifications: Arc::new(VerificationService::new(
                db.clone(),
                events.clone(),
                notifications.clone(),
                proofs.clone(),
            )),
            goals: Arc::new(GoalService::new(db.clone(), events.clone(), notifications.clone())),
            friends: Arc::new(FriendService::new(db.clone(), events.clone(), notifications.clone())),
            interval_changes: Arc::new(IntervalChangeService::new(
                db.clone(),
                events.clone(),
                notifications.clone(),
            )),
            proofs,
            notifications,
            events,
            db,
        }
    }
}
