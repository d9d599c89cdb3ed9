//! Accountability Hub - proof verification and privacy engine
//!
//! Users set goals with milestones, share them with friends or hand-picked
//! viewers, and upload photographic proof of progress. Peers then approve
//! or reject that proof before a milestone counts as done.
//!
//! ## Components
//!
//! | Component | Module | Decides |
//! |-----------|--------|---------|
//! | Privacy resolver | [`services::privacy`] | who may see/verify, required approvals |
//! | Proof lifecycle | [`services::proof_service`] | submission, expiry, finalization |
//! | Tally engine | [`services::verification_service`] | one vote per verifier, threshold |
//! | Notification fan-out | [`services::notification_service`] | one row per recipient, best-effort |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/accountability-hub/
//! ├── hub.db            # SQLite (WAL)
//! └── config.toml       # Configuration
//! ```
//!
//! SQLite is the only coordination point. Write paths use `BEGIN IMMEDIATE`
//! transactions and a unique (proof, verifier) index, so no in-process
//! locking is needed.

pub mod blob_refs;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports
pub use blob_refs::{BlobRefs, UploadRef};
pub use config::Config;
pub use db::{DbStats, HubDb};
pub use error::HubError;
pub use services::{EventBus, HubEvent, Services};
