//! SQLite database module for the accountability engine
//!
//! ## Architecture
//!
//! - Diesel over SQLite, pooled with r2d2
//! - Every write path of the verification engine runs in a `BEGIN IMMEDIATE`
//!   transaction, so count-then-transition sequences are serialized by SQLite
//! - Repository functions take `&mut SqliteConnection` so services can
//!   compose several of them inside one transaction
//!
//! ## Tables
//!
//! - `users` - display projection of the identity provider
//! - `friends` - friend links (requester, addressee, status)
//! - `goals`, `milestones`, `goal_allowed_viewers`
//! - `proofs`, `proof_verifications` - one vote per (proof, verifier)
//! - `notifications`, `interval_change_requests`

pub mod diesel_schema;
pub mod schema;
pub mod models;
pub mod users;
pub mod friends;
pub mod goals;
pub mod viewers;
pub mod proofs;
pub mod notifications;
pub mod interval_changes;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::HubError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas applied when r2d2 hands out a fresh connection
#[derive(Debug)]
struct SqlitePragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database for goals, proofs and verifications
pub struct HubDb {
    pool: DbPool,
}

impl HubDb {
    /// Open or create the database described by `config`
    pub fn open(config: &Config) -> Result<Self, HubError> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::open_path(&config.database_path(), config.pool_size, config.busy_timeout_ms)
    }

    /// Open or create a database file with an explicit pool size
    pub fn open_path(db_path: &Path, pool_size: u32, busy_timeout_ms: u64) -> Result<Self, HubError> {
        info!("Opening SQLite database at {:?}", db_path);

        // WAL is persistent in the file, so set it once before the pool opens
        // concurrent connections.
        {
            let mut conn = SqliteConnection::establish(&db_path.to_string_lossy())
                .map_err(|e| HubError::Internal(format!("Failed to open SQLite: {}", e)))?;
            conn.batch_execute(&format!(
                "PRAGMA busy_timeout = {}; PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;",
                busy_timeout_ms
            ))?;
        }

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(SqlitePragmas { busy_timeout_ms }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Each SQLite `:memory:` connection is its own database, so the pool is
    /// pinned to a single connection that never gets recycled. Callers must
    /// not hold a connection while asking for another one.
    pub fn open_in_memory() -> Result<Self, HubError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(SqlitePragmas { busy_timeout_ms: 0 }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), HubError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, HubError> {
        Ok(self.pool.get()?)
    }

    /// Run a read-only closure on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, HubError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, HubError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`.
    ///
    /// The write lock is taken up front, so two writers never interleave
    /// between a read and the write that depends on it. Any `Err` rolls back.
    pub fn write_txn<F, T>(&self, f: F) -> Result<T, HubError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, HubError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, HubError> {
        use diesel_schema::{goals, notifications, proof_verifications, proofs};

        self.with_conn(|conn| {
            let goal_count: i64 = goals::table.count().get_result(conn)?;
            let proof_count: i64 = proofs::table.count().get_result(conn)?;
            let pending_proofs: i64 = proofs::table
                .filter(proofs::status.eq(models::ProofStatus::Pending.as_str()))
                .count()
                .get_result(conn)?;
            let verification_count: i64 = proof_verifications::table.count().get_result(conn)?;
            let notification_count: i64 = notifications::table.count().get_result(conn)?;

            Ok(DbStats {
                goal_count: goal_count as u64,
                proof_count: proof_count as u64,
                pending_proofs: pending_proofs as u64,
                verification_count: verification_count as u64,
                notification_count: notification_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub goal_count: u64,
    pub proof_count: u64,
    pub pending_proofs: u64,
    pub verification_count: u64,
    pub notification_count: u64,
}

// Re-exports
pub use models::{
    AllowedViewer, FriendLink, FriendStatus, Goal, GoalPrivacy, GoalStatus, IntervalChangeRequest,
    Milestone, MilestoneType, Notification, NotificationKind, NotificationState, Proof,
    ProofStatus, ProofVerification, ProofWithVerifications, RequestStatus, User,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_stats_start_empty() {
        let db = HubDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.goal_count, 0);
        assert_eq!(stats.pending_proofs, 0);
    }

    #[test]
    fn test_open_file_database_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.db");
        {
            let db = HubDb::open_path(&path, 2, 1000).unwrap();
            db.stats().unwrap();
        }
        let db = HubDb::open_path(&path, 2, 1000).unwrap();
        assert_eq!(db.stats().unwrap().proof_count, 0);
    }

    #[test]
    fn test_write_txn_rolls_back_on_error() {
        let db = HubDb::open_in_memory().unwrap();
        let result: Result<(), HubError> = db.write_txn(|conn| {
            users::create_user(conn, "u1", "alice", "alice@example.com")?;
            Err(HubError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert!(db.with_conn(|conn| users::get_user(conn, "u1")).unwrap().is_none());
    }
}
