//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::HubError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), HubError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.batch_execute(HUB_SCHEMA)
            .map_err(|e| HubError::Internal(format!("Failed to create tables: {}", e)))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(HubError::Config(format!(
            "Database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, HubError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| HubError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), HubError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

/// Full schema. The unique index on (proof_id, verifier_id) is what actually
/// stops concurrent double votes; the service pre-check only gives a nicer error.
pub const HUB_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS friends (
    id TEXT PRIMARY KEY NOT NULL,
    requester_id TEXT NOT NULL REFERENCES users(id),
    addressee_id TEXT NOT NULL REFERENCES users(id),
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_friends_requester ON friends(requester_id, status);
CREATE INDEX IF NOT EXISTS idx_friends_addressee ON friends(addressee_id, status);

CREATE TABLE IF NOT EXISTS goals (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    description TEXT,
    milestone_type TEXT NOT NULL,
    milestone_interval_days INTEGER,
    milestone_quantity INTEGER,
    milestone_unit TEXT,
    start_date TEXT NOT NULL,
    deadline TEXT NOT NULL,
    privacy_setting TEXT NOT NULL DEFAULT 'private',
    image_url TEXT,
    user_story TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    is_completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    failure_reason TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_goals_owner ON goals(user_id, status);

CREATE TABLE IF NOT EXISTS goal_allowed_viewers (
    goal_id TEXT NOT NULL REFERENCES goals(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    can_verify INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (goal_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_viewers_user ON goal_allowed_viewers(user_id);

CREATE TABLE IF NOT EXISTS milestones (
    id TEXT PRIMARY KEY NOT NULL,
    goal_id TEXT NOT NULL REFERENCES goals(id),
    title TEXT NOT NULL,
    description TEXT,
    is_flexible INTEGER NOT NULL DEFAULT 0,
    batch_number INTEGER NOT NULL DEFAULT 1,
    order_index INTEGER NOT NULL,
    due_date TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_milestones_goal ON milestones(goal_id, order_index);

CREATE TABLE IF NOT EXISTS proofs (
    id TEXT PRIMARY KEY NOT NULL,
    goal_id TEXT NOT NULL REFERENCES goals(id),
    milestone_id TEXT REFERENCES milestones(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    image_url TEXT NOT NULL,
    caption TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    required_verifications INTEGER NOT NULL DEFAULT 1,
    uploaded_at TEXT NOT NULL,
    verification_expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_proofs_goal ON proofs(goal_id);
CREATE INDEX IF NOT EXISTS idx_proofs_pending_expiry ON proofs(status, verification_expires_at);

CREATE TABLE IF NOT EXISTS proof_verifications (
    id TEXT PRIMARY KEY NOT NULL,
    proof_id TEXT NOT NULL REFERENCES proofs(id),
    verifier_id TEXT NOT NULL REFERENCES users(id),
    approved INTEGER NOT NULL,
    comment TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_verifications_unique ON proof_verifications(proof_id, verifier_id);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY NOT NULL,
    recipient_id TEXT NOT NULL REFERENCES users(id),
    actor_id TEXT REFERENCES users(id),
    notification_type TEXT NOT NULL,
    goal_id TEXT REFERENCES goals(id),
    proof_id TEXT REFERENCES proofs(id),
    message TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unread',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, status);

CREATE TABLE IF NOT EXISTS interval_change_requests (
    id TEXT PRIMARY KEY NOT NULL,
    goal_id TEXT NOT NULL REFERENCES goals(id),
    requester_id TEXT NOT NULL REFERENCES users(id),
    current_interval INTEGER NOT NULL,
    requested_interval INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    resolved_by TEXT REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_interval_changes_goal ON interval_change_requests(goal_id, status);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
