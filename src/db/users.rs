//! User projection from the identity provider
//!
//! Authentication lives elsewhere; this table only maps an opaque user id to
//! the name shown in notification messages.

use diesel::prelude::*;

use super::diesel_schema::users;
use super::models::{current_timestamp, NewUser, User};
use crate::error::HubError;

/// Fallback display name for actors we have no record of
pub const UNKNOWN_ACTOR: &str = "Someone";

pub fn get_user(conn: &mut SqliteConnection, id: &str) -> Result<Option<User>, HubError> {
    Ok(users::table
        .filter(users::id.eq(id))
        .first(conn)
        .optional()?)
}

/// Register a user id with a display name
pub fn create_user(
    conn: &mut SqliteConnection,
    id: &str,
    username: &str,
    email: &str,
) -> Result<User, HubError> {
    if id.is_empty() || username.is_empty() {
        return Err(HubError::InvalidInput("user id and username are required".into()));
    }

    let now = current_timestamp();
    diesel::insert_into(users::table)
        .values(&NewUser {
            id,
            username,
            email,
            created_at: &now,
        })
        .execute(conn)?;

    get_user(conn, id)?.ok_or_else(|| HubError::Internal("Failed to retrieve created user".into()))
}

/// Display name for notification templates
pub fn display_name(conn: &mut SqliteConnection, id: Option<&str>) -> Result<String, HubError> {
    let Some(id) = id else {
        return Ok(UNKNOWN_ACTOR.to_string());
    };

    let name: Option<String> = users::table
        .filter(users::id.eq(id))
        .select(users::username)
        .first(conn)
        .optional()?;

    Ok(name.unwrap_or_else(|| UNKNOWN_ACTOR.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::HubDb;

    #[test]
    fn test_display_name_fallback() {
        let db = HubDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        create_user(&mut conn, "u1", "alice", "alice@example.com").unwrap();

        assert_eq!(display_name(&mut conn, Some("u1")).unwrap(), "alice");
        assert_eq!(display_name(&mut conn, Some("ghost")).unwrap(), UNKNOWN_ACTOR);
        assert_eq!(display_name(&mut conn, None).unwrap(), UNKNOWN_ACTOR);
    }
}
