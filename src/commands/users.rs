use rusqlite::params;
use tracing::{info, warn};

use crate::auth::{lookup_profile, map_user, require_admin, resolve_caller, Identity, USER_COLUMNS};
use crate::db::{is_unique_violation, now};
use crate::error::{AppError, ValidationError};
use crate::models::{NewUser, Role, UserProfile};
use crate::validation::{clean_note, require_text};
use crate::AppState;

fn insert_user(conn: &rusqlite::Connection, user: NewUser) -> Result<UserProfile, AppError> {
    let user_id = require_text("user_id", &user.user_id)?;
    let name = require_text("name", &user.name)?;
    let email = clean_note(user.email.as_deref());

    conn.execute(
        "INSERT INTO users (user_id, name, email, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, name, email, user.role, now()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::from(ValidationError::DuplicateUser(user_id.clone()))
        } else {
            e.into()
        }
    })?;

    lookup_profile(conn, &user_id)?.ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
}

fn count_admins(conn: &rusqlite::Connection) -> Result<i64, AppError> {
    let admins = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1",
        [Role::Admin],
        |row| row.get(0),
    )?;
    Ok(admins)
}

/// Provision the first admin of a fresh store. Refused once any admin exists.
pub fn bootstrap_admin(state: &AppState, user: NewUser) -> Result<UserProfile, AppError> {
    let conn = state.db.lock();

    if count_admins(&conn)? > 0 {
        return Err(AppError::Forbidden("an admin already exists".into()));
    }

    let profile = insert_user(&conn, NewUser { role: Role::Admin, ..user })?;
    info!(user_id = %profile.user_id, "initial admin provisioned");
    Ok(profile)
}

/// Admins provision role-directory entries for identities the host created.
pub fn create_user(
    state: &AppState,
    identity: Option<&Identity>,
    user: NewUser,
) -> Result<UserProfile, AppError> {
    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let profile = insert_user(&conn, user)?;
    info!(user_id = %profile.user_id, role = %profile.role, by = %caller.user_id, "user created");
    Ok(profile)
}

pub fn get_user(
    state: &AppState,
    identity: Option<&Identity>,
    user_id: &str,
) -> Result<UserProfile, AppError> {
    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    lookup_profile(&conn, user_id)?.ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
}

/// Everyone, ordered by name (the outgoing-member picker).
pub fn list_users(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<UserProfile>, AppError> {
    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY name ASC, user_id ASC"
    ))?;
    let users = stmt
        .query_map([], map_user)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}

pub fn set_role(
    state: &AppState,
    identity: Option<&Identity>,
    user_id: &str,
    role: Role,
) -> Result<UserProfile, AppError> {
    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let current = lookup_profile(&conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

    // With zero admins bootstrap_admin would accept anyone
    if current.role == Role::Admin && role != Role::Admin && count_admins(&conn)? <= 1 {
        warn!(user_id, by = %caller.user_id, "refused to demote the last admin");
        return Err(AppError::Forbidden("cannot demote the last admin".into()));
    }

    conn.execute(
        "UPDATE users SET role = ?1 WHERE user_id = ?2",
        params![role, user_id],
    )?;

    info!(user_id, %role, by = %caller.user_id, "role changed");
    lookup_profile(&conn, user_id)?.ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
}
