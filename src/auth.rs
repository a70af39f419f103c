//! Authorization gate in front of every workflow operation.
//!
//! Authentication itself belongs to the host: it hands each call the
//! [`Identity`] it resolved (or `None`). Roles come from the `users` table.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Role, UserProfile};

/// Who the identity provider says is calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.map(str::to_string),
        }
    }
}

/// An identity joined with its role-directory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub user_id: String,
    pub email: Option<String>,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub(crate) const USER_COLUMNS: &str = "user_id, name, email, role, created_at";

pub(crate) fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn lookup_profile(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>, AppError> {
    let profile = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            [user_id],
            map_user,
        )
        .optional()?;
    Ok(profile)
}

/// Resolve the caller or fail. A missing identity is `Unauthenticated`; an
/// identity with no role assigned is `Forbidden`.
pub fn resolve_caller(conn: &Connection, identity: Option<&Identity>) -> Result<Caller, AppError> {
    let identity = identity.ok_or(AppError::Unauthenticated)?;
    if identity.user_id.trim().is_empty() {
        return Err(AppError::Unauthenticated);
    }

    let profile = lookup_profile(conn, &identity.user_id)?.ok_or_else(|| {
        AppError::Forbidden(format!("user {} has no role assigned", identity.user_id))
    })?;

    Ok(Caller {
        user_id: profile.user_id,
        email: identity.email.clone().or(profile.email),
        name: profile.name,
        role: profile.role,
    })
}

pub fn require_admin(conn: &Connection, identity: Option<&Identity>) -> Result<Caller, AppError> {
    let caller = resolve_caller(conn, identity)?;
    if !caller.is_admin() {
        return Err(AppError::Forbidden("admin role required".into()));
    }
    Ok(caller)
}
