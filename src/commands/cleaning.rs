//! Cleaning log: staff record a visit with the operations they carried out,
//! admins review the history.

use std::collections::HashSet;

use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::auth::{require_admin, resolve_caller, Identity};
use crate::db::{is_unique_violation, now};
use crate::error::{AppError, ValidationError};
use crate::models::{CleaningLog, CleaningOperation, LogCleaning, NewCleaningOperation};
use crate::validation::{clean_note, parse_recent_timestamp, require_text};
use crate::AppState;

const OPERATION_COLUMNS: &str = "id, name, description, active";

const LOG_SELECT: &str = "SELECT l.id, l.staff_id, u.name, l.performed_at, l.note, l.created_at \
     FROM cleaning_logs l LEFT JOIN users u ON u.user_id = l.staff_id";

fn map_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<CleaningOperation> {
    Ok(CleaningOperation {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        active: row.get(3)?,
    })
}

fn load_operation(conn: &Connection, id: i64) -> Result<CleaningOperation, AppError> {
    conn.query_row(
        &format!("SELECT {OPERATION_COLUMNS} FROM cleaning_operations WHERE id = ?1"),
        [id],
        map_operation,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("cleaning operation {id}")))
}

fn ensure_active_operation(conn: &Connection, id: i64) -> Result<(), AppError> {
    let active: Option<bool> = conn
        .query_row(
            "SELECT active FROM cleaning_operations WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    match active {
        Some(true) => Ok(()),
        _ => Err(AppError::NotFound(format!("active cleaning operation {id}"))),
    }
}

fn load_log(conn: &Connection, id: i64) -> Result<CleaningLog, AppError> {
    let mut log = conn
        .query_row(&format!("{LOG_SELECT} WHERE l.id = ?1"), [id], |row| {
            Ok(CleaningLog {
                id: row.get(0)?,
                staff_id: row.get(1)?,
                staff_name: row.get(2)?,
                performed_at: row.get(3)?,
                note: row.get(4)?,
                created_at: row.get(5)?,
                operations: Vec::new(),
            })
        })
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("cleaning log {id}")))?;

    log.operations = operation_names(conn, id)?;
    Ok(log)
}

fn operation_names(conn: &Connection, log_id: i64) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT o.name FROM cleaning_log_operations lo
         JOIN cleaning_operations o ON o.id = lo.operation_id
         WHERE lo.log_id = ?1
         ORDER BY o.name ASC",
    )?;
    let names = stmt
        .query_map([log_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Active operations, alphabetical.
pub fn list_cleaning_operations(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<CleaningOperation>, AppError> {
    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {OPERATION_COLUMNS} FROM cleaning_operations WHERE active = 1 ORDER BY name ASC"
    ))?;
    let operations = stmt
        .query_map([], map_operation)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(operations)
}

pub fn create_cleaning_operation(
    state: &AppState,
    identity: Option<&Identity>,
    operation: NewCleaningOperation,
) -> Result<CleaningOperation, AppError> {
    let name = require_text("name", &operation.name)?;
    let description = clean_note(operation.description.as_deref());

    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    conn.execute(
        "INSERT INTO cleaning_operations (name, description, active) VALUES (?1, ?2, 1)",
        params![name, description],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::from(ValidationError::DuplicateOperationName(name.clone()))
        } else {
            e.into()
        }
    })?;
    let id = conn.last_insert_rowid();
    info!(operation_id = id, by = %caller.user_id, "cleaning operation created");

    load_operation(&conn, id)
}

pub fn set_cleaning_operation_active(
    state: &AppState,
    identity: Option<&Identity>,
    id: i64,
    active: bool,
) -> Result<CleaningOperation, AppError> {
    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let changed = conn.execute(
        "UPDATE cleaning_operations SET active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("cleaning operation {id}")));
    }

    info!(operation_id = id, active, by = %caller.user_id, "cleaning operation toggled");
    load_operation(&conn, id)
}

/// Record a cleaning visit for the caller. The log row and one row per
/// selected operation are written in one transaction. `performed_at` may not
/// lie in the future or further back than the configured window.
pub fn log_cleaning(
    state: &AppState,
    identity: Option<&Identity>,
    entry: LogCleaning,
) -> Result<CleaningLog, AppError> {
    if entry.operation_ids.is_empty() {
        return Err(ValidationError::NoCleaningOperations.into());
    }
    let mut seen = HashSet::new();
    for id in &entry.operation_ids {
        if !seen.insert(*id) {
            return Err(ValidationError::DuplicateCleaningOperation(*id).into());
        }
    }

    let performed_at = match entry.performed_at.as_deref() {
        Some(raw) => {
            let window = Duration::days(i64::from(state.config.workflow.cleaning_backdate_days));
            parse_recent_timestamp(raw, Utc::now(), window)?
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        }
        None => now(),
    };
    let note = clean_note(entry.note.as_deref());

    let mut conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO cleaning_logs (staff_id, performed_at, note, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![caller.user_id, performed_at, note, now()],
    )?;
    let log_id = tx.last_insert_rowid();

    for operation_id in &entry.operation_ids {
        ensure_active_operation(&tx, *operation_id)?;
        tx.execute(
            "INSERT INTO cleaning_log_operations (log_id, operation_id) VALUES (?1, ?2)",
            params![log_id, operation_id],
        )?;
    }

    let log = load_log(&tx, log_id)?;
    tx.commit()?;

    info!(
        log_id,
        staff = %caller.user_id,
        operations = log.operations.len(),
        "cleaning visit logged"
    );
    Ok(log)
}

/// Every visit for admins, most recently performed first.
pub fn list_cleaning_logs(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<CleaningLog>, AppError> {
    let conn = state.db.lock();
    require_admin(&conn, identity)?;

    let mut stmt = conn.prepare(&format!(
        "{LOG_SELECT} ORDER BY l.performed_at DESC, l.id DESC LIMIT ?1"
    ))?;
    let ids = stmt
        .query_map([state.config.workflow.history_limit], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;

    ids.into_iter().map(|id| load_log(&conn, id)).collect()
}
