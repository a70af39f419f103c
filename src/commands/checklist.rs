use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::auth::{require_admin, resolve_caller, Identity};
use crate::error::AppError;
use crate::models::{ChecklistItem, NewChecklistItem};
use crate::validation::{clean_note, require_text};
use crate::AppState;

const ITEM_COLUMNS: &str = "id, title, description, sort_order, active";

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChecklistItem> {
    Ok(ChecklistItem {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        sort_order: row.get(3)?,
        active: row.get(4)?,
    })
}

fn load_item(conn: &Connection, id: i64) -> Result<ChecklistItem, AppError> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM checklist_items WHERE id = ?1"),
        [id],
        map_item,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("checklist item {id}")))
}

/// Answers may only reference items that are still on the checklist.
pub(crate) fn ensure_active_item(conn: &Connection, id: i64) -> Result<(), AppError> {
    let active: Option<bool> = conn
        .query_row(
            "SELECT active FROM checklist_items WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    match active {
        Some(true) => Ok(()),
        _ => Err(AppError::NotFound(format!("active checklist item {id}"))),
    }
}

/// Active items in display order.
pub fn list_checklist_items(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<ChecklistItem>, AppError> {
    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM checklist_items WHERE active = 1 ORDER BY sort_order ASC, id ASC"
    ))?;
    let items = stmt
        .query_map([], map_item)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

pub fn create_checklist_item(
    state: &AppState,
    identity: Option<&Identity>,
    item: NewChecklistItem,
) -> Result<ChecklistItem, AppError> {
    let title = require_text("title", &item.title)?;
    let description = clean_note(item.description.as_deref());

    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    conn.execute(
        "INSERT INTO checklist_items (title, description, sort_order, active) VALUES (?1, ?2, ?3, 1)",
        params![title, description, item.sort_order],
    )?;
    let id = conn.last_insert_rowid();
    info!(item_id = id, by = %caller.user_id, "checklist item created");

    load_item(&conn, id)
}

pub fn set_checklist_item_active(
    state: &AppState,
    identity: Option<&Identity>,
    id: i64,
    active: bool,
) -> Result<ChecklistItem, AppError> {
    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let changed = conn.execute(
        "UPDATE checklist_items SET active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("checklist item {id}")));
    }

    info!(item_id = id, active, by = %caller.user_id, "checklist item toggled");
    load_item(&conn, id)
}
