use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::auth::{require_admin, resolve_caller, Identity};
use crate::db::{is_unique_violation, now};
use crate::error::AppError;
use crate::models::{DiscountRecord, NewDiscount, UpdateDiscount};
use crate::validation::{clean_note, normalize_plate, validate_rate};
use crate::AppState;

const DISCOUNT_COLUMNS: &str = "id, plate, cash_rate, card_rate, note, active, created_at";

fn map_discount(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiscountRecord> {
    Ok(DiscountRecord {
        id: row.get(0)?,
        plate: row.get(1)?,
        cash_rate: row.get(2)?,
        card_rate: row.get(3)?,
        note: row.get(4)?,
        active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Any record, active or not, blocks a new one for the same plate.
pub(crate) fn plate_exists(conn: &Connection, plate: &str) -> Result<bool, AppError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM discounts WHERE plate = ?1)",
        [plate],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub(crate) fn load_discount(conn: &Connection, id: i64) -> Result<DiscountRecord, AppError> {
    conn.query_row(
        &format!("SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE id = ?1"),
        [id],
        map_discount,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("discount {id}")))
}

/// Insert an active record. The UNIQUE constraint on `plate` is the
/// authoritative duplicate check.
pub(crate) fn insert_discount(
    conn: &Connection,
    plate: &str,
    cash_rate: f64,
    card_rate: f64,
    note: Option<&str>,
) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO discounts (plate, cash_rate, card_rate, note, active, created_at) VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![plate, cash_rate, card_rate, note, now()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::DuplicateActiveDiscount(plate.to_string())
        } else {
            e.into()
        }
    })?;

    Ok(conn.last_insert_rowid())
}

pub fn create_discount(
    state: &AppState,
    identity: Option<&Identity>,
    discount: NewDiscount,
) -> Result<DiscountRecord, AppError> {
    let plate = normalize_plate(&discount.plate, state.config.workflow.max_plate_len)?;
    let cash_rate = validate_rate("cash_rate", discount.cash_rate)?;
    let card_rate = validate_rate("card_rate", discount.card_rate)?;
    let note = clean_note(discount.note.as_deref());

    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    if plate_exists(&conn, &plate)? {
        warn!(plate = %plate, "discount already exists");
        return Err(AppError::DuplicateActiveDiscount(plate));
    }

    let id = insert_discount(&conn, &plate, cash_rate, card_rate, note.as_deref())?;
    info!(discount_id = id, plate = %plate, by = %caller.user_id, "discount created");

    load_discount(&conn, id)
}

pub fn update_discount(
    state: &AppState,
    identity: Option<&Identity>,
    id: i64,
    update: UpdateDiscount,
) -> Result<DiscountRecord, AppError> {
    let cash_rate = validate_rate("cash_rate", update.cash_rate)?;
    let card_rate = validate_rate("card_rate", update.card_rate)?;
    let note = clean_note(update.note.as_deref());

    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let changed = conn.execute(
        "UPDATE discounts SET cash_rate = ?1, card_rate = ?2, note = ?3, active = ?4 WHERE id = ?5",
        params![cash_rate, card_rate, note, update.active, id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("discount {id}")));
    }

    info!(discount_id = id, by = %caller.user_id, "discount updated");
    load_discount(&conn, id)
}

/// Soft delete (`false`) or reactivate (`true`).
pub fn set_discount_active(
    state: &AppState,
    identity: Option<&Identity>,
    id: i64,
    active: bool,
) -> Result<DiscountRecord, AppError> {
    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let changed = conn.execute(
        "UPDATE discounts SET active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("discount {id}")));
    }

    info!(discount_id = id, active, by = %caller.user_id, "discount active flag changed");
    load_discount(&conn, id)
}

/// Admins see every record; staff only active ones.
pub fn list_discounts(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<DiscountRecord>, AppError> {
    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let sql = if caller.is_admin() {
        format!("SELECT {DISCOUNT_COLUMNS} FROM discounts ORDER BY active DESC, plate ASC")
    } else {
        format!("SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE active = 1 ORDER BY plate ASC")
    };

    let mut stmt = conn.prepare(&sql)?;
    let discounts = stmt
        .query_map([], map_discount)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(discounts)
}

/// Exact lookup of an active discount by plate, as typed at the pump.
pub fn find_discount(
    state: &AppState,
    identity: Option<&Identity>,
    plate: &str,
) -> Result<Option<DiscountRecord>, AppError> {
    let plate = normalize_plate(plate, state.config.workflow.max_plate_len)?;

    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    let discount = conn
        .query_row(
            &format!("SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE plate = ?1 AND active = 1"),
            [&plate],
            map_discount,
        )
        .optional()?;

    Ok(discount)
}

/// Active discounts whose plate contains the given fragment.
pub fn search_discounts(
    state: &AppState,
    identity: Option<&Identity>,
    fragment: &str,
) -> Result<Vec<DiscountRecord>, AppError> {
    let fragment = normalize_plate(fragment, state.config.workflow.max_plate_len)?;

    let conn = state.db.lock();
    resolve_caller(&conn, identity)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {DISCOUNT_COLUMNS} FROM discounts
         WHERE active = 1 AND instr(plate, ?1) > 0
         ORDER BY plate ASC
         LIMIT ?2"
    ))?;
    let discounts = stmt
        .query_map(
            params![fragment, state.config.workflow.history_limit],
            map_discount,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(discounts)
}
