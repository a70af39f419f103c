//! Plate discount requests: staff submit, an admin approves or rejects.
//!
//! `pending --approve--> approved` creates the discount record in the same
//! transaction; `pending --reject--> rejected` touches nothing else. Both
//! terminal states are final. Every status write is conditioned on the row
//! still being pending, so a stale second decision surfaces as
//! [`AppError::AlreadyProcessed`].

use rusqlite::{params, Connection, OptionalExtension, Params};
use tracing::{info, warn};

use super::discounts::{insert_discount, load_discount, plate_exists};
use crate::auth::{require_admin, resolve_caller, Identity};
use crate::db::{is_unique_violation, now};
use crate::error::{AppError, ValidationError};
use crate::models::{
    ApprovePlateRequest, DiscountRecord, PlateRequest, RequestStatus, SubmitPlateRequest,
};
use crate::validation::{clean_note, normalize_plate, validate_rate};
use crate::AppState;

const REQUEST_COLUMNS: &str = "id, plate, note, status, requested_by, requested_by_name, \
     requested_by_email, created_at, processed_at, processed_by, processed_by_name, \
     cash_rate, card_rate, rejection_note, approved_discount_id";

fn map_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlateRequest> {
    Ok(PlateRequest {
        id: row.get(0)?,
        plate: row.get(1)?,
        note: row.get(2)?,
        status: row.get(3)?,
        requested_by: row.get(4)?,
        requested_by_name: row.get(5)?,
        requested_by_email: row.get(6)?,
        created_at: row.get(7)?,
        processed_at: row.get(8)?,
        processed_by: row.get(9)?,
        processed_by_name: row.get(10)?,
        cash_rate: row.get(11)?,
        card_rate: row.get(12)?,
        rejection_note: row.get(13)?,
        approved_discount_id: row.get(14)?,
    })
}

fn load_request(conn: &Connection, id: i64) -> Result<PlateRequest, AppError> {
    conn.query_row(
        &format!("SELECT {REQUEST_COLUMNS} FROM plate_requests WHERE id = ?1"),
        [id],
        map_request,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("plate request {id}")))
}

fn query_requests<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<PlateRequest>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM plate_requests {filter}"
    ))?;
    let requests = stmt
        .query_map(params, map_request)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

fn pending_exists(conn: &Connection, plate: &str) -> Result<bool, AppError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM plate_requests WHERE plate = ?1 AND status = ?2)",
        params![plate, RequestStatus::Pending],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn already_processed(request: &PlateRequest) -> AppError {
    warn!(request_id = request.id, status = %request.status, "plate request already processed");
    AppError::AlreadyProcessed {
        id: request.id,
        status: request.status,
    }
}

pub fn submit_plate_request(
    state: &AppState,
    identity: Option<&Identity>,
    request: SubmitPlateRequest,
) -> Result<PlateRequest, AppError> {
    let plate = normalize_plate(&request.plate, state.config.workflow.max_plate_len)?;
    let note = clean_note(request.note.as_deref());

    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    // Fast path; the unique indexes below are what actually guard the invariant
    if plate_exists(&conn, &plate)? {
        warn!(plate = %plate, "request for plate that already has a discount");
        return Err(AppError::DuplicateActiveDiscount(plate));
    }
    if pending_exists(&conn, &plate)? {
        warn!(plate = %plate, "request for plate with a pending request");
        return Err(AppError::DuplicatePendingRequest(plate));
    }

    conn.execute(
        "INSERT INTO plate_requests (plate, note, status, requested_by, requested_by_name, requested_by_email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            plate,
            note,
            RequestStatus::Pending,
            caller.user_id,
            caller.name,
            caller.email,
            now()
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::DuplicatePendingRequest(plate.clone())
        } else {
            e.into()
        }
    })?;

    let id = conn.last_insert_rowid();
    info!(request_id = id, plate = %plate, requested_by = %caller.user_id, "plate request submitted");

    load_request(&conn, id)
}

pub fn approve_plate_request(
    state: &AppState,
    identity: Option<&Identity>,
    request_id: i64,
    approval: ApprovePlateRequest,
) -> Result<DiscountRecord, AppError> {
    let cash_rate = validate_rate("cash_rate", approval.cash_rate)?;
    let card_rate = validate_rate("card_rate", approval.card_rate)?;

    let mut conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let tx = conn.transaction()?;

    let request = load_request(&tx, request_id)?;
    if request.status.is_terminal() {
        return Err(already_processed(&request));
    }
    if plate_exists(&tx, &request.plate)? {
        warn!(request_id, plate = %request.plate, "discount added through another path");
        return Err(AppError::DuplicateActiveDiscount(request.plate));
    }

    let note = clean_note(approval.note.as_deref()).or_else(|| request.note.clone());
    let discount_id = insert_discount(&tx, &request.plate, cash_rate, card_rate, note.as_deref())?;

    let updated = tx.execute(
        "UPDATE plate_requests
         SET status = ?1, processed_at = ?2, processed_by = ?3, processed_by_name = ?4,
             cash_rate = ?5, card_rate = ?6, rejection_note = NULL, approved_discount_id = ?7
         WHERE id = ?8 AND status = ?9",
        params![
            RequestStatus::Approved,
            now(),
            caller.user_id,
            caller.name,
            cash_rate,
            card_rate,
            discount_id,
            request_id,
            RequestStatus::Pending
        ],
    )?;
    if updated == 0 {
        // Dropping the transaction rolls the discount insert back
        let current = load_request(&tx, request_id)?;
        return Err(already_processed(&current));
    }

    let discount = load_discount(&tx, discount_id)?;
    tx.commit()?;

    info!(
        request_id,
        discount_id,
        plate = %discount.plate,
        cash_rate,
        card_rate,
        by = %caller.user_id,
        "plate request approved"
    );
    Ok(discount)
}

pub fn reject_plate_request(
    state: &AppState,
    identity: Option<&Identity>,
    request_id: i64,
    reason: &str,
) -> Result<(), AppError> {
    let reason = clean_note(Some(reason)).ok_or(ValidationError::MissingReason)?;

    let conn = state.db.lock();
    let caller = require_admin(&conn, identity)?;

    let request = load_request(&conn, request_id)?;
    if request.status.is_terminal() {
        return Err(already_processed(&request));
    }

    let updated = conn.execute(
        "UPDATE plate_requests
         SET status = ?1, processed_at = ?2, processed_by = ?3, processed_by_name = ?4, rejection_note = ?5
         WHERE id = ?6 AND status = ?7",
        params![
            RequestStatus::Rejected,
            now(),
            caller.user_id,
            caller.name,
            reason,
            request_id,
            RequestStatus::Pending
        ],
    )?;
    if updated == 0 {
        let current = load_request(&conn, request_id)?;
        return Err(already_processed(&current));
    }

    info!(request_id, plate = %request.plate, by = %caller.user_id, "plate request rejected");
    Ok(())
}

/// Admins or the original requester.
pub fn get_plate_request(
    state: &AppState,
    identity: Option<&Identity>,
    request_id: i64,
) -> Result<PlateRequest, AppError> {
    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let request = load_request(&conn, request_id)?;
    if !caller.is_admin() && request.requested_by != caller.user_id {
        return Err(AppError::Forbidden(format!(
            "plate request {request_id} belongs to another user"
        )));
    }
    Ok(request)
}

/// The admin review queue, newest first.
pub fn pending_plate_requests(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<PlateRequest>, AppError> {
    let conn = state.db.lock();
    require_admin(&conn, identity)?;

    query_requests(
        &conn,
        "WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        params![
            RequestStatus::Pending,
            state.config.workflow.pending_queue_limit
        ],
    )
}

/// Approved and rejected requests, most recently processed first.
pub fn processed_plate_requests(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<PlateRequest>, AppError> {
    let conn = state.db.lock();
    require_admin(&conn, identity)?;

    query_requests(
        &conn,
        "WHERE status <> ?1 ORDER BY processed_at DESC, id DESC LIMIT ?2",
        params![RequestStatus::Pending, state.config.workflow.history_limit],
    )
}

/// The caller's own requests in every state, newest first.
pub fn my_plate_requests(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<PlateRequest>, AppError> {
    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    query_requests(
        &conn,
        "WHERE requested_by = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        params![caller.user_id, state.config.workflow.history_limit],
    )
}
