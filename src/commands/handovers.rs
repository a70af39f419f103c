//! Shift handovers: the incoming staff member opens one with the exit
//! checklist, only the named outgoing member may approve or reject it.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Params};
use tracing::{info, warn};

use super::checklist::ensure_active_item;
use crate::auth::{lookup_profile, require_admin, resolve_caller, Identity};
use crate::db::now;
use crate::error::{AppError, ValidationError};
use crate::models::{
    ChecklistAnswer, HandoverWithAnswers, RequestStatus, ShiftHandover, StartHandover,
};
use crate::validation::clean_note;
use crate::AppState;

const HANDOVER_SELECT: &str = "SELECT h.id, h.incoming_user, u.name, h.outgoing_user, h.status, \
     h.created_at, h.approver_note, h.approved_at \
     FROM shift_handovers h LEFT JOIN users u ON u.user_id = h.incoming_user";

fn map_handover(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShiftHandover> {
    Ok(ShiftHandover {
        id: row.get(0)?,
        incoming_user: row.get(1)?,
        incoming_user_name: row.get(2)?,
        outgoing_user: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        approver_note: row.get(6)?,
        approved_at: row.get(7)?,
    })
}

fn query_handovers<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<ShiftHandover>, AppError> {
    let mut stmt = conn.prepare(&format!("{HANDOVER_SELECT} {filter}"))?;
    let handovers = stmt
        .query_map(params, map_handover)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(handovers)
}

fn load_with_answers(conn: &Connection, id: i64) -> Result<HandoverWithAnswers, AppError> {
    let handover = conn
        .query_row(&format!("{HANDOVER_SELECT} WHERE h.id = ?1"), [id], map_handover)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("handover {id}")))?;

    let mut stmt = conn.prepare(
        "SELECT a.id, a.handover_id, a.item_id, c.title, a.passed, a.note
         FROM handover_answers a
         LEFT JOIN checklist_items c ON c.id = a.item_id
         WHERE a.handover_id = ?1
         ORDER BY c.sort_order ASC, a.item_id ASC",
    )?;
    let answers = stmt
        .query_map([id], |row| {
            Ok(ChecklistAnswer {
                id: row.get(0)?,
                handover_id: row.get(1)?,
                item_id: row.get(2)?,
                item_title: row.get(3)?,
                passed: row.get(4)?,
                note: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HandoverWithAnswers { handover, answers })
}

/// Open a pending handover with its checklist answers. The handover row and
/// every answer are written in one transaction: if any answer is rejected
/// nothing is kept.
pub fn start_handover(
    state: &AppState,
    identity: Option<&Identity>,
    start: StartHandover,
) -> Result<HandoverWithAnswers, AppError> {
    let outgoing = start.outgoing_user.trim().to_string();

    let mut conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    if outgoing.is_empty() || outgoing == caller.user_id {
        return Err(ValidationError::InvalidParticipants.into());
    }

    let mut seen = HashSet::new();
    for answer in &start.answers {
        if !seen.insert(answer.item_id) {
            return Err(ValidationError::DuplicateChecklistItem(answer.item_id).into());
        }
    }

    if lookup_profile(&conn, &outgoing)?.is_none() {
        return Err(AppError::NotFound(format!("user {outgoing}")));
    }

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO shift_handovers (incoming_user, outgoing_user, status, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![caller.user_id, outgoing, RequestStatus::Pending, now()],
    )?;
    let handover_id = tx.last_insert_rowid();

    for answer in &start.answers {
        ensure_active_item(&tx, answer.item_id)?;
        tx.execute(
            "INSERT INTO handover_answers (handover_id, item_id, passed, note) VALUES (?1, ?2, ?3, ?4)",
            params![
                handover_id,
                answer.item_id,
                answer.passed,
                clean_note(answer.note.as_deref())
            ],
        )?;
    }

    let created = load_with_answers(&tx, handover_id)?;
    tx.commit()?;

    info!(
        handover_id,
        incoming = %caller.user_id,
        outgoing = %outgoing,
        answers = created.answers.len(),
        "shift handover started"
    );
    Ok(created)
}

/// Approve or reject a pending handover. The update itself carries both the
/// `status = pending` and the `outgoing_user = actor` conditions, so a
/// repeated decision or a decision by anyone else changes no row.
pub fn decide_handover(
    state: &AppState,
    identity: Option<&Identity>,
    handover_id: i64,
    approve: bool,
    note: Option<&str>,
) -> Result<(), AppError> {
    let note = clean_note(note);
    let status = if approve {
        RequestStatus::Approved
    } else {
        RequestStatus::Rejected
    };

    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let updated = conn.execute(
        "UPDATE shift_handovers SET status = ?1, approver_note = ?2, approved_at = ?3
         WHERE id = ?4 AND status = ?5 AND outgoing_user = ?6",
        params![
            status,
            note,
            now(),
            handover_id,
            RequestStatus::Pending,
            caller.user_id
        ],
    )?;

    if updated == 0 {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM shift_handovers WHERE id = ?1)",
            [handover_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(AppError::NotFound(format!("handover {handover_id}")));
        }
        warn!(handover_id, actor = %caller.user_id, "handover decision changed no row");
        return Err(AppError::AlreadyDecided(handover_id));
    }

    info!(handover_id, %status, actor = %caller.user_id, "shift handover decided");
    Ok(())
}

/// Handovers waiting on the caller as the outgoing member, newest first.
pub fn pending_handovers(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<ShiftHandover>, AppError> {
    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    query_handovers(
        &conn,
        "WHERE h.outgoing_user = ?1 AND h.status = ?2 ORDER BY h.created_at DESC, h.id DESC LIMIT ?3",
        params![
            caller.user_id,
            RequestStatus::Pending,
            state.config.workflow.pending_queue_limit
        ],
    )
}

/// One handover with its answers; visible to its two participants and admins.
pub fn get_handover(
    state: &AppState,
    identity: Option<&Identity>,
    handover_id: i64,
) -> Result<HandoverWithAnswers, AppError> {
    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let found = load_with_answers(&conn, handover_id)?;
    let participant = found.handover.incoming_user == caller.user_id
        || found.handover.outgoing_user == caller.user_id;
    if !participant && !caller.is_admin() {
        return Err(AppError::Forbidden(format!(
            "not a participant of handover {handover_id}"
        )));
    }
    Ok(found)
}

/// Full handover history for admins, newest first.
pub fn list_handovers(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Vec<ShiftHandover>, AppError> {
    let conn = state.db.lock();
    require_admin(&conn, identity)?;

    query_handovers(
        &conn,
        "ORDER BY h.created_at DESC, h.id DESC LIMIT ?1",
        params![state.config.workflow.history_limit],
    )
}
