use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, Result};
use tracing::{debug, warn};

use crate::error::AppError;

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. A poisoned lock is recovered: a transaction that
    /// was open when its holder panicked has already rolled back on drop.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("store lock poisoned by a panicked caller, recovering");
            self.conn.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn initialize(&self) -> std::result::Result<(), AppError> {
        let conn = self.lock();

        conn.execute_batch(
            "
            -- Role directory: identity id -> display name and role
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT,
                role TEXT NOT NULL DEFAULT 'staff',
                created_at TEXT NOT NULL
            );

            -- Discounts, one per normalized plate
            CREATE TABLE IF NOT EXISTS discounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plate TEXT NOT NULL UNIQUE,
                cash_rate REAL NOT NULL,
                card_rate REAL NOT NULL,
                note TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            -- Staff-submitted discount requests
            CREATE TABLE IF NOT EXISTS plate_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plate TEXT NOT NULL,
                note TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                requested_by TEXT NOT NULL,
                requested_by_name TEXT,
                requested_by_email TEXT,
                created_at TEXT NOT NULL,
                processed_at TEXT,
                processed_by TEXT,
                processed_by_name TEXT,
                cash_rate REAL,
                card_rate REAL,
                rejection_note TEXT,
                approved_discount_id INTEGER REFERENCES discounts(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS plate_requests_one_pending
                ON plate_requests (plate) WHERE status = 'pending';

            -- Exit checklist template
            CREATE TABLE IF NOT EXISTS checklist_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            -- Shift handovers
            CREATE TABLE IF NOT EXISTS shift_handovers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incoming_user TEXT NOT NULL,
                outgoing_user TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                approver_note TEXT,
                approved_at TEXT,
                CHECK (incoming_user <> outgoing_user)
            );

            -- Checklist answers, owned by a handover
            CREATE TABLE IF NOT EXISTS handover_answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handover_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                note TEXT,
                UNIQUE (handover_id, item_id),
                FOREIGN KEY (handover_id) REFERENCES shift_handovers(id),
                FOREIGN KEY (item_id) REFERENCES checklist_items(id)
            );

            -- Discounted fuel sales
            CREATE TABLE IF NOT EXISTS sales (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discount_id INTEGER NOT NULL,
                fuel_type TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                liters REAL NOT NULL,
                price_per_liter REAL NOT NULL,
                gross_total REAL NOT NULL,
                discount_rate REAL NOT NULL,
                net_total REAL NOT NULL,
                staff_id TEXT NOT NULL,
                note TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (discount_id) REFERENCES discounts(id)
            );

            -- Cleaning operations staff can tick off
            CREATE TABLE IF NOT EXISTS cleaning_operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                active INTEGER NOT NULL DEFAULT 1
            );

            -- Cleaning visits
            CREATE TABLE IF NOT EXISTS cleaning_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                staff_id TEXT NOT NULL,
                performed_at TEXT NOT NULL,
                note TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cleaning_log_operations (
                log_id INTEGER NOT NULL,
                operation_id INTEGER NOT NULL,
                PRIMARY KEY (log_id, operation_id),
                FOREIGN KEY (log_id) REFERENCES cleaning_logs(id),
                FOREIGN KEY (operation_id) REFERENCES cleaning_operations(id)
            );
            ",
        )?;

        // Files from earlier versions lack some plate_requests columns
        Self::migrate_conn(&conn)?;

        Ok(())
    }

    fn migrate_conn(conn: &Connection) -> Result<()> {
        // Files created before rejection notes and the approved discount back-reference
        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(plate_requests)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>>>()?;

        if !columns.iter().any(|c| c == "rejection_note") {
            debug!("adding plate_requests.rejection_note");
            conn.execute("ALTER TABLE plate_requests ADD COLUMN rejection_note TEXT", [])?;
        }
        if !columns.iter().any(|c| c == "approved_discount_id") {
            debug!("adding plate_requests.approved_discount_id");
            conn.execute(
                "ALTER TABLE plate_requests ADD COLUMN approved_discount_id INTEGER REFERENCES discounts(id)",
                [],
            )?;
        }

        Ok(())
    }
}

/// Current UTC time as stored in every timestamp column. Millisecond
/// precision keeps newest-first ordering stable for rapid inserts.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// True when the store refused a write because of a UNIQUE or PRIMARY KEY
/// constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let conn = db.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('plate_requests') WHERE name = 'approved_discount_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unique_violation_is_detected() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.lock();

        let insert = "INSERT INTO discounts (plate, cash_rate, card_rate, created_at) VALUES ('34ABC123', 5, 3, ?1)";
        conn.execute(insert, [now()]).unwrap();
        let err = conn.execute(insert, [now()]).unwrap_err();
        assert!(is_unique_violation(&err));

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(!is_unique_violation(&other));
    }

    #[test]
    fn primary_key_violation_counts_as_unique() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.lock();

        let insert = "INSERT INTO users (user_id, name, role, created_at) VALUES ('u1', 'Mehmet', 'staff', ?1)";
        conn.execute(insert, [now()]).unwrap();
        let err = conn.execute(insert, [now()]).unwrap_err();
        assert!(is_unique_violation(&err));

        let not_null = conn
            .execute("INSERT INTO users (user_id, role, created_at) VALUES ('u2', 'staff', ?1)", [now()])
            .unwrap_err();
        assert!(!is_unique_violation(&not_null));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let panicked = std::thread::scope(|s| {
            s.spawn(|| {
                let mut conn = db.lock();
                let tx = conn.transaction().unwrap();
                tx.execute(
                    "INSERT INTO discounts (plate, cash_rate, card_rate, created_at) VALUES ('34ABC123', 5, 3, ?1)",
                    [now()],
                )
                .unwrap();
                panic!("caller crashed mid-transaction");
            })
            .join()
            .is_err()
        });
        assert!(panicked);
        assert!(db.conn.is_poisoned());

        let conn = db.lock();
        assert!(!db.conn.is_poisoned());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM discounts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn only_one_pending_request_per_plate() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.lock();

        let insert = "INSERT INTO plate_requests (plate, status, requested_by, created_at) VALUES ('06XYZ99', ?1, 'u1', ?2)";
        conn.execute(insert, ["pending".to_string(), now()]).unwrap();
        conn.execute(insert, ["rejected".to_string(), now()]).unwrap();
        let err = conn.execute(insert, ["pending".to_string(), now()]).unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
