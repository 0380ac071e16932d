//! SQLite-based store implementation

use chrono::{DateTime, Local, SubsecRound};
use parkgate_api::{Amount, ImageRef, SessionStatus, VehicleSession};
use parkgate_util::{
    IdentifierToken, PaymentMethodId, SessionId, TicketNumber, VehicleTypeId, from_epoch_ms,
    to_epoch_ms,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    AuditEvent, CloseRequest, NewEntry, SessionStore, StoreError, StoreResult,
};

const SESSION_COLUMNS: &str = "id, identifier, vehicle_type_id, entry_time_ms, exit_time_ms, \
     entry_image_ref, exit_image_ref, fee, payment_method_id, ticket_number, status";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Vehicle sessions; times are epoch milliseconds
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL,
                vehicle_type_id INTEGER NOT NULL,
                entry_time_ms INTEGER NOT NULL,
                exit_time_ms INTEGER,
                entry_image_ref TEXT NOT NULL,
                exit_image_ref TEXT,
                fee INTEGER,
                payment_method_id INTEGER,
                ticket_number TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL CHECK (status IN ('active', 'closed')),
                CHECK ((status = 'closed') = (fee IS NOT NULL)),
                CHECK (exit_time_ms IS NULL OR exit_time_ms > entry_time_ms)
            );

            -- At most one active session per identifier
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
                ON sessions(identifier) WHERE status = 'active';

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_entry_time ON sessions(entry_time_ms);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn check_deadline(deadline: Option<Instant>) -> StoreResult<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(StoreError::DeadlineExceeded),
        _ => Ok(()),
    }
}

/// Largest fee the INTEGER column holds
const MAX_STORED_FEE: Amount = Amount(i64::MAX as u64);

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Local>> {
    let ms: i64 = row.get(idx)?;
    from_epoch_ms(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<VehicleSession> {
    let status_str: String = row.get(10)?;
    let status = SessionStatus::parse(&status_str)
        .ok_or_else(|| conversion_error(10, Type::Text, format!("unknown status: {}", status_str)))?;

    let exit_time = match row.get::<_, Option<i64>>(4)? {
        Some(_) => Some(time_column(row, 4)?),
        None => None,
    };

    Ok(VehicleSession {
        id: SessionId::new(row.get(0)?),
        identifier: IdentifierToken::new(row.get::<_, String>(1)?),
        vehicle_type_id: VehicleTypeId(row.get(2)?),
        entry_time: time_column(row, 3)?,
        exit_time,
        entry_image_ref: ImageRef::new(row.get::<_, String>(5)?),
        exit_image_ref: row.get::<_, Option<String>>(6)?.map(ImageRef::new),
        fee: row
            .get::<_, Option<i64>>(7)?
            .map(|fee| Amount(u64::try_from(fee).unwrap_or(0))),
        payment_method_id: row.get::<_, Option<u32>>(8)?.map(PaymentMethodId),
        ticket_number: TicketNumber::new(row.get::<_, String>(9)?),
        status,
    })
}

impl SessionStore for SqliteStore {
    fn insert_entry(&self, entry: &NewEntry) -> StoreResult<SessionId> {
        let mut conn = self.lock()?;
        check_deadline(entry.deadline)?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sessions
                (identifier, vehicle_type_id, entry_time_ms, entry_image_ref, ticket_number, status)
            VALUES (?, ?, ?, ?, ?, 'active')
            "#,
            params![
                entry.identifier.as_str(),
                entry.vehicle_type_id.0,
                to_epoch_ms(&entry.entry_time),
                entry.entry_image_ref.as_str(),
                entry.ticket_number.as_str(),
            ],
        )?;

        let id = SessionId::new(tx.last_insert_rowid());

        if let Err(e) = check_deadline(entry.deadline) {
            warn!(identifier = %entry.identifier, "Entry insert overran its deadline, rolling back");
            return Err(e);
        }
        tx.commit()?;

        debug!(session_id = %id, identifier = %entry.identifier, "Session opened");
        Ok(id)
    }

    fn close_open_session(
        &self,
        request: &CloseRequest,
        fee: &dyn Fn(&VehicleSession) -> Amount,
    ) -> StoreResult<VehicleSession> {
        let mut conn = self.lock()?;
        check_deadline(request.deadline)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let open = tx
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE identifier = ? AND status = 'active' \
                     ORDER BY entry_time_ms DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                [request.identifier.as_str()],
                session_from_row,
            )
            .optional()?;

        // Dropping `tx` on an early return rolls back
        let Some(mut session) = open else {
            debug!(identifier = %request.identifier, "No active session to close");
            return Err(StoreError::NotFound(request.identifier.clone()));
        };

        let exit_time = request.exit_time.trunc_subsecs(3);
        if exit_time <= session.entry_time {
            return Err(StoreError::InvalidExitTime {
                entry_time: session.entry_time,
                exit_time,
            });
        }

        session.exit_time = Some(exit_time);
        let amount = fee(&session).min(MAX_STORED_FEE);

        let updated = tx.execute(
            r#"
            UPDATE sessions
            SET exit_time_ms = ?, exit_image_ref = ?, fee = ?, payment_method_id = ?,
                status = 'closed'
            WHERE id = ? AND status = 'active'
            "#,
            params![
                to_epoch_ms(&exit_time),
                request.exit_image_ref.as_str(),
                amount.0 as i64,
                request.payment_method_id.0,
                session.id.get(),
            ],
        )?;

        if updated != 1 {
            return Err(StoreError::NotFound(request.identifier.clone()));
        }

        if let Err(e) = check_deadline(request.deadline) {
            warn!(identifier = %request.identifier, "Close overran its deadline, rolling back");
            return Err(e);
        }
        tx.commit()?;

        session.exit_image_ref = Some(request.exit_image_ref.clone());
        session.fee = Some(amount);
        session.payment_method_id = Some(request.payment_method_id);
        session.status = SessionStatus::Closed;

        info!(
            session_id = %session.id,
            identifier = %session.identifier,
            fee = %amount,
            "Session closed"
        );
        Ok(session)
    }

    fn get_active_sessions(&self) -> StoreResult<Vec<VehicleSession>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE status = 'active' ORDER BY entry_time_ms ASC, id ASC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<VehicleSession>> {
        let conn = self.lock()?;

        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
                [id.get()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![parkgate_util::format_timestamp(&event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| parkgate_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
