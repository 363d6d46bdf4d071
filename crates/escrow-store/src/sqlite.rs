//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use escrow_api::{Params, Session, SessionFilter, SessionState};
use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

const SESSION_COLUMNS: &str = "id, driver, sponsor, vehicle_ref, charger_id, reserved, \
     proposed, state, start_ts, propose_ts, refund_timeout_secs, refund_timeout_nanos";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
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

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Escrow sessions; ids are dense and never reused
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY,
                driver TEXT NOT NULL,
                sponsor TEXT,
                vehicle_ref TEXT NOT NULL,
                charger_id TEXT NOT NULL,
                reserved INTEGER NOT NULL,
                proposed INTEGER,
                state TEXT NOT NULL,
                start_ts TEXT NOT NULL,
                propose_ts TEXT,
                refund_timeout_secs INTEGER NOT NULL,
                refund_timeout_nanos INTEGER NOT NULL
            );

            -- Driver -> charger trust; presence means trusted
            CREATE TABLE IF NOT EXISTS trust (
                driver TEXT NOT NULL,
                charger_id TEXT NOT NULL,
                PRIMARY KEY (driver, charger_id)
            );

            -- Escrow parameters (single row)
            CREATE TABLE IF NOT EXISTS params (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                min_deposit INTEGER NOT NULL,
                max_deposit INTEGER NOT NULL,
                refund_timeout_secs INTEGER NOT NULL,
                refund_timeout_nanos INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_sessions_driver ON sessions(driver);
            CREATE INDEX IF NOT EXISTS idx_sessions_charger ON sessions(charger_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Session columns as read, before timestamp and state parsing
struct SessionRow {
    id: u64,
    driver: String,
    sponsor: Option<String>,
    vehicle_ref: String,
    charger_id: String,
    reserved: u64,
    proposed: Option<u64>,
    state: String,
    start_ts: String,
    propose_ts: Option<String>,
    refund_timeout_secs: u64,
    refund_timeout_nanos: u32,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            driver: row.get(1)?,
            sponsor: row.get(2)?,
            vehicle_ref: row.get(3)?,
            charger_id: row.get(4)?,
            reserved: row.get(5)?,
            proposed: row.get(6)?,
            state: row.get(7)?,
            start_ts: row.get(8)?,
            propose_ts: row.get(9)?,
            refund_timeout_secs: row.get(10)?,
            refund_timeout_nanos: row.get(11)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        let state = SessionState::parse(&self.state).ok_or_else(|| {
            StoreError::Serialization(format!("unknown session state '{}'", self.state))
        })?;

        Ok(Session {
            id: SessionId::new(self.id),
            driver: AccountId::new(self.driver),
            sponsor: self.sponsor.map(AccountId::new),
            vehicle_ref: VehicleRef::new(self.vehicle_ref),
            charger_id: ChargerId::new(self.charger_id),
            reserved: self.reserved,
            proposed: self.proposed,
            state,
            start_ts: parse_timestamp(&self.start_ts)?,
            propose_ts: self.propose_ts.as_deref().map(parse_timestamp).transpose()?,
            refund_timeout: Duration::new(self.refund_timeout_secs, self.refund_timeout_nanos),
        })
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{s}': {e}")))
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str)?,
                event,
            });
        }

        Ok(events)
    }

    fn load_params(&self) -> StoreResult<Option<Params>> {
        let conn = self.conn()?;

        let params = conn
            .query_row(
                "SELECT min_deposit, max_deposit, refund_timeout_secs, refund_timeout_nanos \
                 FROM params WHERE id = 1",
                [],
                |row| {
                    Ok(Params {
                        min_deposit: row.get(0)?,
                        max_deposit: row.get(1)?,
                        refund_timeout: Duration::new(row.get(2)?, row.get(3)?),
                    })
                },
            )
            .optional()?;

        Ok(params)
    }

    fn save_params(&self, params: &Params) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO params (id, min_deposit, max_deposit, refund_timeout_secs, refund_timeout_nanos)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET
                min_deposit = excluded.min_deposit,
                max_deposit = excluded.max_deposit,
                refund_timeout_secs = excluded.refund_timeout_secs,
                refund_timeout_nanos = excluded.refund_timeout_nanos
            "#,
            params![
                params.min_deposit,
                params.max_deposit,
                params.refund_timeout.as_secs(),
                params.refund_timeout.subsec_nanos(),
            ],
        )?;

        debug!(?params, "Params saved");
        Ok(())
    }

    fn is_trusted(&self, driver: &AccountId, charger_id: &ChargerId) -> StoreResult<bool> {
        let conn = self.conn()?;

        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM trust WHERE driver = ? AND charger_id = ?",
                params![driver.as_str(), charger_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn set_trusted(
        &self,
        driver: &AccountId,
        charger_id: &ChargerId,
        trusted: bool,
    ) -> StoreResult<()> {
        let conn = self.conn()?;

        if trusted {
            conn.execute(
                "INSERT OR IGNORE INTO trust (driver, charger_id) VALUES (?, ?)",
                params![driver.as_str(), charger_id.as_str()],
            )?;
        } else {
            conn.execute(
                "DELETE FROM trust WHERE driver = ? AND charger_id = ?",
                params![driver.as_str(), charger_id.as_str()],
            )?;
        }

        debug!(driver = %driver, charger_id = %charger_id, trusted, "Trust updated");
        Ok(())
    }

    fn next_session_id(&self) -> StoreResult<SessionId> {
        let conn = self.conn()?;

        let max: Option<u64> = conn.query_row("SELECT MAX(id) FROM sessions", [], |row| {
            row.get(0)
        })?;

        match max {
            None => Ok(SessionId::FIRST),
            Some(id) => SessionId::new(id).next().ok_or(StoreError::IdsExhausted),
        }
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                session.id.get(),
                session.driver.as_str(),
                session.sponsor.as_ref().map(AccountId::as_str),
                session.vehicle_ref.as_str(),
                session.charger_id.as_str(),
                session.reserved,
                session.proposed,
                session.state.as_str(),
                session.start_ts.to_rfc3339(),
                session.propose_ts.map(|ts| ts.to_rfc3339()),
                session.refund_timeout.as_secs(),
                session.refund_timeout.subsec_nanos(),
            ],
        )?;

        debug!(session_id = %session.id, "Session inserted");
        Ok(())
    }

    fn update_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn()?;

        let changed = conn.execute(
            r#"
            UPDATE sessions SET
                driver = ?2, sponsor = ?3, vehicle_ref = ?4, charger_id = ?5,
                reserved = ?6, proposed = ?7, state = ?8, start_ts = ?9, propose_ts = ?10,
                refund_timeout_secs = ?11, refund_timeout_nanos = ?12
            WHERE id = ?1
            "#,
            params![
                session.id.get(),
                session.driver.as_str(),
                session.sponsor.as_ref().map(AccountId::as_str),
                session.vehicle_ref.as_str(),
                session.charger_id.as_str(),
                session.reserved,
                session.proposed,
                session.state.as_str(),
                session.start_ts.to_rfc3339(),
                session.propose_ts.map(|ts| ts.to_rfc3339()),
                session.refund_timeout.as_secs(),
                session.refund_timeout.subsec_nanos(),
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }

        debug!(session_id = %session.id, state = %session.state, "Session updated");
        Ok(())
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"),
                [id.get()],
                SessionRow::from_row,
            )
            .optional()?;

        row.map(SessionRow::into_session).transpose()
    }

    fn list_sessions(
        &self,
        filter: &SessionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE (?1 IS NULL OR driver = ?1) \
               AND (?2 IS NULL OR charger_id = ?2) \
               AND (?3 IS NULL OR state = ?3) \
             ORDER BY id LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![
                filter.driver.as_ref().map(AccountId::as_str),
                filter.charger_id.as_ref().map(ChargerId::as_str),
                filter.state.map(SessionState::as_str),
                limit,
            ],
            SessionRow::from_row,
        )?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }

        Ok(sessions)
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
