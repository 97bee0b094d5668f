//! libSQL backend: async `SessionRegistry` implementation.
//!
//! Supports local file and in-memory databases. Multi-statement writes run
//! inside a transaction; a write lock keeps transactions on the shared
//! connection from interleaving.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::session::{
    AgentType, EventType, NewEvent, NewSession, Session, SessionEvent, SessionScope,
    SessionStatus, SessionUpdate,
};
use crate::store::migrations;
use crate::store::traits::SessionRegistry;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;
        migrations::run_migrations(self.conn()).await
    }

    async fn begin(&self) -> Result<libsql::Transaction, DatabaseError> {
        self.conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))
    }

    /// Move a non-terminal session to a terminal status with a `status_changed` event.
    async fn terminate(
        &self,
        thread_id: &str,
        status: SessionStatus,
        detail: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result = terminate_in(&tx, thread_id, status, detail).await;
        finish(tx, result).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, thread_id, agent_type, location_id, user_id, agency_id, \
     status, current_step, state_data, checkpoint_data, metadata, version, \
     created_at, updated_at, expires_at";

const EVENT_COLUMNS: &str = "id, session_id, seq, event_type, node_name, event_data, timestamp";

const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed', 'expired')";

/// Canonical timestamp text. Fixed precision so string order matches time order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json_text(value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn query_err(context: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{context}: {e}"))
}

/// Map a libsql Row to a Session.
///
/// Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err("session.id"))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Query(format!("session.id parse: {e}")))?;
    let thread_id: String = row.get(1).map_err(query_err("session.thread_id"))?;
    let agent_type_str: String = row.get(2).map_err(query_err("session.agent_type"))?;
    let location_id: String = row.get(3).map_err(query_err("session.location_id"))?;
    let user_id: Option<String> = row.get(4).ok();
    let agency_id: Option<String> = row.get(5).ok();
    let status_str: String = row.get(6).map_err(query_err("session.status"))?;
    let current_step: String = row.get(7).map_err(query_err("session.current_step"))?;
    let state_str: String = row.get(8).unwrap_or_else(|_| "{}".to_string());
    let checkpoint_data: Option<String> = row.get(9).ok();
    let metadata_str: String = row.get(10).unwrap_or_else(|_| "{}".to_string());
    let version: i64 = row.get(11).map_err(query_err("session.version"))?;
    let created_str: String = row.get(12).map_err(query_err("session.created_at"))?;
    let updated_str: String = row.get(13).map_err(query_err("session.updated_at"))?;
    let expires_str: String = row.get(14).map_err(query_err("session.expires_at"))?;

    Ok(Session {
        id,
        thread_id,
        agent_type: agent_type_str.parse::<AgentType>().map_err(DatabaseError::Query)?,
        location_id,
        user_id,
        agency_id,
        status: status_str.parse::<SessionStatus>().map_err(DatabaseError::Query)?,
        current_step,
        state_data: serde_json::from_str(&state_str).unwrap_or(serde_json::json!({})),
        checkpoint_data,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        version,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        expires_at: parse_datetime(&expires_str),
    })
}

/// Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<SessionEvent, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err("event.id"))?;
    let session_str: String = row.get(1).map_err(query_err("event.session_id"))?;
    let seq: i64 = row.get(2).map_err(query_err("event.seq"))?;
    let type_str: String = row.get(3).map_err(query_err("event.event_type"))?;
    let node_name: Option<String> = row.get(4).ok();
    let data_str: String = row.get(5).unwrap_or_else(|_| "{}".to_string());
    let ts_str: String = row.get(6).map_err(query_err("event.timestamp"))?;

    Ok(SessionEvent {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Query(format!("event.id parse: {e}")))?,
        session_id: Uuid::parse_str(&session_str)
            .map_err(|e| DatabaseError::Query(format!("event.session_id parse: {e}")))?,
        seq,
        event_type: type_str.parse::<EventType>().map_err(DatabaseError::Query)?,
        node_name,
        event_data: serde_json::from_str(&data_str).unwrap_or(serde_json::json!({})),
        timestamp: parse_datetime(&ts_str),
    })
}

async fn fetch_session(conn: &Connection, thread_id: &str) -> Result<Option<Session>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE thread_id = ?1"),
            params![thread_id],
        )
        .await
        .map_err(query_err("get_session"))?;

    match rows.next().await.map_err(query_err("get_session"))? {
        Some(row) => Ok(Some(row_to_session(&row)?)),
        None => Ok(None),
    }
}

async fn require_session(conn: &Connection, thread_id: &str) -> Result<Session, DatabaseError> {
    fetch_session(conn, thread_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "session".to_string(),
            id: thread_id.to_string(),
        })
}

/// Explain why a guarded update touched no rows.
async fn rejection(
    conn: &Connection,
    thread_id: &str,
    expected_version: Option<i64>,
) -> DatabaseError {
    match require_session(conn, thread_id).await {
        Err(e) => e,
        Ok(session) if session.status.is_terminal() => DatabaseError::TerminalSession {
            thread_id: thread_id.to_string(),
            status: session.status.to_string(),
        },
        Ok(session) => DatabaseError::VersionConflict {
            thread_id: thread_id.to_string(),
            expected: expected_version.unwrap_or(session.version),
            actual: session.version,
        },
    }
}

/// Append events for one session. Timestamps never go backwards within a session.
async fn insert_events(
    conn: &Connection,
    session_id: Uuid,
    events: &[NewEvent],
) -> Result<Vec<SessionEvent>, DatabaseError> {
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let mut rows = conn
        .query(
            "SELECT MAX(timestamp) FROM onboarding_events WHERE session_id = ?1",
            params![session_id.to_string()],
        )
        .await
        .map_err(query_err("last event timestamp"))?;
    let last: Option<DateTime<Utc>> = match rows.next().await.map_err(query_err("last event timestamp"))? {
        Some(row) => row.get::<String>(0).ok().map(|s| parse_datetime(&s)),
        None => None,
    };

    let now = Utc::now();
    let timestamp = match last {
        Some(last) if last > now => last,
        _ => now,
    };
    let ts = fmt_ts(&timestamp);

    let mut inserted = Vec::with_capacity(events.len());
    for event in events {
        let id = Uuid::new_v4();
        let data = to_json_text(&event.event_data)?;
        conn.execute(
            "INSERT INTO onboarding_events (id, session_id, event_type, node_name, event_data, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                session_id.to_string(),
                event.event_type.as_str(),
                opt_text(event.node_name.as_deref()),
                data,
                ts.clone()
            ],
        )
        .await
        .map_err(query_err("insert event"))?;

        inserted.push(SessionEvent {
            id,
            session_id,
            seq: conn.last_insert_rowid(),
            event_type: event.event_type,
            node_name: event.node_name.clone(),
            event_data: event.event_data.clone(),
            timestamp,
        });
    }
    Ok(inserted)
}

async fn terminate_in(
    conn: &Connection,
    thread_id: &str,
    status: SessionStatus,
    detail: Option<&str>,
) -> Result<bool, DatabaseError> {
    let session = require_session(conn, thread_id).await?;
    if session.status.is_terminal() {
        return Ok(false);
    }

    let mut metadata = session.metadata.clone();
    if let (Some(detail), Some(map)) = (detail, metadata.as_object_mut()) {
        map.insert("last_error".into(), serde_json::json!(detail));
    }

    let changed = conn
        .execute(
            &format!(
                "UPDATE onboarding_sessions
                 SET status = ?1, metadata = ?2, updated_at = ?3, version = version + 1
                 WHERE thread_id = ?4 AND {NOT_TERMINAL}"
            ),
            params![
                status.as_str(),
                to_json_text(&metadata)?,
                fmt_ts(&Utc::now()),
                thread_id
            ],
        )
        .await
        .map_err(query_err("terminate session"))?;
    if changed == 0 {
        return Ok(false);
    }

    let mut data = serde_json::json!({ "from": session.status, "to": status });
    if let Some(detail) = detail {
        data["error"] = serde_json::json!(detail);
    }
    insert_events(
        conn,
        session.id,
        &[NewEvent::new(EventType::StatusChanged, Some(&session.current_step)).with_data(data)],
    )
    .await?;
    Ok(true)
}

/// Commit on success, roll back on error.
async fn finish<T>(
    tx: libsql::Transaction,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                debug!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

fn scope_filter(scope: &SessionScope) -> (&'static str, &str) {
    match scope {
        SessionScope::Location(id) => ("location_id", id.as_str()),
        SessionScope::Agency(id) => ("agency_id", id.as_str()),
    }
}

async fn collect_sessions(mut rows: libsql::Rows) -> Result<Vec<Session>, DatabaseError> {
    let mut sessions = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("list sessions"))? {
        sessions.push(row_to_session(&row)?);
    }
    Ok(sessions)
}

// ── SessionRegistry implementation ──────────────────────────────────

#[async_trait]
impl SessionRegistry for LibSqlBackend {
    async fn create_session(&self, new: &NewSession) -> Result<Session, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());

        let result = conn
            .execute(
                "INSERT INTO onboarding_sessions
                 (id, thread_id, agent_type, location_id, user_id, agency_id, status,
                  current_step, state_data, metadata, version, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}', '{}', 0, ?9, ?9, ?10)",
                params![
                    id.to_string(),
                    new.thread_id.as_str(),
                    new.agent_type.as_str(),
                    new.location_id.as_str(),
                    opt_text(new.tenant.user_id.as_deref()),
                    opt_text(new.tenant.agency_id.as_deref()),
                    new.status.as_str(),
                    new.current_step.as_str(),
                    now,
                    fmt_ts(&new.expires_at)
                ],
            )
            .await;

        if let Err(e) = result {
            let message = e.to_string();
            if message.contains("UNIQUE") {
                return Err(DatabaseError::DuplicateThreadId(new.thread_id.clone()));
            }
            return Err(DatabaseError::Query(format!("create_session: {message}")));
        }

        debug!(thread_id = %new.thread_id, session_id = %id, "Session created");
        require_session(conn, &new.thread_id).await
    }

    async fn get_session(&self, thread_id: &str) -> Result<Option<Session>, DatabaseError> {
        fetch_session(self.conn(), thread_id).await
    }

    async fn update_state(
        &self,
        thread_id: &str,
        state_data: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();
        let changed = conn
            .execute(
                &format!(
                    "UPDATE onboarding_sessions
                     SET state_data = ?1, updated_at = ?2, version = version + 1
                     WHERE thread_id = ?3 AND {NOT_TERMINAL}"
                ),
                params![to_json_text(state_data)?, fmt_ts(&Utc::now()), thread_id],
            )
            .await
            .map_err(query_err("update_state"))?;
        if changed == 0 {
            return Err(rejection(conn, thread_id, None).await);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        thread_id: &str,
        status: SessionStatus,
        current_step: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result: Result<(), DatabaseError> = async {
            let session = require_session(&tx, thread_id).await?;
            let changed = tx
                .execute(
                    &format!(
                        "UPDATE onboarding_sessions
                         SET status = ?1, current_step = ?2, updated_at = ?3, version = version + 1
                         WHERE thread_id = ?4 AND {NOT_TERMINAL}"
                    ),
                    params![status.as_str(), current_step, fmt_ts(&Utc::now()), thread_id],
                )
                .await
                .map_err(query_err("update_status"))?;
            if changed == 0 {
                return Err(rejection(&tx, thread_id, None).await);
            }
            if session.status != status {
                let event = NewEvent::new(EventType::StatusChanged, Some(current_step))
                    .with_data(serde_json::json!({ "from": session.status, "to": status }));
                insert_events(&tx, session.id, &[event]).await?;
            }
            Ok(())
        }
        .await;
        finish(tx, result).await
    }

    async fn save_checkpoint(
        &self,
        thread_id: &str,
        checkpoint_data: &str,
        current_step: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn();
        let changed = conn
            .execute(
                &format!(
                    "UPDATE onboarding_sessions
                     SET checkpoint_data = ?1, current_step = ?2, updated_at = ?3,
                         version = version + 1
                     WHERE thread_id = ?4 AND {NOT_TERMINAL}"
                ),
                params![checkpoint_data, current_step, fmt_ts(&Utc::now()), thread_id],
            )
            .await
            .map_err(query_err("save_checkpoint"))?;
        if changed == 0 {
            return Err(rejection(conn, thread_id, None).await);
        }
        Ok(())
    }

    async fn get_checkpoint(&self, thread_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(require_session(self.conn(), thread_id).await?.checkpoint_data)
    }

    async fn commit_transition(
        &self,
        thread_id: &str,
        expected_version: i64,
        update: &SessionUpdate,
        events: &[NewEvent],
    ) -> Result<Session, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self.begin().await?;
        let result: Result<Session, DatabaseError> = async {
            let changed = tx
                .execute(
                    &format!(
                        "UPDATE onboarding_sessions
                         SET status = ?1, current_step = ?2,
                             checkpoint_data = COALESCE(?3, checkpoint_data),
                             state_data = ?4, metadata = ?5, expires_at = ?6, updated_at = ?7,
                             version = version + 1
                         WHERE thread_id = ?8 AND version = ?9 AND {NOT_TERMINAL}"
                    ),
                    params![
                        update.status.as_str(),
                        update.current_step.as_str(),
                        opt_text(update.checkpoint_data.as_deref()),
                        to_json_text(&update.state_data)?,
                        to_json_text(&update.metadata)?,
                        fmt_ts(&update.expires_at),
                        fmt_ts(&Utc::now()),
                        thread_id,
                        expected_version
                    ],
                )
                .await
                .map_err(query_err("commit_transition"))?;
            if changed == 0 {
                return Err(rejection(&tx, thread_id, Some(expected_version)).await);
            }

            let session = require_session(&tx, thread_id).await?;
            insert_events(&tx, session.id, events).await?;
            Ok(session)
        }
        .await;

        let session = finish(tx, result).await?;
        debug!(
            thread_id,
            status = %session.status,
            version = session.version,
            events = events.len(),
            "Transition committed"
        );
        Ok(session)
    }

    async fn list_sessions(
        &self,
        scope: &SessionScope,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<Session>, DatabaseError> {
        let (column, value) = scope_filter(scope);
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM onboarding_sessions
                     WHERE {column} = ?1 AND expires_at > ?2 AND (?3 IS NULL OR status = ?3)
                     ORDER BY updated_at DESC, id
                     LIMIT ?4"
                ),
                params![
                    value,
                    fmt_ts(&Utc::now()),
                    opt_text(status.map(|s| s.as_str())),
                    limit as i64
                ],
            )
            .await
            .map_err(query_err("list_sessions"))?;
        collect_sessions(rows).await
    }

    async fn list_active(&self, scope: &SessionScope) -> Result<Vec<Session>, DatabaseError> {
        let (column, value) = scope_filter(scope);
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM onboarding_sessions
                     WHERE {column} = ?1 AND expires_at > ?2 AND {NOT_TERMINAL}
                     ORDER BY updated_at DESC, id"
                ),
                params![value, fmt_ts(&Utc::now())],
            )
            .await
            .map_err(query_err("list_active"))?;
        collect_sessions(rows).await
    }

    async fn complete(&self, thread_id: &str) -> Result<bool, DatabaseError> {
        self.terminate(thread_id, SessionStatus::Completed, None).await
    }

    async fn fail(&self, thread_id: &str, error_detail: &str) -> Result<bool, DatabaseError> {
        self.terminate(thread_id, SessionStatus::Failed, Some(error_detail))
            .await
    }

    async fn expire(&self, thread_id: &str) -> Result<bool, DatabaseError> {
        self.terminate(thread_id, SessionStatus::Expired, None).await
    }

    async fn cleanup_expired(&self) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let now = fmt_ts(&Utc::now());
        let tx = self.begin().await?;
        let result: Result<usize, DatabaseError> = async {
            tx.execute(
                "DELETE FROM onboarding_events WHERE session_id IN
                 (SELECT id FROM onboarding_sessions WHERE expires_at < ?1)",
                params![now.clone()],
            )
            .await
            .map_err(query_err("cleanup events"))?;
            let removed = tx
                .execute(
                    "DELETE FROM onboarding_sessions WHERE expires_at < ?1",
                    params![now.clone()],
                )
                .await
                .map_err(query_err("cleanup sessions"))?;
            Ok(removed as usize)
        }
        .await;

        let removed = finish(tx, result).await?;
        if removed > 0 {
            info!(removed, "Expired onboarding sessions cleaned up");
        }
        Ok(removed)
    }

    async fn log_event(
        &self,
        session_id: Uuid,
        event_type: EventType,
        node_name: Option<&str>,
        event_data: Option<&serde_json::Value>,
    ) -> Result<SessionEvent, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut event = NewEvent::new(event_type, node_name);
        if let Some(data) = event_data {
            event = event.with_data(data.clone());
        }
        let mut inserted = insert_events(self.conn(), session_id, &[event]).await?;
        inserted.pop().ok_or_else(|| DatabaseError::Query("event not inserted".to_string()))
    }

    async fn get_events(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM onboarding_events
                     WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2"
                ),
                params![session_id.to_string(), limit as i64],
            )
            .await
            .map_err(query_err("get_events"))?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("get_events"))? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::session::TenantRefs;
    use chrono::Duration;

    fn new_session(thread_id: &str, location: &str, agency: Option<&str>) -> NewSession {
        NewSession {
            thread_id: thread_id.to_string(),
            agent_type: AgentType::Onboarding,
            location_id: location.to_string(),
            tenant: TenantRefs {
                user_id: Some("user-1".into()),
                agency_id: agency.map(String::from),
            },
            status: SessionStatus::Active,
            current_step: "greet".into(),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    fn update(status: SessionStatus, step: &str) -> SessionUpdate {
        SessionUpdate {
            status,
            current_step: step.to_string(),
            checkpoint_data: Some(format!("{{\"step\":\"{step}\"}}")),
            state_data: serde_json::json!({ "step": step }),
            metadata: serde_json::json!({}),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let created = db.create_session(&new_session("t-1", "loc-1", Some("ag-1"))).await.unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(created.status, SessionStatus::Active);

        let fetched = db.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.agency_id.as_deref(), Some("ag-1"));
        assert_eq!(fetched.user_id.as_deref(), Some("user-1"));
        assert!(fetched.checkpoint_data.is_none());
        assert!(db.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_thread_id_rejected() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.create_session(&new_session("t-dup", "loc-1", None)).await.unwrap();
        let err = db
            .create_session(&new_session("t-dup", "loc-2", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateThreadId(ref t) if t == "t-dup"));
    }

    #[tokio::test]
    async fn commit_transition_bumps_version_and_logs_events() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();

        let events = vec![
            NewEvent::new(EventType::NodeExecuted, Some("greet")),
            NewEvent::new(EventType::StatusChanged, Some("greet"))
                .with_data(serde_json::json!({ "from": "active", "to": "awaiting_input" })),
        ];
        let session = db
            .commit_transition("t-1", 0, &update(SessionStatus::AwaitingInput, "greet"), &events)
            .await
            .unwrap();
        assert_eq!(session.version, 1);
        assert_eq!(session.status, SessionStatus::AwaitingInput);
        assert_eq!(session.checkpoint_data.as_deref(), Some("{\"step\":\"greet\"}"));

        let logged = db.get_events(session.id, 10).await.unwrap();
        assert_eq!(logged.len(), 2);
        // Most recent first.
        assert_eq!(logged[0].event_type, EventType::StatusChanged);
        assert_eq!(logged[1].event_type, EventType::NodeExecuted);
        assert!(logged[0].seq > logged[1].seq);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_side_effects() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let created = db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();
        db.commit_transition("t-1", 0, &update(SessionStatus::Active, "greet"), &[])
            .await
            .unwrap();

        let events = [NewEvent::new(EventType::NodeExecuted, Some("collect_brand_facts"))];
        let err = db
            .commit_transition(
                "t-1",
                0,
                &update(SessionStatus::Active, "collect_brand_facts"),
                &events,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::VersionConflict { expected: 0, actual: 1, .. }
        ));

        let session = db.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(session.current_step, "greet");
        assert!(db.get_events(created.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_sessions_are_immutable() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();
        assert!(db.complete("t-1").await.unwrap());
        // Idempotent.
        assert!(!db.complete("t-1").await.unwrap());
        assert!(!db.fail("t-1", "late failure").await.unwrap());

        let session = db.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let err = db
            .commit_transition("t-1", session.version, &update(SessionStatus::Active, "greet"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TerminalSession { .. }));

        let err = db.save_checkpoint("t-1", "{}", "greet").await.unwrap_err();
        assert!(matches!(err, DatabaseError::TerminalSession { .. }));
        let err = db
            .update_state("t-1", &serde_json::json!({ "x": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TerminalSession { .. }));
    }

    #[tokio::test]
    async fn fail_records_detail_and_event() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let created = db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();
        assert!(db.fail("t-1", "checkpoint unreadable").await.unwrap());

        let session = db.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.last_error(), Some("checkpoint unreadable"));

        let events = db.get_events(created.id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::StatusChanged);
        assert_eq!(events[0].event_data["to"], "failed");
        assert_eq!(events[0].event_data["error"], "checkpoint unreadable");
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        assert!(matches!(
            db.complete("nope").await.unwrap_err(),
            DatabaseError::NotFound { .. }
        ));
        assert!(matches!(
            db.get_checkpoint("nope").await.unwrap_err(),
            DatabaseError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn single_purpose_mutators() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let created = db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();

        db.save_checkpoint("t-1", "{\"v\":1}", "greet").await.unwrap();
        assert_eq!(
            db.get_checkpoint("t-1").await.unwrap().as_deref(),
            Some("{\"v\":1}")
        );

        db.update_state("t-1", &serde_json::json!({ "business_name": "Acme" }))
            .await
            .unwrap();
        db.update_status("t-1", SessionStatus::AwaitingInput, "collect_brand_facts")
            .await
            .unwrap();

        let session = db.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(session.version, 3);
        assert_eq!(session.status, SessionStatus::AwaitingInput);
        assert_eq!(session.current_step, "collect_brand_facts");
        assert_eq!(session.state_data["business_name"], "Acme");

        let events = db.get_events(created.id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::StatusChanged);
    }

    #[tokio::test]
    async fn listing_scopes_and_filters() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.create_session(&new_session("a", "loc-1", Some("ag-1"))).await.unwrap();
        db.create_session(&new_session("b", "loc-1", Some("ag-2"))).await.unwrap();
        db.create_session(&new_session("c", "loc-2", Some("ag-1"))).await.unwrap();
        db.complete("b").await.unwrap();

        let by_location = db.list_by_location("loc-1", 10).await.unwrap();
        assert_eq!(by_location.len(), 2);

        let by_agency = db.list_by_agency("ag-1", 10).await.unwrap();
        let mut threads: Vec<_> = by_agency.iter().map(|s| s.thread_id.as_str()).collect();
        threads.sort();
        assert_eq!(threads, vec!["a", "c"]);

        let completed = db
            .list_sessions(
                &SessionScope::Location("loc-1".into()),
                Some(SessionStatus::Completed),
                10,
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].thread_id, "b");

        let active = db
            .list_active(&SessionScope::Location("loc-1".into()))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].thread_id, "a");

        let limited = db.list_by_location("loc-1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn expired_sessions_hidden_and_cleaned_up() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let mut stale = new_session("old", "loc-1", None);
        stale.expires_at = Utc::now() - Duration::hours(1);
        let old = db.create_session(&stale).await.unwrap();
        db.log_event(old.id, EventType::SessionStarted, Some("greet"), None)
            .await
            .unwrap();
        db.create_session(&new_session("fresh", "loc-1", None)).await.unwrap();

        let listed = db.list_by_location("loc-1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].thread_id, "fresh");

        assert_eq!(db.cleanup_expired().await.unwrap(), 1);
        assert!(db.get_session("old").await.unwrap().is_none());
        assert!(db.get_events(old.id, 10).await.unwrap().is_empty());
        assert!(db.get_session("fresh").await.unwrap().is_some());
        assert_eq!(db.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn event_timestamps_are_monotonic() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let session = db.create_session(&new_session("t-1", "loc-1", None)).await.unwrap();
        for i in 0..5 {
            let data = serde_json::json!({ "i": i });
            db.log_event(session.id, EventType::NodeExecuted, Some("greet"), Some(&data))
                .await
                .unwrap();
        }

        let events = db.get_events(session.id, 3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_data["i"], 4);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
            assert!(pair[0].seq > pair[1].seq);
        }
    }
}
