//! `SessionRegistry` trait: the async interface for session and event persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::session::{
    EventType, NewEvent, NewSession, Session, SessionEvent, SessionScope, SessionStatus,
    SessionUpdate,
};

/// Backend-agnostic store for onboarding sessions and their event log.
///
/// Every mutation of a session row bumps its `version`. Terminal rows
/// (completed, failed, expired) are never modified again.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a new session. Fails with `DuplicateThreadId` if the thread id is taken.
    async fn create_session(&self, new: &NewSession) -> Result<Session, DatabaseError>;

    /// Look up a session by its caller-facing thread id.
    async fn get_session(&self, thread_id: &str) -> Result<Option<Session>, DatabaseError>;

    /// Replace the display projection. Status and checkpoint are left alone.
    async fn update_state(
        &self,
        thread_id: &str,
        state_data: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Move a session to a new status and record the transition in the event log.
    async fn update_status(
        &self,
        thread_id: &str,
        status: SessionStatus,
        current_step: &str,
    ) -> Result<(), DatabaseError>;

    /// Store a new checkpoint blob.
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        checkpoint_data: &str,
        current_step: &str,
    ) -> Result<(), DatabaseError>;

    async fn get_checkpoint(&self, thread_id: &str) -> Result<Option<String>, DatabaseError>;

    /// Apply a whole transition atomically: status, step, checkpoint,
    /// projection, metadata and expiry, plus the events describing it.
    ///
    /// Rejected with `VersionConflict` if the row changed since
    /// `expected_version` was read, or `TerminalSession` if it is terminal.
    async fn commit_transition(
        &self,
        thread_id: &str,
        expected_version: i64,
        update: &SessionUpdate,
        events: &[NewEvent],
    ) -> Result<Session, DatabaseError>;

    /// Non-expired sessions in a scope, most recently updated first.
    async fn list_sessions(
        &self,
        scope: &SessionScope,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<Session>, DatabaseError>;

    async fn list_by_location(
        &self,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, DatabaseError> {
        self.list_sessions(&SessionScope::Location(location_id.to_string()), None, limit)
            .await
    }

    async fn list_by_agency(
        &self,
        agency_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, DatabaseError> {
        self.list_sessions(&SessionScope::Agency(agency_id.to_string()), None, limit)
            .await
    }

    /// Non-expired, non-terminal sessions in a scope.
    async fn list_active(&self, scope: &SessionScope) -> Result<Vec<Session>, DatabaseError>;

    // ── Terminal transitions (idempotent) ───────────────────────────

    /// Mark completed. Returns `false` if the session was already terminal.
    async fn complete(&self, thread_id: &str) -> Result<bool, DatabaseError>;

    /// Mark failed with a diagnostic. Returns `false` if already terminal.
    async fn fail(&self, thread_id: &str, error_detail: &str) -> Result<bool, DatabaseError>;

    /// Mark expired. Returns `false` if already terminal.
    async fn expire(&self, thread_id: &str) -> Result<bool, DatabaseError>;

    /// Delete every session (and its events) whose `expires_at` has passed.
    async fn cleanup_expired(&self) -> Result<usize, DatabaseError>;

    // ── Event log ───────────────────────────────────────────────────

    async fn log_event(
        &self,
        session_id: Uuid,
        event_type: EventType,
        node_name: Option<&str>,
        event_data: Option<&serde_json::Value>,
    ) -> Result<SessionEvent, DatabaseError>;

    /// Most recent first.
    async fn get_events(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, DatabaseError>;
}
