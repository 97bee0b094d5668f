//! Orchestrator: the façade callers use to drive onboarding sessions.
//!
//! Every call loads the session row, restores engine state from the
//! checkpoint, runs the engine to its next suspension, and commits the new
//! checkpoint, status and events in one transaction. Nothing is kept in
//! memory between calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::checkpoint;
use super::engine::{EngineLimits, EngineRun, Halt, NodeRecord, Resume, WorkflowEngine};
use super::session::{
    AgentType, EventType, NewEvent, NewSession, Session, SessionEvent, SessionScope,
    SessionStatus, SessionUpdate, TenantRefs,
};
use super::state::{OnboardingStep, WorkflowState};
use crate::audit::{ApprovalRecord, AuditSink};
use crate::config::OrchestratorConfig;
use crate::error::{CheckpointError, DatabaseError, EngineError, OrchestratorError};
use crate::llm::TextGenerator;
use crate::provisioning::{DeploymentResult, Provisioner};
use crate::store::SessionRegistry;

/// Upper bound on `list` results regardless of the requested limit.
const MAX_LIST_LIMIT: usize = 500;

/// Parameters for [`Orchestrator::start`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    pub location_id: String,
    #[serde(flatten)]
    pub tenant: TenantRefs,
    /// Caller-chosen thread id; generated when absent.
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Snapshot returned after every driving call.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub thread_id: String,
    pub status: SessionStatus,
    pub current_step: String,
    /// True when the next call should be `resume_with_message`.
    pub awaiting_input: bool,
    pub reply: Option<String>,
    pub state: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_result: Option<DeploymentResult>,
}

impl TurnResponse {
    fn new(session: &Session, state: Option<&WorkflowState>) -> Self {
        Self {
            thread_id: session.thread_id.clone(),
            status: session.status,
            current_step: session.current_step.clone(),
            awaiting_input: session.status.accepts_message(),
            reply: state.and_then(|s| s.last_reply.clone()),
            state: session.state_data.clone(),
            last_error: session.last_error().map(String::from),
            deployment_result: state.and_then(|s| s.deployment.clone()),
        }
    }
}

/// Caller-facing view of a session row.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub thread_id: String,
    pub agent_type: AgentType,
    pub location_id: String,
    pub user_id: Option<String>,
    pub agency_id: Option<String>,
    pub status: SessionStatus,
    pub current_step: String,
    pub version: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            thread_id: session.thread_id.clone(),
            agent_type: session.agent_type,
            location_id: session.location_id.clone(),
            user_id: session.user_id.clone(),
            agency_id: session.agency_id.clone(),
            status: session.status,
            current_step: session.current_step.clone(),
            version: session.version,
            last_error: session.last_error().map(String::from),
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }
}

/// Read-only view returned by [`Orchestrator::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInspection {
    pub session: SessionSummary,
    pub state: serde_json::Value,
    /// Most recent first.
    pub events: Vec<SessionEvent>,
}

/// Coordinates the registry, the checkpointer, the engine and collaborators.
pub struct Orchestrator {
    registry: Arc<dyn SessionRegistry>,
    generator: Arc<dyn TextGenerator>,
    provisioner: Arc<dyn Provisioner>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        generator: Arc<dyn TextGenerator>,
        provisioner: Arc<dyn Provisioner>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            generator,
            provisioner,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a session and run it to its first suspension (the greeting).
    pub async fn start(&self, request: StartRequest) -> Result<TurnResponse, OrchestratorError> {
        let location_id = request.location_id.trim();
        if location_id.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "location_id must not be empty".to_string(),
            ));
        }
        let thread_id = match request.thread_id.as_deref().map(str::trim) {
            Some("") => {
                return Err(OrchestratorError::InvalidInput(
                    "thread_id must not be empty".to_string(),
                ));
            }
            Some(id) => id.to_string(),
            None => new_thread_id(),
        };

        let session = self
            .registry
            .create_session(&NewSession {
                thread_id: thread_id.clone(),
                agent_type: AgentType::Onboarding,
                location_id: location_id.to_string(),
                tenant: request.tenant,
                status: SessionStatus::Active,
                current_step: OnboardingStep::INITIAL.to_string(),
                expires_at: self.next_expiry(),
            })
            .await?;
        info!(thread_id = %thread_id, location_id, "Onboarding session started");

        let started = NewEvent::new(EventType::SessionStarted, Some(OnboardingStep::INITIAL.as_str()))
            .with_data(serde_json::json!({
                "location_id": location_id,
                "agent_type": AgentType::Onboarding,
            }));

        let run = self
            .engine()
            .run(&thread_id, WorkflowState::new(location_id), Resume::Start)
            .await
            .map_err(|e| rejected(&session, e))?;
        let committed = self.commit(&session, &run, vec![started]).await?;
        Ok(TurnResponse::new(&committed, Some(&run.state)))
    }

    /// Feed a user message to a session that is waiting for one.
    pub async fn resume_with_message(
        &self,
        thread_id: &str,
        message: &str,
    ) -> Result<TurnResponse, OrchestratorError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let session = self.load(thread_id).await?;
        if !session.status.accepts_message() {
            return Err(OrchestratorError::InvalidState {
                thread_id: session.thread_id.clone(),
                status: session.status.to_string(),
                expected: "active, awaiting_input".to_string(),
            });
        }
        self.ensure_live(&session).await?;

        let state = match restore(&session) {
            Ok(state) => state,
            Err(e) => return self.fail_unreadable(&session, e).await,
        };

        let run = self
            .engine()
            .run(&session.thread_id, state, Resume::Message(message.to_string()))
            .await
            .map_err(|e| rejected(&session, e))?;
        let committed = self.commit(&session, &run, Vec::new()).await?;
        Ok(TurnResponse::new(&committed, Some(&run.state)))
    }

    /// Approve or reject the build plan waiting at the approval gate.
    pub async fn resume_with_approval(
        &self,
        thread_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<TurnResponse, OrchestratorError> {
        let session = self.load(thread_id).await?;
        if session.status != SessionStatus::AwaitingApproval {
            return Err(OrchestratorError::InvalidState {
                thread_id: session.thread_id.clone(),
                status: session.status.to_string(),
                expected: SessionStatus::AwaitingApproval.to_string(),
            });
        }
        self.ensure_live(&session).await?;

        let state = match restore(&session) {
            Ok(state) => state,
            Err(e) => return self.fail_unreadable(&session, e).await,
        };

        let run = self
            .engine()
            .run(
                &session.thread_id,
                state,
                Resume::Decision {
                    approved,
                    notes: notes.clone(),
                },
            )
            .await
            .map_err(|e| rejected(&session, e))?;

        let plan_revision = run.decision.as_ref().map(|d| d.plan_revision).unwrap_or(0);
        let decision = NewEvent::new(EventType::ApprovalDecision, Some(&session.current_step))
            .with_data(serde_json::json!({
                "approved": approved,
                "notes": notes,
                "plan_revision": plan_revision,
            }));
        // Committing the decision bumps the version, so a competing decision
        // conflicts here before provisioning can start.
        let mut committed = self.commit(&session, &run, vec![decision]).await?;

        let record = ApprovalRecord {
            thread_id: committed.thread_id.clone(),
            location_id: committed.location_id.clone(),
            plan_revision,
            approved,
            notes,
            decided_at: Utc::now(),
        };
        if let Err(e) = self.audit.record_approval(&record).await {
            warn!(thread_id = %committed.thread_id, error = %e, "Audit sink rejected approval record");
        }

        if run.halt != Halt::Approved {
            return Ok(TurnResponse::new(&committed, Some(&run.state)));
        }

        let provisioned = self
            .engine()
            .run(&committed.thread_id, run.state, Resume::Continue)
            .await
            .map_err(|e| rejected(&committed, e))?;
        committed = self.commit(&committed, &provisioned, Vec::new()).await?;
        Ok(TurnResponse::new(&committed, Some(&provisioned.state)))
    }

    /// Session summary, display projection and recent events. Read-only.
    pub async fn inspect(&self, thread_id: &str) -> Result<SessionInspection, OrchestratorError> {
        let session = self.load(thread_id).await?;
        let events = self
            .registry
            .get_events(session.id, self.config.inspect_event_limit)
            .await?;
        Ok(SessionInspection {
            session: SessionSummary::from(&session),
            state: session.state_data.clone(),
            events,
        })
    }

    /// Non-expired sessions in a scope, most recently updated first.
    pub async fn list(
        &self,
        scope: &SessionScope,
        status: Option<SessionStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionSummary>, OrchestratorError> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.default_list_limit)
            .min(MAX_LIST_LIMIT);
        let sessions = self.registry.list_sessions(scope, status, limit).await?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    /// Operator override: mark a session completed. No-op on terminal sessions.
    pub async fn mark_completed(&self, thread_id: &str) -> Result<SessionSummary, OrchestratorError> {
        let session = self.load(thread_id).await?;
        if self.registry.complete(&session.thread_id).await? {
            info!(thread_id = %session.thread_id, from = %session.status, "Session marked completed by operator");
        }
        let session = self.load(thread_id).await?;
        Ok(SessionSummary::from(&session))
    }

    /// Delete sessions whose expiry has passed. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, OrchestratorError> {
        Ok(self.registry.cleanup_expired().await?)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn engine(&self) -> WorkflowEngine<'_> {
        WorkflowEngine::new(
            self.generator.as_ref(),
            self.provisioner.as_ref(),
            EngineLimits {
                max_step_errors: self.config.max_step_errors,
                max_plan_revisions: self.config.max_plan_revisions,
                max_steps_per_run: self.config.max_steps_per_run,
                call_policy: self.config.call_policy,
            },
        )
    }

    fn next_expiry(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        Utc::now() + ttl
    }

    async fn load(&self, thread_id: &str) -> Result<Session, OrchestratorError> {
        let thread_id = thread_id.trim();
        if thread_id.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "thread_id must not be empty".to_string(),
            ));
        }
        self.registry
            .get_session(thread_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(thread_id.to_string()))
    }

    /// Expire a session whose TTL ran out before it was resumed.
    async fn ensure_live(&self, session: &Session) -> Result<(), OrchestratorError> {
        if !session.is_expired_at(Utc::now()) {
            return Ok(());
        }
        if self.registry.expire(&session.thread_id).await? {
            info!(thread_id = %session.thread_id, "Session expired before resume");
        }
        Err(OrchestratorError::SessionExpired(session.thread_id.clone()))
    }

    /// A checkpoint that cannot be decoded ends the session; the blob is kept for diagnosis.
    async fn fail_unreadable(
        &self,
        session: &Session,
        err: CheckpointError,
    ) -> Result<TurnResponse, OrchestratorError> {
        let detail = err.to_string();
        error!(thread_id = %session.thread_id, error = %detail, "Checkpoint unreadable, failing session");
        self.registry.fail(&session.thread_id, &detail).await?;
        let failed = self.load(&session.thread_id).await?;
        Ok(TurnResponse::new(&failed, None))
    }

    /// Persist a run: checkpoint, status, projection and events in one transaction.
    async fn commit(
        &self,
        session: &Session,
        run: &EngineRun,
        mut events: Vec<NewEvent>,
    ) -> Result<Session, OrchestratorError> {
        let status = run.halt.status();
        let current_step = run.state.current_step.as_str();

        events.extend(run.traversed.iter().map(node_event));
        if status != session.status {
            let mut data = serde_json::json!({ "from": session.status, "to": status });
            if status == SessionStatus::Failed
                && let Some(e) = &run.state.last_error
            {
                data["error"] = serde_json::json!(e);
            }
            events.push(NewEvent::new(EventType::StatusChanged, Some(current_step)).with_data(data));
        }

        let blob = checkpoint::serialize(&run.state)
            .map_err(|e| OrchestratorError::Database(DatabaseError::Serialization(e.to_string())))?;
        let update = SessionUpdate {
            status,
            current_step: current_step.to_string(),
            checkpoint_data: Some(blob),
            state_data: run.state.projection(),
            metadata: merged_metadata(&session.metadata, &run.state),
            expires_at: self.next_expiry(),
        };

        let committed = self
            .registry
            .commit_transition(&session.thread_id, session.version, &update, &events)
            .await?;
        info!(
            thread_id = %committed.thread_id,
            status = %committed.status,
            step = %committed.current_step,
            steps_run = run.traversed.len(),
            "Session advanced"
        );
        Ok(committed)
    }
}

/// Periodically delete expired sessions. Runs until the handle is aborted.
pub fn spawn_expiry_task(
    orchestrator: Arc<Orchestrator>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = orchestrator.cleanup_expired().await {
                warn!(error = %e, "Expired session sweep failed");
            }
        }
    })
}

fn new_thread_id() -> String {
    format!("onb_{}", Uuid::new_v4().simple())
}

/// Engine state for a session. A row that was created but never committed
/// starts from the initial state.
fn restore(session: &Session) -> Result<WorkflowState, CheckpointError> {
    match &session.checkpoint_data {
        Some(blob) => checkpoint::deserialize(blob),
        None => Ok(WorkflowState::new(session.location_id.clone())),
    }
}

fn rejected(session: &Session, err: EngineError) -> OrchestratorError {
    let expected = match err {
        EngineError::AlreadyTerminal => "a non-terminal session",
        EngineError::ApprovalPending => SessionStatus::AwaitingApproval.as_str(),
        EngineError::NoPendingApproval => "active, awaiting_input",
    };
    OrchestratorError::InvalidState {
        thread_id: session.thread_id.clone(),
        status: session.status.to_string(),
        expected: expected.to_string(),
    }
}

fn node_event(node: &NodeRecord) -> NewEvent {
    let step = node.step.as_str();
    if node.succeeded() {
        NewEvent::new(EventType::NodeExecuted, Some(step))
            .with_data(serde_json::json!({ "outcome": node.outcome }))
    } else {
        NewEvent::new(EventType::NodeFailed, Some(step)).with_data(serde_json::json!({
            "error": node.error,
            "error_count": node.error_count,
        }))
    }
}

fn merged_metadata(existing: &serde_json::Value, state: &WorkflowState) -> serde_json::Value {
    let mut map = existing.as_object().cloned().unwrap_or_default();
    match &state.last_error {
        Some(e) => {
            map.insert("last_error".into(), serde_json::json!(e));
        }
        None => {
            map.remove("last_error");
        }
    }
    map.insert("error_count".into(), serde_json::json!(state.error_count));
    map.insert("plan_revisions".into(), serde_json::json!(state.plan_revisions));
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::testing::{
        RecordingAuditSink, ScriptedGenerator, StubProvisioner, fast_policy,
    };
    use crate::store::LibSqlBackend;

    struct Harness {
        orchestrator: Orchestrator,
        registry: Arc<LibSqlBackend>,
        generator: Arc<ScriptedGenerator>,
        provisioner: Arc<StubProvisioner>,
        audit: Arc<RecordingAuditSink>,
    }

    async fn harness_with(audit: RecordingAuditSink) -> Harness {
        let registry = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let generator = Arc::new(ScriptedGenerator::default());
        let provisioner = Arc::new(StubProvisioner::default());
        let audit = Arc::new(audit);
        let config = OrchestratorConfig {
            call_policy: fast_policy(),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            registry.clone(),
            generator.clone(),
            provisioner.clone(),
            audit.clone(),
            config,
        );
        Harness {
            orchestrator,
            registry,
            generator,
            provisioner,
            audit,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingAuditSink::default()).await
    }

    fn start_request(thread_id: Option<&str>) -> StartRequest {
        StartRequest {
            location_id: "loc-1".into(),
            tenant: TenantRefs {
                user_id: Some("user-1".into()),
                agency_id: Some("ag-1".into()),
            },
            thread_id: thread_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn start_generates_unique_thread_ids() {
        let h = harness().await;
        let a = h.orchestrator.start(start_request(None)).await.unwrap();
        let b = h.orchestrator.start(start_request(None)).await.unwrap();
        assert_ne!(a.thread_id, b.thread_id);
        assert!(a.thread_id.starts_with("onb_"));
        assert_eq!(a.status, SessionStatus::Active);
        assert_eq!(a.current_step, "greet");
        assert!(a.awaiting_input);
        assert!(a.reply.is_some());
    }

    #[tokio::test]
    async fn start_rejects_bad_input() {
        let h = harness().await;
        let err = h
            .orchestrator
            .start(StartRequest {
                location_id: "  ".into(),
                ..start_request(None)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));

        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        let err = h.orchestrator.start(start_request(Some("t-1"))).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateThreadId(_)));
    }

    #[tokio::test]
    async fn message_validation_does_not_mutate() {
        let h = harness().await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        let before = h.registry.get_session("t-1").await.unwrap().unwrap();

        let err = h.orchestrator.resume_with_message("t-1", "   ").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        let err = h
            .orchestrator
            .resume_with_approval("t-1", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));
        let err = h.orchestrator.resume_with_message("nope", "hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotFound(_)));

        let after = h.registry.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(before.version, after.version);
        assert_eq!(
            h.registry.get_events(after.id, 50).await.unwrap().len(),
            h.registry.get_events(before.id, 50).await.unwrap().len()
        );
    }

    #[tokio::test]
    async fn approval_is_audited_even_if_sink_fails() {
        let h = harness_with(RecordingAuditSink::refusing()).await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        let turn = h
            .orchestrator
            .resume_with_message("t-1", "Acme Roofing, since 2005")
            .await
            .unwrap();
        assert_eq!(turn.status, SessionStatus::AwaitingApproval);

        let turn = h
            .orchestrator
            .resume_with_approval("t-1", true, Some("looks good".into()))
            .await
            .unwrap();
        assert_eq!(turn.status, SessionStatus::Completed);
        assert!(turn.deployment_result.unwrap().success);

        let records = h.audit.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].approved);
        assert_eq!(records[0].notes.as_deref(), Some("looks good"));
    }

    #[tokio::test]
    async fn provisioning_outage_is_retried_by_message() {
        let h = harness().await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        h.orchestrator
            .resume_with_message("t-1", "Acme Roofing")
            .await
            .unwrap();

        h.provisioner.error_next(1);
        let turn = h
            .orchestrator
            .resume_with_approval("t-1", true, None)
            .await
            .unwrap();
        assert_eq!(turn.status, SessionStatus::AwaitingInput);
        assert_eq!(turn.current_step, "provision_staff");
        assert!(turn.last_error.unwrap().contains("connection reset"));

        // The decision stays committed even though provisioning failed.
        let session = h.registry.get_session("t-1").await.unwrap().unwrap();
        let events = h.registry.get_events(session.id, 50).await.unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == EventType::ApprovalDecision)
                .count(),
            1
        );
        let err = h
            .orchestrator
            .resume_with_approval("t-1", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));

        let turn = h
            .orchestrator
            .resume_with_message("t-1", "please try again")
            .await
            .unwrap();
        assert_eq!(turn.status, SessionStatus::Completed);
        assert!(turn.last_error.is_none());
        assert_eq!(h.provisioner.idempotency_keys(), vec!["t-1", "t-1"]);
    }

    #[tokio::test]
    async fn unreadable_checkpoint_fails_the_session() {
        let h = harness().await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        h.registry
            .save_checkpoint("t-1", "{\"version\":99,\"state\":{}}", "greet")
            .await
            .unwrap();

        let turn = h
            .orchestrator
            .resume_with_message("t-1", "Acme Roofing")
            .await
            .unwrap();
        assert_eq!(turn.status, SessionStatus::Failed);
        assert!(turn.last_error.unwrap().contains("version"));

        let session = h.registry.get_session("t-1").await.unwrap().unwrap();
        assert_eq!(
            session.checkpoint_data.as_deref(),
            Some("{\"version\":99,\"state\":{}}")
        );
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let h = harness().await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        let summary = h.orchestrator.mark_completed("t-1").await.unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);
        let again = h.orchestrator.mark_completed("t-1").await.unwrap();
        assert_eq!(again.version, summary.version);

        let err = h.orchestrator.resume_with_message("t-1", "hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn inspect_is_read_only() {
        let h = harness().await;
        h.orchestrator.start(start_request(Some("t-1"))).await.unwrap();
        let first = h.orchestrator.inspect("t-1").await.unwrap();
        let second = h.orchestrator.inspect("t-1").await.unwrap();
        assert_eq!(first.session.version, second.session.version);
        assert_eq!(first.events.len(), second.events.len());
        assert_eq!(first.events.last().unwrap().event_type, EventType::SessionStarted);
        assert_eq!(first.state["current_step"], "greet");
    }

    #[tokio::test]
    async fn list_clamps_limit() {
        let h = harness().await;
        for i in 0..3 {
            h.orchestrator
                .start(start_request(Some(&format!("t-{i}"))))
                .await
                .unwrap();
        }
        let scope = SessionScope::Agency("ag-1".into());
        assert_eq!(h.orchestrator.list(&scope, None, Some(2)).await.unwrap().len(), 2);
        assert_eq!(h.orchestrator.list(&scope, None, Some(0)).await.unwrap().len(), 3);
        assert_eq!(
            h.orchestrator
                .list(&scope, Some(SessionStatus::Completed), None)
                .await
                .unwrap()
                .len(),
            0
        );
    }
}
