//! Deterministic collaborators for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::audit::{ApprovalRecord, AuditSink};
use crate::error::{AuditError, LlmError, ProvisionError};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::provisioning::{DeploymentResult, ProvisionRequest, Provisioner};
use crate::retry::CallPolicy;

/// No retries and short timeouts, so failures surface immediately.
pub fn fast_policy() -> CallPolicy {
    CallPolicy {
        timeout: Duration::from_millis(500),
        retries: 0,
        base_backoff: Duration::from_millis(1),
    }
}

/// Answers each prompt kind with a fixed string.
pub struct ScriptedGenerator {
    roles_answer: String,
    failures: AtomicU32,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            roles_answer: "receptionist, review_manager".to_string(),
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedGenerator {
    pub fn with_roles_answer(mut self, answer: &str) -> Self {
        self.roles_answer = answer.to_string();
        self
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "simulated outage".into(),
            });
        }

        let answer = if request.prompt.contains("brand profile") {
            "A dependable local business with a friendly, no-nonsense voice.".to_string()
        } else if request.prompt.contains("staff roles") {
            self.roles_answer.clone()
        } else {
            "Your receptionist answers every call and your review manager follows up with customers."
                .to_string()
        };
        Ok(answer)
    }
}

/// Records requests and returns a canned result.
pub struct StubProvisioner {
    failure_message: Option<String>,
    errors: AtomicU32,
    keys: Mutex<Vec<String>>,
}

impl Default for StubProvisioner {
    fn default() -> Self {
        Self {
            failure_message: None,
            errors: AtomicU32::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }
}

impl StubProvisioner {
    /// Respond with `success: false` and this message.
    pub fn reporting_failure(mut self, message: &str) -> Self {
        self.failure_message = Some(message.to_string());
        self
    }

    /// Make the next `n` calls fail at the transport level.
    pub fn error_next(&self, n: u32) {
        self.errors.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn provision(
        &self,
        request: &ProvisionRequest<'_>,
    ) -> Result<DeploymentResult, ProvisionError> {
        self.keys
            .lock()
            .unwrap()
            .push(request.idempotency_key.to_string());

        let pending = self.errors.load(Ordering::SeqCst);
        if pending > 0 {
            self.errors.store(pending - 1, Ordering::SeqCst);
            return Err(ProvisionError::RequestFailed("connection reset".into()));
        }

        Ok(DeploymentResult {
            success: self.failure_message.is_none(),
            staff_ids: request
                .plan
                .staff
                .iter()
                .map(|s| format!("{}-{}", request.location_id, s.role))
                .collect(),
            message: self.failure_message.clone(),
            payload: serde_json::json!({ "revision": request.plan.revision }),
        })
    }
}

/// Keeps every approval record; optionally refuses them.
#[derive(Default)]
pub struct RecordingAuditSink {
    refuse: bool,
    records: Mutex<Vec<ApprovalRecord>>,
}

impl RecordingAuditSink {
    /// Record, then report failure.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record_approval(&self, record: &ApprovalRecord) -> Result<(), AuditError> {
        self.records.lock().unwrap().push(record.clone());
        if self.refuse {
            return Err(AuditError::Unavailable("audit store unavailable".to_string()));
        }
        Ok(())
    }
}
