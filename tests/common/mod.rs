//! Shared fixtures for integration tests: stub collaborators and an
//! orchestrator wired to an in-memory (or on-disk) libSQL registry.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use onboard_orchestrator::audit::{ApprovalRecord, AuditSink};
use onboard_orchestrator::config::OrchestratorConfig;
use onboard_orchestrator::error::{AuditError, LlmError, ProvisionError};
use onboard_orchestrator::llm::{GenerationRequest, TextGenerator};
use onboard_orchestrator::onboarding::{Orchestrator, StartRequest, TenantRefs};
use onboard_orchestrator::provisioning::{DeploymentResult, ProvisionRequest, Provisioner};
use onboard_orchestrator::retry::CallPolicy;
use onboard_orchestrator::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const BRAND_MESSAGE: &str = "Acme Roofing, family-owned since 2005";

/// Stub text generator: fixed answers per prompt kind, scripted outages,
/// and an optional gate that holds the first call until released.
#[derive(Default)]
pub struct StubGenerator {
    failures: AtomicU32,
    calls: AtomicU32,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl StubGenerator {
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hold the next call. Returns (entered, release): `entered` fires when
    /// the call is parked, sending on `release` lets it continue.
    pub fn hold_next(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }

        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "upstream unavailable".into(),
            });
        }

        Ok(if request.prompt.contains("brand profile") {
            "Acme Roofing is a family roofer known for honest quotes.".to_string()
        } else if request.prompt.contains("staff roles") {
            "receptionist, review_manager".to_string()
        } else {
            "A receptionist to answer calls and a review manager to grow ratings.".to_string()
        })
    }
}

/// Stub provisioner that records idempotency keys and can hold a call.
#[derive(Default)]
pub struct StubProvisioner {
    keys: Mutex<Vec<String>>,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl StubProvisioner {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    /// Same contract as [`StubGenerator::hold_next`].
    pub fn hold_next(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
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

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }

        Ok(DeploymentResult {
            success: true,
            staff_ids: request
                .plan
                .staff
                .iter()
                .map(|s| format!("staff-{}", s.role))
                .collect(),
            message: None,
            payload: serde_json::json!({ "plan_revision": request.plan.revision }),
        })
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    records: Mutex<Vec<ApprovalRecord>>,
}

impl RecordingAudit {
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record_approval(&self, record: &ApprovalRecord) -> Result<(), AuditError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct TestEnv {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<LibSqlBackend>,
    pub generator: Arc<StubGenerator>,
    pub provisioner: Arc<StubProvisioner>,
    pub audit: Arc<RecordingAudit>,
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        call_policy: CallPolicy {
            timeout: Duration::from_secs(2),
            retries: 0,
            base_backoff: Duration::from_millis(1),
        },
        ..OrchestratorConfig::default()
    }
}

pub async fn env_with(config: OrchestratorConfig) -> TestEnv {
    let registry = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    build_env(registry, config)
}

pub async fn env() -> TestEnv {
    env_with(test_config()).await
}

pub async fn env_on_disk(path: &Path) -> TestEnv {
    let registry = Arc::new(LibSqlBackend::new_local(path).await.unwrap());
    build_env(registry, test_config())
}

fn build_env(registry: Arc<LibSqlBackend>, config: OrchestratorConfig) -> TestEnv {
    let generator = Arc::new(StubGenerator::default());
    let provisioner = Arc::new(StubProvisioner::default());
    let audit = Arc::new(RecordingAudit::default());
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        generator.clone(),
        provisioner.clone(),
        audit.clone(),
        config,
    ));
    TestEnv {
        orchestrator,
        registry,
        generator,
        provisioner,
        audit,
    }
}

pub fn start_request(location_id: &str, thread_id: Option<&str>) -> StartRequest {
    StartRequest {
        location_id: location_id.to_string(),
        tenant: TenantRefs {
            user_id: Some("user-7".into()),
            agency_id: Some("agency-1".into()),
        },
        thread_id: thread_id.map(String::from),
    }
}
