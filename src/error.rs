//! Error types for the onboarding orchestrator.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Thread id already in use: {0}")]
    DuplicateThreadId(String),

    #[error("Session {thread_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        thread_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Session {thread_id} is terminal ({status}) and cannot be modified")]
    TerminalSession { thread_id: String, status: String },
}

/// Text generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Staff provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Provisioning request failed: {0}")]
    RequestFailed(String),

    #[error("Provisioning rejected by upstream ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid provisioning response: {0}")]
    InvalidResponse(String),

    #[error("Provisioning timed out after {0:?}")]
    Timeout(Duration),
}

/// Approval audit sink errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Checkpoint encode/decode errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Incompatible checkpoint: {reason}")]
    IncompatibleCheckpoint { reason: String },

    #[error("Failed to encode checkpoint: {0}")]
    Encode(String),
}

/// Failure of a single workflow step. Always recoverable by retrying the step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("Text generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Step {step} needs {missing} before it can run")]
    MissingData { step: String, missing: String },

    #[error("Unusable input: {0}")]
    InvalidInput(String),

    #[error("Deployment reported failure: {0}")]
    DeploymentFailed(String),
}

/// Engine preconditions that make a run impossible.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workflow already reached a terminal state")]
    AlreadyTerminal,

    #[error("Workflow is waiting for an approval decision")]
    ApprovalPending,

    #[error("No build plan is awaiting approval")]
    NoPendingApproval,
}

/// Errors surfaced to callers of the orchestration façade.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {thread_id} is {status}; expected one of: {expected}")]
    InvalidState {
        thread_id: String,
        status: String,
        expected: String,
    },

    #[error("Thread id already in use: {0}")]
    DuplicateThreadId(String),

    #[error("Session {0} was modified by another call; reload and retry")]
    ConcurrentModification(String),

    #[error("Session {0} has expired")]
    SessionExpired(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::DuplicateThreadId(id) => Self::DuplicateThreadId(id),
            DatabaseError::VersionConflict { thread_id, .. } => {
                Self::ConcurrentModification(thread_id)
            }
            DatabaseError::NotFound { id, .. } => Self::SessionNotFound(id),
            DatabaseError::TerminalSession { thread_id, status } => Self::InvalidState {
                thread_id,
                status,
                expected: "active, awaiting_input, awaiting_approval".to_string(),
            },
            other => Self::Database(other),
        }
    }
}

