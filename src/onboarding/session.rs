//! Session and event records as persisted by the session registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an onboarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Conversation in progress; the next user turn is expected.
    Active,
    /// A step failed and is waiting for the caller to retry.
    AwaitingInput,
    /// A build plan is waiting for an approve/reject decision.
    AwaitingApproval,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    /// Terminal sessions are read-only.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether a user message may resume a session in this status.
    pub fn accepts_message(&self) -> bool {
        matches!(self, Self::Active | Self::AwaitingInput)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingInput => "awaiting_input",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "awaiting_input" => Ok(Self::AwaitingInput),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Which workflow graph a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Onboarding,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(Self::Onboarding),
            _ => Err(format!("Unknown agent type: {}", s)),
        }
    }
}

/// Tenant references attached to a session. Opaque to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
}

/// One row of the session registry.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub thread_id: String,
    pub agent_type: AgentType,
    pub location_id: String,
    pub user_id: Option<String>,
    pub agency_id: Option<String>,
    pub status: SessionStatus,
    pub current_step: String,
    /// Display projection of the workflow state. Not used for resuming.
    pub state_data: serde_json::Value,
    /// Opaque checkpoint; the only authority for resuming.
    #[serde(skip)]
    pub checkpoint_data: Option<String>,
    pub metadata: serde_json::Value,
    /// Optimistic concurrency token, bumped on every committed transition.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// `last_error` from the metadata bag, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.metadata.get("last_error").and_then(|v| v.as_str())
    }
}

/// Fields needed to create a session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub thread_id: String,
    pub agent_type: AgentType,
    pub location_id: String,
    pub tenant: TenantRefs,
    pub status: SessionStatus,
    pub current_step: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything a committed transition writes to the session row.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub current_step: String,
    /// `None` leaves the stored checkpoint untouched.
    pub checkpoint_data: Option<String>,
    pub state_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// Kind of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    /// A step ran to completion.
    NodeExecuted,
    /// A step failed and will be retried.
    NodeFailed,
    ApprovalDecision,
    StatusChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::NodeExecuted => "node_executed",
            Self::NodeFailed => "node_failed",
            Self::ApprovalDecision => "approval_decision",
            Self::StatusChanged => "status_changed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_started" => Ok(Self::SessionStarted),
            "node_executed" => Ok(Self::NodeExecuted),
            "node_failed" => Ok(Self::NodeFailed),
            "approval_decision" => Ok(Self::ApprovalDecision),
            "status_changed" => Ok(Self::StatusChanged),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// An event waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub node_name: Option<String>,
    pub event_data: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: EventType, node_name: Option<&str>) -> Self {
        Self {
            event_type,
            node_name: node_name.map(String::from),
            event_data: serde_json::json!({}),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }
}

/// A persisted event log entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Insertion order within the whole log.
    pub seq: i64,
    pub event_type: EventType,
    pub node_name: Option<String>,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Listing scope for operator queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Location(String),
    Agency(String),
}
