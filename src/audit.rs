//! Human-visible audit records for approval decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::AuditError;

/// One approve/reject decision at the approval gate.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    pub thread_id: String,
    pub location_id: String,
    pub plan_revision: u32,
    pub approved: bool,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Where approval decisions are recorded for humans.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_approval(&self, record: &ApprovalRecord) -> Result<(), AuditError>;
}

/// Writes approval records to the `audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_approval(&self, record: &ApprovalRecord) -> Result<(), AuditError> {
        info!(
            target: "audit",
            thread_id = %record.thread_id,
            location_id = %record.location_id,
            plan_revision = record.plan_revision,
            approved = record.approved,
            notes = record.notes.as_deref().unwrap_or(""),
            "Build plan decision recorded"
        );
        Ok(())
    }
}
