//! Audit event types

use chrono::{DateTime, Utc};
use govbus_types::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Terminal: message handed to the transport.
    MessageDelivered,
    /// Terminal: message rejected or cancelled.
    MessageDropped,
    /// Security event: integrity check failed.
    IntegrityViolation,
    /// Message held for human/expert review.
    DeliberationOpened,
    RecoverySucceeded,
    RecoveryFailed,
    RecoveryAwaitingManual,
    RecoveryResolvedManually,
    RecoveryCancelled,
    CompensationExecuted,
    CompensationFailed,
    UncompensatedFailure,
}

impl AuditEventKind {
    /// Whether this event records the final outcome of a message.
    pub fn is_terminal_message_outcome(&self) -> bool {
        matches!(
            self,
            AuditEventKind::MessageDelivered | AuditEventKind::MessageDropped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::MessageDelivered => "message_delivered",
            AuditEventKind::MessageDropped => "message_dropped",
            AuditEventKind::IntegrityViolation => "integrity_violation",
            AuditEventKind::DeliberationOpened => "deliberation_opened",
            AuditEventKind::RecoverySucceeded => "recovery_succeeded",
            AuditEventKind::RecoveryFailed => "recovery_failed",
            AuditEventKind::RecoveryAwaitingManual => "recovery_awaiting_manual",
            AuditEventKind::RecoveryResolvedManually => "recovery_resolved_manually",
            AuditEventKind::RecoveryCancelled => "recovery_cancelled",
            AuditEventKind::CompensationExecuted => "compensation_executed",
            AuditEventKind::CompensationFailed => "compensation_failed",
            AuditEventKind::UncompensatedFailure => "uncompensated_failure",
        }
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event submitted to the audit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub kind: AuditEventKind,
    /// Message id, service name, or `run/node` reference the event is about.
    pub subject: String,
    pub tenant_id: Option<TenantId>,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, subject: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            subject: subject.into(),
            tenant_id: None,
            detail: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Proof that an event was appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReceipt {
    pub event_id: Uuid,
    pub sequence: u64,
    pub entry_hash: String,
    pub previous_hash: Option<String>,
}
