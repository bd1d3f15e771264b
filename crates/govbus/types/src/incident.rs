//! Reportable incidents
//!
//! Incidents are failures that need a human: exhausted recovery, compensation
//! gaps, and failed compensations during saga rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::IncidentId;

/// Category of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Recovery attempts exhausted for a dependency.
    PermanentFailure,
    /// A compensation raised an error during rollback.
    CompensationFailed,
    /// A failed or completed step had no compensation registered.
    UncompensatedFailure,
    /// An integrity check failed outside the message path.
    IntegrityViolation,
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentKind::PermanentFailure => write!(f, "permanent_failure"),
            IncidentKind::CompensationFailed => write!(f, "compensation_failed"),
            IncidentKind::UncompensatedFailure => write!(f, "uncompensated_failure"),
            IncidentKind::IntegrityViolation => write!(f, "integrity_violation"),
        }
    }
}

/// A reportable incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub kind: IncidentKind,
    /// Service name, workflow node, or other origin.
    pub source: String,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(kind: IncidentKind, source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: IncidentId::generate(),
            kind,
            source: source.into(),
            detail: detail.into(),
            raised_at: Utc::now(),
        }
    }
}
