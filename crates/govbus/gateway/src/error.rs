//! Error types for govbus-gateway.

use std::time::Duration;

use govbus_deliberation::DeliberationError;
use govbus_observability::ObservabilityError;
use govbus_resilience::ResilienceError;
use govbus_scoring::ScoringError;
use govbus_types::{IntegrityViolation, MessageId, TypesError};
use govbus_workflow::WorkflowError;
use thiserror::Error;

/// Failure reported by an external collaborator (policy engine, transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Integrity hash mismatch or malformed envelope. Never retried.
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    /// The policy layer refused the message. Terminal.
    #[error("message {message_id} not authorized: {reason}")]
    Unauthorized { message_id: MessageId, reason: String },

    /// Another submission of the same message is being processed.
    #[error("message {0} is already in flight")]
    InFlight(MessageId),

    #[error("message {0} is not awaiting deliberation")]
    NotPending(MessageId),

    /// A pending message lost its resolution task.
    #[error("resolution of message {0} was abandoned")]
    ResolutionAbandoned(MessageId),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Deliberation(#[from] DeliberationError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Lifecycle(#[from] TypesError),

    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether resubmitting the same message later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Resilience(e) => e.is_transient(),
            GatewayError::InFlight(_) => true,
            _ => false,
        }
    }

    /// Integrity and authorization failures: surfaced synchronously, never
    /// retried.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::Integrity(_) | GatewayError::Unauthorized { .. }
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
