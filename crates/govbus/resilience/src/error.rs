//! Error types for govbus-resilience.

use govbus_types::{IntegrityViolation, ServiceName};
use thiserror::Error;

use crate::recovery::RecoveryState;

/// Errors raised by breakers, the health aggregator, and recovery.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting calls.
    #[error("circuit breaker open for service {0}")]
    CircuitOpen(ServiceName),

    /// Timeout or connection failure talking to a collaborator.
    #[error("transient failure calling {service}: {reason}")]
    TransientDependency { service: ServiceName, reason: String },

    /// Recovery attempts exhausted.
    #[error("recovery for {service} failed permanently after {attempts} attempts")]
    PermanentFailure { service: ServiceName, attempts: u32 },

    /// Integrity check failed before scheduling or attempting recovery.
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    #[error("unknown service {0}")]
    UnknownService(ServiceName),

    #[error("no recovery task for service {0}")]
    TaskNotFound(ServiceName),

    #[error("recovery task for {service} is {state}")]
    InvalidTaskState {
        service: ServiceName,
        state: RecoveryState,
    },

    /// A health observer reported an error.
    #[error("health observer {name} failed: {reason}")]
    ObserverFailed { name: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ResilienceError {
    /// Whether a breaker should count this as a dependency failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::TransientDependency { .. } | ResilienceError::CircuitOpen(_)
        )
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
