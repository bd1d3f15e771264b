//! Error types for govbus-scoring.

use govbus_types::MessageId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// Component weights must sum to 1.0.
    #[error("impact weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },

    #[error("impact weight {component} is {value}, expected a finite non-negative number")]
    InvalidWeight { component: &'static str, value: f64 },

    /// The router was handed a message that has not been scored.
    #[error("message {0} has no impact score")]
    Unscored(MessageId),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type ScoringResult<T> = Result<T, ScoringError>;
