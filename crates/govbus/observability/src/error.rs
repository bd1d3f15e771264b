//! Error types for govbus-observability.

use thiserror::Error;

/// Errors raised by audit and metrics infrastructure.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit append failed: {0}")]
    AppendFailed(String),

    #[error("metrics export failed: {0}")]
    Export(String),

    #[error("tracing init failed: {0}")]
    TracingInit(String),
}

/// Result type for observability operations.
pub type Result<T> = std::result::Result<T, ObservabilityError>;
