//! Error types for govbus-workflow.

use govbus_types::IntegrityViolation;
use thiserror::Error;

/// Construction-time graph validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow has no nodes")]
    EmptyGraph,

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    /// The dependency graph contains a cycle through `nodes`.
    #[error("cyclic graph through nodes {nodes:?}")]
    CyclicGraph { nodes: Vec<String> },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Failure of a single step or compensation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("step failed: {0}")]
    Failed(String),

    #[error("step timed out")]
    Timeout,

    #[error("step cancelled")]
    Cancelled,

    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    /// A step-boundary guard refused the step.
    #[error("step rejected by guard: {0}")]
    Rejected(String),
}

impl StepError {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepError::Failed(reason.into())
    }
}
