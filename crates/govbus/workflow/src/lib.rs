//! govbus Workflow
//!
//! Multi-step governance workflows (multi-party approval, policy bundle
//! rollout) expressed as a DAG of steps:
//!
//! - [`WorkflowDagBuilder`] validates the graph and computes execution waves
//! - [`DagExecutor`] runs waves with bounded parallelism and, on failure,
//!   runs registered compensations in reverse completion order
//! - [`StepGuard`] re-validates at every step boundary

#![deny(unsafe_code)]

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod step;

pub use config::ExecutorConfig;
pub use dag::{DagNode, WorkflowDag, WorkflowDagBuilder};
pub use error::{StepError, WorkflowError, WorkflowResult};
pub use executor::{DagExecutor, DagResult, DagStatus, ExecutionContext, NodeFailure, NodeOutcome};
pub use step::{
    action_fn, compensation_fn, Compensation, CompensationContext, StepAction, StepContext,
    StepGuard,
};
