//! Step actions, compensations and step-boundary guards.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use govbus_types::WorkflowRunId;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::StepError;

/// What a step sees when it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: WorkflowRunId,
    pub node_id: String,
    /// Workflow-level input shared by every step.
    pub input: Value,
    /// Outputs of completed dependencies, keyed by node id. Failed optional
    /// dependencies are absent.
    pub dependencies: BTreeMap<String, Value>,
    cancel: Option<watch::Receiver<bool>>,
}

impl StepContext {
    pub(crate) fn new(
        run_id: WorkflowRunId,
        node_id: impl Into<String>,
        input: Value,
        dependencies: BTreeMap<String, Value>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            input,
            dependencies,
            cancel,
        }
    }

    /// Long-running steps should poll this and return
    /// [`StepError::Cancelled`] once it is set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn dependency(&self, node_id: &str) -> Option<&Value> {
        self.dependencies.get(node_id)
    }
}

/// What a compensation sees when it runs.
#[derive(Debug, Clone)]
pub struct CompensationContext {
    pub run_id: WorkflowRunId,
    pub node_id: String,
    /// Output the forward action produced.
    pub output: Value,
}

/// Forward action of a workflow step.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: StepContext) -> Result<Value, StepError>;
}

/// Rollback action registered alongside a forward action.
#[async_trait]
pub trait Compensation: Send + Sync {
    async fn compensate(&self, ctx: CompensationContext) -> Result<(), StepError>;
}

/// Hook invoked before every step runs.
#[async_trait]
pub trait StepGuard: Send + Sync {
    async fn check(&self, run_id: WorkflowRunId, node_id: &str, integrity_hash: &str)
        -> Result<(), StepError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    async fn run(&self, ctx: StepContext) -> Result<Value, StepError> {
        (self.0)(ctx).await
    }
}

struct FnCompensation<F>(F);

#[async_trait]
impl<F, Fut> Compensation for FnCompensation<F>
where
    F: Fn(CompensationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send,
{
    async fn compensate(&self, ctx: CompensationContext) -> Result<(), StepError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`StepAction`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn StepAction>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// Wrap an async closure as a [`Compensation`].
pub fn compensation_fn<F, Fut>(f: F) -> Arc<dyn Compensation>
where
    F: Fn(CompensationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(FnCompensation(f))
}
