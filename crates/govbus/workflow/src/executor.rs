//! DAG Executor.
//!
//! Runs a [`WorkflowDag`] wave by wave. Nodes within a wave run concurrently
//! up to `max_parallelism`; the next wave starts only after the whole wave
//! settles. The first non-optional failure (or an observed cancellation)
//! stops forward progress and compensates every completed node, last
//! completed first. Cancellation is raced against the running wave, so
//! steps still in flight are dropped rather than awaited.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use govbus_observability::{AuditEvent, AuditEventKind, AuditLedger, BusMetrics};
use govbus_types::{Incident, IncidentKind, IntegrityAnchor, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::dag::{DagNode, WorkflowDag};
use crate::error::{StepError, WorkflowResult};
use crate::step::{CompensationContext, StepContext, StepGuard};

/// Per-run inputs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Presented at every step boundary.
    pub integrity_hash: String,
    pub input: Value,
    cancel: Option<watch::Receiver<bool>>,
}

impl ExecutionContext {
    pub fn new(integrity_hash: impl Into<String>) -> Self {
        Self {
            integrity_hash: integrity_hash.into(),
            input: Value::Null,
            cancel: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Cancel the run cooperatively by sending `true` on the paired sender.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagStatus {
    Completed,
    RolledBack,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed,
    Failed(String),
    /// An optional node failed; the run carried on.
    FailedOptional(String),
    Cancelled,
    /// Never started because the run stopped first.
    Skipped,
}

/// The failure that stopped a run.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: String,
    pub error: StepError,
}

#[derive(Debug, Clone)]
pub struct DagResult {
    pub run_id: WorkflowRunId,
    pub status: DagStatus,
    pub waves: Vec<Vec<String>>,
    /// Nodes in the order they finished successfully.
    pub completion_order: Vec<String>,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    pub outputs: BTreeMap<String, Value>,
    /// Nodes whose compensation ran successfully, in the order it ran.
    pub compensated: Vec<String>,
    pub incidents: Vec<Incident>,
    pub failure: Option<NodeFailure>,
}

impl DagResult {
    pub fn is_completed(&self) -> bool {
        self.status == DagStatus::Completed
    }

    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node_id)
    }
}

/// Runs workflow DAGs wave by wave and rolls back through compensations.
pub struct DagExecutor {
    config: ExecutorConfig,
    anchor: IntegrityAnchor,
    audit: Arc<dyn AuditLedger>,
    guard: Option<Arc<dyn StepGuard>>,
    metrics: Option<Arc<BusMetrics>>,
}

impl DagExecutor {
    pub fn new(
        config: ExecutorConfig,
        anchor: IntegrityAnchor,
        audit: Arc<dyn AuditLedger>,
    ) -> WorkflowResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            anchor,
            audit,
            guard: None,
            metrics: None,
        })
    }

    /// Install a hook that runs before every step.
    pub fn with_guard(mut self, guard: Arc<dyn StepGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[instrument(skip_all, fields(workflow = dag.name()))]
    pub async fn execute(&self, dag: &WorkflowDag, ctx: ExecutionContext) -> DagResult {
        let run_id = WorkflowRunId::generate();
        let mut run = RunState::default();
        let mut cancelled = false;

        info!(run_id = %run_id, nodes = dag.len(), waves = dag.waves().len(), "Workflow started");

        for (index, wave) in dag.waves().iter().enumerate() {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            debug!(run_id = %run_id, wave = index, nodes = ?wave, "Starting wave");
            let started = Instant::now();
            let hash = ctx.integrity_hash.as_str();

            let launches: Vec<_> = wave
                .iter()
                .filter_map(|id| dag.node(id))
                .map(|node| {
                    let dependencies = node
                        .dependencies
                        .iter()
                        .filter_map(|d| run.outputs.get(d).map(|v| (d.clone(), v.clone())))
                        .collect();
                    let step_ctx = StepContext::new(
                        run_id,
                        node.id.clone(),
                        ctx.input.clone(),
                        dependencies,
                        ctx.cancel.clone(),
                    );
                    async move {
                        let result = self.run_node(run_id, node, step_ctx, hash).await;
                        (node, result)
                    }
                })
                .collect();

            let mut in_flight =
                stream::iter(launches).buffer_unordered(self.config.max_parallelism);
            let mut cancel_rx = ctx.cancel.clone();
            let mut settled: Vec<(&DagNode, Result<Value, StepError>)> =
                Vec::with_capacity(wave.len());
            let mut interrupted = false;
            loop {
                tokio::select! {
                    next = in_flight.next() => match next {
                        Some(done) => settled.push(done),
                        None => break,
                    },
                    _ = cancellation(&mut cancel_rx) => {
                        interrupted = true;
                        break;
                    }
                }
            }
            drop(in_flight);

            if let Some(metrics) = &self.metrics {
                metrics
                    .dag_wave_latency_seconds
                    .observe(started.elapsed().as_secs_f64());
            }

            for (node, result) in settled {
                match result {
                    Ok(output) => {
                        debug!(run_id = %run_id, node = %node.id, "Step completed");
                        run.completion_order.push(node.id.clone());
                        run.outputs.insert(node.id.clone(), output);
                        run.outcomes.insert(node.id.clone(), NodeOutcome::Completed);
                    }
                    Err(StepError::Cancelled) => {
                        info!(run_id = %run_id, node = %node.id, "Step cancelled");
                        cancelled = true;
                        run.outcomes.insert(node.id.clone(), NodeOutcome::Cancelled);
                    }
                    Err(e) => {
                        if let StepError::Integrity(violation) = &e {
                            self.integrity_incident(&mut run, run_id, node, violation.to_string())
                                .await;
                        }
                        if node.is_optional {
                            warn!(run_id = %run_id, node = %node.id, error = %e, "Optional step failed");
                            run.outcomes
                                .insert(node.id.clone(), NodeOutcome::FailedOptional(e.to_string()));
                        } else {
                            warn!(run_id = %run_id, node = %node.id, error = %e, "Step failed");
                            run.outcomes
                                .insert(node.id.clone(), NodeOutcome::Failed(e.to_string()));
                            if run.failure.is_none() {
                                run.failure = Some(NodeFailure {
                                    node_id: node.id.clone(),
                                    error: e,
                                });
                            }
                        }
                    }
                }
            }

            if interrupted {
                info!(run_id = %run_id, wave = index, "Run cancelled mid-wave");
                cancelled = true;
                for id in wave {
                    run.outcomes.entry(id.clone()).or_insert(NodeOutcome::Cancelled);
                }
            }

            if run.failure.is_some() || cancelled || ctx.is_cancelled() {
                cancelled |= run.failure.is_none();
                break;
            }
        }

        for node in dag.nodes() {
            run.outcomes
                .entry(node.id.clone())
                .or_insert(NodeOutcome::Skipped);
        }

        let status = if run.failure.is_some() {
            DagStatus::RolledBack
        } else if cancelled {
            DagStatus::Cancelled
        } else {
            DagStatus::Completed
        };

        if status != DagStatus::Completed {
            self.compensate(dag, run_id, &mut run).await;
        }

        match status {
            DagStatus::Completed => info!(run_id = %run_id, "Workflow completed"),
            _ => warn!(
                run_id = %run_id,
                status = ?status,
                compensated = run.compensated.len(),
                incidents = run.incidents.len(),
                "Workflow rolled back"
            ),
        }

        DagResult {
            run_id,
            status,
            waves: dag.waves().to_vec(),
            completion_order: run.completion_order,
            outcomes: run.outcomes,
            outputs: run.outputs,
            compensated: run.compensated,
            incidents: run.incidents,
            failure: run.failure,
        }
    }

    async fn run_node(
        &self,
        run_id: WorkflowRunId,
        node: &DagNode,
        ctx: StepContext,
        integrity_hash: &str,
    ) -> Result<Value, StepError> {
        if ctx.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        self.anchor.verify(integrity_hash)?;
        if let Some(guard) = &self.guard {
            guard.check(run_id, &node.id, integrity_hash).await?;
        }

        let action = node.action.run(ctx);
        match self.config.step_timeout {
            Some(limit) => tokio::time::timeout(limit, action)
                .await
                .map_err(|_| StepError::Timeout)?,
            None => action.await,
        }
    }

    /// Compensate completed nodes, last completed first. Gaps and failures
    /// become incidents; neither stops the cascade. Failed steps with no
    /// compensation of their own are reported before the cascade starts.
    async fn compensate(&self, dag: &WorkflowDag, run_id: WorkflowRunId, run: &mut RunState) {
        let uncovered: Vec<String> = run
            .outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, NodeOutcome::Failed(_)))
            .filter(|(id, _)| dag.node(id).is_some_and(|n| n.compensation.is_none()))
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in uncovered {
            let subject = format!("{run_id}/{node_id}");
            warn!(run_id = %run_id, node = %node_id, "Failed step has no compensation");
            run.incidents.push(Incident::new(
                IncidentKind::UncompensatedFailure,
                subject.clone(),
                "failed step has no registered compensation",
            ));
            self.record_audit(AuditEvent::new(AuditEventKind::UncompensatedFailure, subject))
                .await;
        }

        for node_id in run.completion_order.clone().iter().rev() {
            let Some(node) = dag.node(node_id) else {
                continue;
            };
            let subject = format!("{run_id}/{node_id}");

            let Some(compensation) = &node.compensation else {
                warn!(run_id = %run_id, node = %node_id, "Completed step has no compensation");
                run.incidents.push(Incident::new(
                    IncidentKind::UncompensatedFailure,
                    subject.clone(),
                    "completed step has no registered compensation",
                ));
                self.record_audit(AuditEvent::new(AuditEventKind::UncompensatedFailure, subject))
                    .await;
                continue;
            };

            let ctx = CompensationContext {
                run_id,
                node_id: node_id.clone(),
                output: run.outputs.get(node_id).cloned().unwrap_or(Value::Null),
            };
            let pending = compensation.compensate(ctx);
            let result = match self.config.compensation_timeout {
                Some(limit) => tokio::time::timeout(limit, pending)
                    .await
                    .unwrap_or(Err(StepError::Timeout)),
                None => pending.await,
            };

            match result {
                Ok(()) => {
                    info!(run_id = %run_id, node = %node_id, "Compensation executed");
                    run.compensated.push(node_id.clone());
                    self.record_audit(AuditEvent::new(
                        AuditEventKind::CompensationExecuted,
                        subject,
                    ))
                    .await;
                }
                Err(e) => {
                    error!(run_id = %run_id, node = %node_id, error = %e, "Compensation failed");
                    run.incidents.push(Incident::new(
                        IncidentKind::CompensationFailed,
                        subject.clone(),
                        e.to_string(),
                    ));
                    self.record_audit(
                        AuditEvent::new(AuditEventKind::CompensationFailed, subject)
                            .with_detail(json!({ "error": e.to_string() })),
                    )
                    .await;
                }
            }
        }
    }

    async fn integrity_incident(
        &self,
        run: &mut RunState,
        run_id: WorkflowRunId,
        node: &DagNode,
        detail: String,
    ) {
        let subject = format!("{run_id}/{}", node.id);
        error!(run_id = %run_id, node = %node.id, detail = %detail, "Integrity check failed at step boundary");
        run.incidents.push(Incident::new(
            IncidentKind::IntegrityViolation,
            subject.clone(),
            detail.clone(),
        ));
        self.record_audit(
            AuditEvent::new(AuditEventKind::IntegrityViolation, subject)
                .with_detail(json!({ "detail": detail })),
        )
        .await;
    }

    async fn record_audit(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(e) = self.audit.append(event).await {
            error!(kind = %kind, error = %e, "Failed to append workflow audit event");
        }
    }
}

/// Resolves once the run's cancel flag is set. Never resolves for runs
/// without a cancel channel or whose sender is gone.
async fn cancellation(rx: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = rx {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[derive(Default)]
struct RunState {
    completion_order: Vec<String>,
    outcomes: BTreeMap<String, NodeOutcome>,
    outputs: BTreeMap<String, Value>,
    compensated: Vec<String>,
    incidents: Vec<Incident>,
    failure: Option<NodeFailure>,
}
