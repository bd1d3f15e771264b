//! Application context.
//!
//! [`GovernanceBus`] wires every component from one [`BusConfig`] and a set
//! of external collaborators, and owns the background loops. There is no
//! global state: embed as many buses in one process as needed.

use std::sync::Arc;

use govbus_deliberation::DeliberationCoordinator;
use govbus_observability::{AuditLedger, BusMetrics, MemoryAuditLedger};
use govbus_resilience::recovery::NoOpRecoveryExecutor;
use govbus_resilience::{
    CircuitBreakerRegistry, HealthAggregator, RecoveryExecutor, RecoveryOrchestrator,
    RecoveryTrigger,
};
use govbus_scoring::{AdaptiveRouter, HistoricalStats, ImpactScorer, InMemoryHistory, ScoringContext};
use govbus_types::{AgentMessage, IntegrityAnchor};
use govbus_workflow::DagExecutor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::BusConfig;
use crate::error::GatewayResult;
use crate::gateway::{GatewayDeps, GatewayStepGuard, MessageGateway, Outcome};
use crate::policy::{PolicyEvaluator, ValidationBackend};
use crate::queue::{MemoryQueue, MessageQueue};
use crate::transport::{MemoryTransport, MessageTransport};
use crate::worker::WorkerPool;

/// External collaborators the bus talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub audit: Arc<dyn AuditLedger>,
    pub transport: Arc<dyn MessageTransport>,
    pub queue: Arc<dyn MessageQueue>,
    pub history: Arc<dyn HistoricalStats>,
    /// Required for `external_policy` and `hybrid` validation.
    pub policy: Option<Arc<dyn PolicyEvaluator>>,
    pub recovery_executor: Arc<dyn RecoveryExecutor>,
}

impl Collaborators {
    /// All-in-memory collaborators, no policy engine.
    pub fn in_memory() -> Self {
        Self {
            audit: Arc::new(MemoryAuditLedger::new()),
            transport: Arc::new(MemoryTransport::new()),
            queue: Arc::new(MemoryQueue::new()),
            history: Arc::new(InMemoryHistory::new()),
            policy: None,
            recovery_executor: Arc::new(NoOpRecoveryExecutor),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = Some(policy);
        self
    }
}

pub struct GovernanceBus {
    config: BusConfig,
    metrics: Arc<BusMetrics>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthAggregator>,
    recovery: Arc<RecoveryOrchestrator>,
    router: Arc<AdaptiveRouter>,
    deliberation: Arc<DeliberationCoordinator>,
    gateway: Arc<MessageGateway>,
    executor: Arc<DagExecutor>,
    workers: Arc<WorkerPool>,
    queue: Arc<dyn MessageQueue>,
}

impl GovernanceBus {
    pub fn new(config: BusConfig, collaborators: Collaborators) -> GatewayResult<Self> {
        config.validate()?;

        let anchor = IntegrityAnchor::new(&config.integrity_hash);
        let metrics = Arc::new(BusMetrics::new()?);

        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        let health = Arc::new(
            HealthAggregator::new(config.health.clone(), Arc::clone(&breakers))
                .with_metrics(Arc::clone(&metrics)),
        );
        let recovery = Arc::new(
            RecoveryOrchestrator::new(
                config.recovery.clone(),
                anchor.clone(),
                Arc::clone(&collaborators.recovery_executor),
                Arc::clone(&collaborators.audit),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        health.register_callback(Arc::new(RecoveryTrigger::new(
            Arc::clone(&breakers),
            Arc::clone(&recovery),
            anchor.expected(),
        )));

        let router = Arc::new(AdaptiveRouter::new(config.router.clone())?);
        let scorer = ImpactScorer::new(config.scoring.clone(), Arc::clone(&collaborators.history))?;
        let deliberation = Arc::new(
            DeliberationCoordinator::new(config.deliberation.clone())?
                .with_metrics(Arc::clone(&metrics)),
        );
        let backend = ValidationBackend::from_config(
            config.gateway.validation_mode,
            config.gateway.local_rules.clone(),
            collaborators.policy.clone(),
        )?;

        let gateway = Arc::new(
            MessageGateway::new(
                config.gateway.clone(),
                GatewayDeps {
                    anchor: anchor.clone(),
                    backend,
                    scorer,
                    history: Arc::clone(&collaborators.history),
                    router: Arc::clone(&router),
                    deliberation: Arc::clone(&deliberation),
                    breakers: Arc::clone(&breakers),
                    recovery: Arc::clone(&recovery),
                    transport: Arc::clone(&collaborators.transport),
                    audit: Arc::clone(&collaborators.audit),
                },
            )?
            .with_metrics(Arc::clone(&metrics)),
        );

        let executor = Arc::new(
            DagExecutor::new(config.executor.clone(), anchor, Arc::clone(&collaborators.audit))?
                .with_guard(Arc::new(GatewayStepGuard::new(Arc::clone(&gateway))))
                .with_metrics(Arc::clone(&metrics)),
        );
        let workers = Arc::new(WorkerPool::new(
            config.worker.clone(),
            Arc::clone(&gateway),
            Arc::clone(&collaborators.queue),
        )?);

        info!(
            validation_mode = ?config.gateway.validation_mode,
            threshold = router.threshold(),
            "Governance bus assembled"
        );

        Ok(Self {
            config,
            metrics,
            breakers,
            health,
            recovery,
            router,
            deliberation,
            gateway,
            executor,
            workers,
            queue: collaborators.queue,
        })
    }

    /// Spawn the background loops: health aggregation, recovery, the
    /// deliberation sweeper, the dedup record sweeper and the worker pool.
    /// Flip `shutdown` to `true` and await the handles to stop them.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("Starting governance bus loops");
        vec![
            tokio::spawn(Arc::clone(&self.health).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.recovery).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.deliberation).run_expiry_sweeper(
                self.config.deliberation_sweep_interval,
                shutdown.clone(),
            )),
            tokio::spawn(Arc::clone(&self.gateway).run_record_sweeper(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.workers).run(shutdown)),
        ]
    }

    /// Submit directly, bypassing the ingress queue.
    pub async fn submit(&self, message: AgentMessage, context: ScoringContext) -> GatewayResult<Outcome> {
        self.gateway.submit(message, context).await
    }

    /// Put a message on the ingress queue for the worker pool.
    pub async fn enqueue(&self, message: AgentMessage, context: ScoringContext) -> GatewayResult<()> {
        self.queue.enqueue(message, context).await
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    pub fn router(&self) -> &Arc<AdaptiveRouter> {
        &self.router
    }

    pub fn deliberation(&self) -> &Arc<DeliberationCoordinator> {
        &self.deliberation
    }

    pub fn gateway(&self) -> &Arc<MessageGateway> {
        &self.gateway
    }

    pub fn executor(&self) -> &Arc<DagExecutor> {
        &self.executor
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }
}
