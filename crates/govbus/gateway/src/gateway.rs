//! Message Gateway.
//!
//! Entry point of the bus. Each submitted message is processed linearly:
//! integrity check, authorization, impact scoring, routing, then either
//! delivery or a hand-off to the deliberation coordinator. Exactly one
//! terminal audit event (`message_delivered` or `message_dropped`) is
//! recorded per message, and a message is never delivered twice while its
//! dedup record is retained (`GatewayConfig::record_retention`).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use govbus_deliberation::{DeliberationCoordinator, DeliberationStatus, Resolution};
use govbus_observability::{AuditEvent, AuditEventKind, AuditLedger, BusMetrics};
use govbus_resilience::{
    CircuitBreakerRegistry, CircuitState, RecoveryOrchestrator, RecoveryRequest, ResilienceError,
};
use govbus_scoring::{AdaptiveRouter, HistoricalStats, ImpactScorer, RouteDecision, RouteOutcome, ScoringContext};
use govbus_types::{
    AgentMessage, DeliberationId, IntegrityAnchor, IntegrityViolation, MessageId, MessageStatus,
    ServiceName, WorkflowRunId,
};
use govbus_workflow::{StepError, StepGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{FailurePolicy, GatewayConfig};
use crate::error::{CollaboratorError, GatewayError, GatewayResult};
use crate::policy::{PolicyDecision, ValidationBackend};
use crate::transport::MessageTransport;

/// Breaker key for the external policy engine.
pub const POLICY_SERVICE: &str = "policy-evaluator";

/// Breaker key for the egress transport.
pub const TRANSPORT_SERVICE: &str = "transport";

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Unauthorized { detail: String },
    /// Reviewers rejected it.
    Rejected,
    Cancelled { by: String, reason: String },
    /// Deliberation timed out without quorum.
    TimedOut,
    /// Approved, but every delivery attempt failed.
    DeliveryFailed { detail: String },
}

/// Final state of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Delivered,
    Dropped(DropReason),
}

impl Disposition {
    fn audit_kind(&self) -> AuditEventKind {
        match self {
            Disposition::Delivered => AuditEventKind::MessageDelivered,
            Disposition::Dropped(_) => AuditEventKind::MessageDropped,
        }
    }

    fn status(&self) -> MessageStatus {
        match self {
            Disposition::Delivered => MessageStatus::Delivered,
            Disposition::Dropped(_) => MessageStatus::Dropped,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Delivered => "delivered",
            Disposition::Dropped(_) => "dropped",
        }
    }
}

/// What `submit` hands back.
#[derive(Debug, Clone)]
pub enum Outcome {
    Delivered,
    /// Held for deliberation; the handle resolves to the final disposition.
    Pending(PendingHandle),
    Dropped(DropReason),
}

impl From<Disposition> for Outcome {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Delivered => Outcome::Delivered,
            Disposition::Dropped(reason) => Outcome::Dropped(reason),
        }
    }
}

/// Caller's view of a message awaiting deliberation.
///
/// Cheap to clone; every clone observes the same resolution.
#[derive(Debug, Clone)]
pub struct PendingHandle {
    message_id: MessageId,
    item_id: DeliberationId,
    resolved: watch::Receiver<Option<Disposition>>,
}

impl PendingHandle {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Deliberation item reviewers decide on.
    pub fn item_id(&self) -> DeliberationId {
        self.item_id
    }

    /// The disposition, if already resolved.
    pub fn disposition(&self) -> Option<Disposition> {
        self.resolved.borrow().clone()
    }

    /// Suspend until the message is delivered or dropped. Dropping the
    /// future stops waiting; it does not cancel the deliberation.
    pub async fn wait(&self) -> GatewayResult<Disposition> {
        let mut resolved = self.resolved.clone();
        loop {
            if let Some(disposition) = resolved.borrow_and_update().clone() {
                return Ok(disposition);
            }
            if resolved.changed().await.is_err() {
                return resolved
                    .borrow()
                    .clone()
                    .ok_or_else(|| GatewayError::ResolutionAbandoned(self.message_id.clone()));
            }
        }
    }
}

enum Record {
    InFlight,
    Pending(PendingHandle),
    Terminal {
        disposition: Disposition,
        resolved_at: Instant,
    },
}

/// Collaborators and components the gateway drives.
///
/// `backend` is authoritative for authorization regardless of
/// `GatewayConfig::validation_mode`.
pub struct GatewayDeps {
    pub anchor: IntegrityAnchor,
    pub backend: ValidationBackend,
    pub scorer: ImpactScorer,
    pub history: Arc<dyn HistoricalStats>,
    pub router: Arc<AdaptiveRouter>,
    pub deliberation: Arc<DeliberationCoordinator>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub recovery: Arc<RecoveryOrchestrator>,
    pub transport: Arc<dyn MessageTransport>,
    pub audit: Arc<dyn AuditLedger>,
}

pub struct MessageGateway {
    config: GatewayConfig,
    anchor: IntegrityAnchor,
    backend: ValidationBackend,
    scorer: ImpactScorer,
    history: Arc<dyn HistoricalStats>,
    router: Arc<AdaptiveRouter>,
    deliberation: Arc<DeliberationCoordinator>,
    breakers: Arc<CircuitBreakerRegistry>,
    recovery: Arc<RecoveryOrchestrator>,
    transport: Arc<dyn MessageTransport>,
    audit: Arc<dyn AuditLedger>,
    metrics: Option<Arc<BusMetrics>>,
    records: DashMap<MessageId, Record>,
}

impl MessageGateway {
    pub fn new(config: GatewayConfig, deps: GatewayDeps) -> GatewayResult<Self> {
        config.validate()?;

        deps.breakers.register(&ServiceName::from(TRANSPORT_SERVICE));
        if deps.backend.evaluator().is_some() {
            deps.breakers.register(&ServiceName::from(POLICY_SERVICE));
        }

        info!(
            mode = ?deps.backend.mode(),
            failure_policy = ?config.failure_policy,
            "Message gateway initialized"
        );

        Ok(Self {
            config,
            anchor: deps.anchor,
            backend: deps.backend,
            scorer: deps.scorer,
            history: deps.history,
            router: deps.router,
            deliberation: deps.deliberation,
            breakers: deps.breakers,
            recovery: deps.recovery,
            transport: deps.transport,
            audit: deps.audit,
            metrics: None,
            records: DashMap::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn anchor(&self) -> &IntegrityAnchor {
        &self.anchor
    }

    /// Submit a message for governance.
    ///
    /// Integrity and authorization failures return `Err` synchronously.
    /// Transient dependency failures also return `Err` (see
    /// [`GatewayError::is_transient`]) and leave no record, so the message
    /// can be resubmitted. Resubmitting a resolved message returns its
    /// recorded outcome without delivering it again, until the record ages
    /// out of the retention window; resubmitting one under deliberation
    /// returns its pending handle.
    #[instrument(skip_all, fields(message_id = %message.message_id))]
    pub async fn submit(
        self: &Arc<Self>,
        message: AgentMessage,
        context: ScoringContext,
    ) -> GatewayResult<Outcome> {
        if let Err(violation) = self.anchor.verify_message(&message) {
            self.reject_integrity(&message, &violation).await;
            return Err(violation.into());
        }

        let message_id = message.message_id.clone();
        match self.records.entry(message_id.clone()) {
            Entry::Occupied(entry) => {
                return match entry.get() {
                    Record::Terminal { disposition, .. } => {
                        debug!(message_id = %message_id, "Duplicate of resolved message");
                        Ok(Outcome::from(disposition.clone()))
                    }
                    Record::Pending(handle) => Ok(Outcome::Pending(handle.clone())),
                    Record::InFlight => Err(GatewayError::InFlight(message_id.clone())),
                };
            }
            Entry::Vacant(entry) => {
                entry.insert(Record::InFlight);
            }
        }

        let result = self.process(message, context).await;
        if result.is_err() {
            self.records
                .remove_if(&message_id, |_, record| matches!(record, Record::InFlight));
        }
        result
    }

    /// Cancel a message awaiting deliberation. It resolves as dropped.
    pub fn cancel_pending(
        &self,
        message_id: &MessageId,
        by: impl Into<String>,
        reason: impl Into<String>,
    ) -> GatewayResult<()> {
        let item_id = self
            .records
            .get(message_id)
            .and_then(|record| match record.value() {
                Record::Pending(handle) => Some(handle.item_id),
                _ => None,
            })
            .ok_or_else(|| GatewayError::NotPending(message_id.clone()))?;

        self.deliberation.cancel(item_id, by, reason)?;
        Ok(())
    }

    /// Recorded final disposition of a message.
    pub fn disposition(&self, message_id: &MessageId) -> Option<Disposition> {
        self.records
            .get(message_id)
            .and_then(|record| match record.value() {
                Record::Terminal { disposition, .. } => Some(disposition.clone()),
                _ => None,
            })
    }

    pub fn pending_handle(&self, message_id: &MessageId) -> Option<PendingHandle> {
        self.records
            .get(message_id)
            .and_then(|record| match record.value() {
                Record::Pending(handle) => Some(handle.clone()),
                _ => None,
            })
    }

    /// Messages currently tracked for deduplication, in any state.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Forget resolved messages older than `record_retention`. Returns how
    /// many records were evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.record_retention;
        let before = self.records.len();
        self.records.retain(|_, record| match record {
            Record::Terminal { resolved_at, .. } => now.duration_since(*resolved_at) < retention,
            _ => true,
        });
        before.saturating_sub(self.records.len())
    }

    /// Periodically evict expired dedup records until `shutdown` flips to
    /// `true`.
    pub async fn run_record_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.record_sweep_interval);
        info!(
            retention_secs = self.config.record_retention.as_secs(),
            "Dedup record sweeper started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, remaining = self.records.len(), "Evicted expired dedup records");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Dedup record sweeper stopped");
    }

    /// Re-check an integrity hash outside the message path, e.g. at a
    /// workflow step boundary. Failures are audited.
    pub async fn revalidate(&self, integrity_hash: &str, subject: &str) -> Result<(), IntegrityViolation> {
        if let Err(violation) = self.anchor.verify(integrity_hash) {
            warn!(subject, error = %violation, "Re-validation failed");
            self.record_audit(
                AuditEvent::new(AuditEventKind::IntegrityViolation, subject)
                    .with_detail(json!({ "stage": "revalidation", "error": violation.to_string() })),
            )
            .await;
            return Err(violation);
        }
        Ok(())
    }

    async fn process(
        self: &Arc<Self>,
        mut message: AgentMessage,
        context: ScoringContext,
    ) -> GatewayResult<Outcome> {
        message.advance(MessageStatus::Validated)?;

        if let Err(e) = self.authorize(&message).await {
            if let GatewayError::Unauthorized { reason, .. } = &e {
                let disposition = Disposition::Dropped(DropReason::Unauthorized {
                    detail: reason.clone(),
                });
                self.finalize(&mut message, disposition).await;
            }
            return Err(e);
        }

        let score = self.scorer.score(&message, &context);
        message.set_impact_score(score.total)?;
        message.advance(MessageStatus::Scored)?;
        self.history
            .observe_payload(&message.from_agent, message.payload_size());

        let route = self.router.route(&message)?;
        message.advance(MessageStatus::Routed)?;

        match route.decision {
            RouteDecision::FastPath => {
                self.deliver(&message).await?;
                self.finalize(&mut message, Disposition::Delivered).await;
                Ok(Outcome::Delivered)
            }
            RouteDecision::Deliberation => self.open_deliberation(message, route).await,
        }
    }

    async fn authorize(&self, message: &AgentMessage) -> GatewayResult<()> {
        if let Some(rules) = self.backend.local_rules() {
            if let PolicyDecision::Deny { reason } = rules.evaluate(message) {
                return Err(self.unauthorized(message, reason));
            }
        }

        let Some(evaluator) = self.backend.evaluator() else {
            return Ok(());
        };

        let service = ServiceName::from(POLICY_SERVICE);
        let limit = self.config.policy_timeout;
        let evaluation = async {
            match tokio::time::timeout(limit, evaluator.evaluate(message)).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(limit)),
            }
        };

        match self.breakers.call(&service, evaluation).await {
            Ok(PolicyDecision::Allow) => Ok(()),
            Ok(PolicyDecision::Deny { reason }) => Err(self.unauthorized(message, reason)),
            Err(e) => {
                self.on_dependency_failure(&service, &e).await;
                match self.config.failure_policy {
                    FailurePolicy::FailClosed => Err(e.into()),
                    FailurePolicy::FailOpen => {
                        warn!(
                            message_id = %message.message_id,
                            error = %e,
                            "Policy engine unavailable, failing open"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    fn unauthorized(&self, message: &AgentMessage, reason: String) -> GatewayError {
        warn!(message_id = %message.message_id, reason = %reason, "Message not authorized");
        GatewayError::Unauthorized {
            message_id: message.message_id.clone(),
            reason,
        }
    }

    async fn deliver(&self, message: &AgentMessage) -> GatewayResult<()> {
        let service = ServiceName::from(TRANSPORT_SERVICE);
        let limit = self.config.transport_timeout;
        let delivery = async {
            match tokio::time::timeout(limit, self.transport.deliver(message)).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(limit)),
            }
        };

        match self.breakers.call(&service, delivery).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.on_dependency_failure(&service, &e).await;
                Err(e.into())
            }
        }
    }

    /// Schedule recovery once a dependency's breaker has opened.
    async fn on_dependency_failure(&self, service: &ServiceName, err: &ResilienceError) {
        warn!(service = %service, error = %err, "Dependency call failed");

        let open = self
            .breakers
            .current_state(service)
            .is_some_and(|s| s.state == CircuitState::Open);
        if !open {
            return;
        }

        let request = RecoveryRequest::new(service.clone())
            .priority(1)
            .integrity_hash(self.anchor.expected());
        if let Err(e) = self.recovery.schedule(request).await {
            error!(service = %service, error = %e, "Failed to schedule recovery");
        }
    }

    async fn open_deliberation(
        self: &Arc<Self>,
        mut message: AgentMessage,
        route: RouteOutcome,
    ) -> GatewayResult<Outcome> {
        message.advance(MessageStatus::Deliberating)?;

        let message_id = message.message_id.clone();
        let item_id = self.deliberation.enqueue(message.clone());
        self.record_audit(
            AuditEvent::new(AuditEventKind::DeliberationOpened, message_id.as_str())
                .with_tenant(message.tenant_id.clone())
                .with_detail(json!({
                    "item_id": item_id.to_string(),
                    "impact_score": route.score,
                    "threshold": route.threshold,
                })),
        )
        .await;

        let (resolved_tx, resolved_rx) = watch::channel(None);
        let handle = PendingHandle {
            message_id: message_id.clone(),
            item_id,
            resolved: resolved_rx,
        };
        self.records
            .insert(message_id, Record::Pending(handle.clone()));
        self.count("deliberation");

        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway
                .resolve_deliberation(message, item_id, route.score, resolved_tx)
                .await;
        });

        Ok(Outcome::Pending(handle))
    }

    async fn resolve_deliberation(
        &self,
        mut message: AgentMessage,
        item_id: DeliberationId,
        score: f64,
        resolved_tx: watch::Sender<Option<Disposition>>,
    ) {
        let disposition = match self.deliberation.wait(item_id).await {
            Ok(item) => {
                let approved = item.status == DeliberationStatus::Approved;
                if item.resolution == Some(Resolution::Quorum) {
                    self.router.record_outcome(score, approved);
                    self.history.observe_decision(&message.from_agent, approved);
                }

                let verdict = if approved {
                    MessageStatus::Approved
                } else {
                    MessageStatus::Rejected
                };
                if let Err(e) = message.advance(verdict) {
                    warn!(message_id = %message.message_id, error = %e, "Unexpected lifecycle state");
                }

                if approved {
                    self.deliver_approved(&message).await
                } else {
                    Disposition::Dropped(match item.resolution {
                        Some(Resolution::Timeout) => DropReason::TimedOut,
                        Some(Resolution::Cancelled { by, reason }) => {
                            DropReason::Cancelled { by, reason }
                        }
                        _ => DropReason::Rejected,
                    })
                }
            }
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "Deliberation item lost");
                Disposition::Dropped(DropReason::Cancelled {
                    by: "gateway".into(),
                    reason: e.to_string(),
                })
            }
        };

        let disposition = self.finalize(&mut message, disposition).await;
        resolved_tx.send_replace(Some(disposition));
    }

    async fn deliver_approved(&self, message: &AgentMessage) -> Disposition {
        let attempts = self.config.approved_delivery_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.deliver(message).await {
                Ok(()) => return Disposition::Delivered,
                Err(e) => {
                    warn!(
                        message_id = %message.message_id,
                        attempt,
                        attempts,
                        error = %e,
                        "Delivery of approved message failed"
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.approved_delivery_backoff).await;
                    }
                }
            }
        }

        Disposition::Dropped(DropReason::DeliveryFailed { detail: last_error })
    }

    /// Record the terminal outcome: status, audit event, metrics, record.
    async fn finalize(&self, message: &mut AgentMessage, disposition: Disposition) -> Disposition {
        if let Err(e) = message.advance(disposition.status()) {
            warn!(message_id = %message.message_id, error = %e, "Unexpected lifecycle state");
        }

        self.record_audit(
            AuditEvent::new(disposition.audit_kind(), message.message_id.as_str())
                .with_tenant(message.tenant_id.clone())
                .with_detail(json!({
                    "disposition": disposition,
                    "impact_score": message.impact_score(),
                    "from_agent": message.from_agent.as_str(),
                    "to_agent": message.to_agent.as_str(),
                })),
        )
        .await;
        self.count(disposition.label());

        info!(
            message_id = %message.message_id,
            disposition = disposition.label(),
            "Message resolved"
        );
        self.records.insert(
            message.message_id.clone(),
            Record::Terminal {
                disposition: disposition.clone(),
                resolved_at: Instant::now(),
            },
        );
        disposition
    }

    async fn reject_integrity(&self, message: &AgentMessage, violation: &IntegrityViolation) {
        warn!(
            message_id = %message.message_id,
            from_agent = %message.from_agent,
            error = %violation,
            "Integrity violation"
        );
        self.record_audit(
            AuditEvent::new(AuditEventKind::IntegrityViolation, message.message_id.as_str())
                .with_tenant(message.tenant_id.clone())
                .with_detail(json!({
                    "stage": "gateway",
                    "error": violation.to_string(),
                    "from_agent": message.from_agent.as_str(),
                })),
        )
        .await;
        self.count("integrity_violation");
    }

    async fn record_audit(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(e) = self.audit.append(event).await {
            error!(kind = %kind, error = %e, "Failed to append gateway audit event");
        }
    }

    fn count(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_message(outcome);
        }
    }
}

/// Re-validates the integrity hash at every workflow step boundary.
pub struct GatewayStepGuard {
    gateway: Arc<MessageGateway>,
}

impl GatewayStepGuard {
    pub fn new(gateway: Arc<MessageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl StepGuard for GatewayStepGuard {
    async fn check(
        &self,
        run_id: WorkflowRunId,
        node_id: &str,
        integrity_hash: &str,
    ) -> Result<(), StepError> {
        let subject = format!("{run_id}/{node_id}");
        self.gateway.revalidate(integrity_hash, &subject).await?;
        Ok(())
    }
}
