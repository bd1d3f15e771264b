//! Recovery Orchestrator.
//!
//! Priority-ordered retry scheduler for degraded dependencies. Tasks live in
//! a map keyed by service; a min-heap orders them by
//! `(priority, next_attempt_at)`. Heap entries carry the task generation at
//! push time, and entries whose generation no longer matches are discarded
//! on pop.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use govbus_observability::{AuditEvent, AuditEventKind, AuditLedger, BusMetrics};
use govbus_types::{Incident, IncidentKind, IntegrityAnchor, ServiceName};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::executor::RecoveryExecutor;
use super::task::{
    QueueEntry, RecoveryEvent, RecoveryRequest, RecoveryState, RecoveryStrategy, RecoveryTask,
};
use crate::config::RecoveryConfig;
use crate::error::{ResilienceError, ResilienceResult};

struct TaskSlot {
    task: RecoveryTask,
    generation: u64,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<ServiceName, TaskSlot>,
    heap: BinaryHeap<QueueEntry>,
    seq: u64,
}

impl QueueState {
    fn push(&mut self, service_name: &ServiceName) {
        let Some(slot) = self.tasks.get(service_name) else {
            return;
        };
        let entry = QueueEntry {
            priority: slot.task.priority,
            next_attempt_at: slot.task.next_attempt_at,
            seq: self.seq,
            service_name: service_name.clone(),
            generation: slot.generation,
        };
        self.seq += 1;
        self.heap.push(entry);
    }

    fn depth(&self) -> usize {
        self.tasks
            .values()
            .filter(|s| {
                matches!(
                    s.task.state,
                    RecoveryState::Scheduled | RecoveryState::InProgress
                )
            })
            .count()
    }
}

/// Work picked off the queue by a tick.
struct Claimed {
    service_name: ServiceName,
    attempt: u32,
    generation: u64,
    integrity_hash: String,
    strategy: RecoveryStrategy,
}

/// Schedules and runs recovery tasks.
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    anchor: IntegrityAnchor,
    executor: Arc<dyn RecoveryExecutor>,
    audit: Arc<dyn AuditLedger>,
    queue: Mutex<QueueState>,
    incidents: RwLock<Vec<Incident>>,
    event_tx: broadcast::Sender<RecoveryEvent>,
    metrics: Option<Arc<BusMetrics>>,
}

impl RecoveryOrchestrator {
    pub fn new(
        config: RecoveryConfig,
        anchor: IntegrityAnchor,
        executor: Arc<dyn RecoveryExecutor>,
        audit: Arc<dyn AuditLedger>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            anchor,
            executor,
            audit,
            queue: Mutex::new(QueueState::default()),
            incidents: RwLock::new(Vec::new()),
            event_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Schedule recovery for a service.
    ///
    /// Idempotent while a task for the service is live; a more urgent
    /// priority on a repeated request is applied to the queued task.
    #[instrument(skip(self, request), fields(service = %request.service_name, priority = request.priority))]
    pub async fn schedule(&self, request: RecoveryRequest) -> ResilienceResult<RecoveryTask> {
        if let Err(violation) = self.anchor.verify(&request.integrity_hash) {
            warn!(
                service = %request.service_name,
                error = %violation,
                "Refusing to schedule recovery with a mismatched integrity hash"
            );
            self.record_audit(
                AuditEvent::new(AuditEventKind::IntegrityViolation, request.service_name.as_str())
                    .with_detail(json!({ "stage": "recovery_schedule" })),
            )
            .await;
            return Err(violation.into());
        }

        let service_name = request.service_name.clone();
        let (task, created) = {
            let mut guard = self.queue.lock();
            let q = &mut *guard;

            if let Some(slot) = q.tasks.get_mut(&service_name) {
                if slot.task.state == RecoveryState::Scheduled
                    && request.priority < slot.task.priority
                {
                    slot.task.priority = request.priority;
                    slot.generation += 1;
                    let task = slot.task.clone();
                    q.push(&service_name);
                    (task, false)
                } else {
                    (slot.task.clone(), false)
                }
            } else {
                let mut task = RecoveryTask::from_request(request, Instant::now());
                task.state = if task.strategy == RecoveryStrategy::Manual {
                    RecoveryState::AwaitingManual
                } else {
                    RecoveryState::Scheduled
                };
                q.tasks.insert(
                    service_name.clone(),
                    TaskSlot {
                        task: task.clone(),
                        generation: 0,
                    },
                );
                if task.state == RecoveryState::Scheduled {
                    q.push(&service_name);
                }
                self.update_depth(q);
                (task, true)
            }
        };

        if !created {
            debug!(service = %service_name, state = %task.state, "Recovery already scheduled");
            return Ok(task);
        }

        info!(
            service = %service_name,
            strategy = %task.strategy,
            priority = task.priority,
            "Recovery scheduled"
        );
        self.emit(RecoveryEvent::Scheduled {
            service_name: service_name.clone(),
            strategy: task.strategy,
            priority: task.priority,
        });

        if task.state == RecoveryState::AwaitingManual {
            self.record_audit(AuditEvent::new(
                AuditEventKind::RecoveryAwaitingManual,
                service_name.as_str(),
            ))
            .await;
            self.emit(RecoveryEvent::AwaitingManual { service_name });
        }

        Ok(task)
    }

    /// Attempt the most urgent due task, if any.
    ///
    /// Returns `None` when nothing is due.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Option<RecoveryEvent> {
        let claimed = self.claim_next(Instant::now())?;
        let service_name = claimed.service_name.clone();

        if let Err(violation) = self.anchor.verify(&claimed.integrity_hash) {
            return Some(self.reject_integrity(claimed, violation.to_string()).await);
        }

        debug!(service = %service_name, attempt = claimed.attempt, "Attempting recovery");
        let result = self.executor.attempt(&service_name, claimed.attempt).await;

        let event = {
            let mut guard = self.queue.lock();
            let q = &mut *guard;

            let still_ours = q.tasks.get(&service_name).is_some_and(|s| {
                s.generation == claimed.generation && s.task.state == RecoveryState::InProgress
            });
            if !still_ours {
                debug!(service = %service_name, "Recovery task changed during attempt, discarding result");
                return Some(RecoveryEvent::Cancelled {
                    service_name,
                    reason: "cancelled while attempt in flight".into(),
                });
            }

            match result {
                Ok(()) => {
                    q.tasks.remove(&service_name);
                    self.update_depth(q);
                    RecoveryEvent::Succeeded {
                        service_name: service_name.clone(),
                        attempts: claimed.attempt,
                    }
                }
                Err(e) if claimed.attempt >= self.config.max_retry_attempts => {
                    q.tasks.remove(&service_name);
                    self.update_depth(q);
                    let failure = ResilienceError::PermanentFailure {
                        service: service_name.clone(),
                        attempts: claimed.attempt,
                    };
                    let incident = Incident::new(
                        IncidentKind::PermanentFailure,
                        service_name.as_str(),
                        format!("{failure}; last error: {e}"),
                    );
                    RecoveryEvent::Failed {
                        service_name: service_name.clone(),
                        attempts: claimed.attempt,
                        incident,
                    }
                }
                Err(e) => {
                    let delay = claimed.strategy.backoff(claimed.attempt, &self.config);
                    if let Some(slot) = q.tasks.get_mut(&service_name) {
                        slot.task.state = RecoveryState::Scheduled;
                        slot.task.next_attempt_at = Instant::now() + delay;
                        slot.task.last_error = Some(e.to_string());
                        slot.generation += 1;
                    }
                    q.push(&service_name);
                    self.update_depth(q);
                    RecoveryEvent::RetryScheduled {
                        service_name: service_name.clone(),
                        attempt: claimed.attempt,
                        delay,
                        error: e.to_string(),
                    }
                }
            }
        };

        match &event {
            RecoveryEvent::Succeeded { attempts, .. } => {
                info!(service = %service_name, attempts, "Recovery succeeded");
                self.record_audit(
                    AuditEvent::new(AuditEventKind::RecoverySucceeded, service_name.as_str())
                        .with_detail(json!({ "attempts": attempts })),
                )
                .await;
            }
            RecoveryEvent::Failed {
                attempts, incident, ..
            } => {
                error!(
                    service = %service_name,
                    attempts,
                    incident_id = %incident.id,
                    "Recovery failed permanently, manual intervention required"
                );
                self.incidents.write().push(incident.clone());
                self.record_audit(
                    AuditEvent::new(AuditEventKind::RecoveryFailed, service_name.as_str())
                        .with_detail(json!({
                            "attempts": attempts,
                            "incident_id": incident.id.to_string(),
                        })),
                )
                .await;
            }
            RecoveryEvent::RetryScheduled {
                attempt, delay, error, ..
            } => {
                warn!(
                    service = %service_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Recovery attempt failed, retrying"
                );
            }
            _ => {}
        }

        self.emit(event.clone());
        Some(event)
    }

    /// Run ticks until nothing is due.
    pub async fn drain_due(&self) -> Vec<RecoveryEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.tick().await {
            events.push(event);
        }
        events
    }

    /// Resolve a task waiting for manual intervention.
    pub async fn resolve_manual(&self, service: &ServiceName, succeeded: bool) -> ResilienceResult<()> {
        {
            let mut guard = self.queue.lock();
            let q = &mut *guard;
            let slot = q
                .tasks
                .get(service)
                .ok_or_else(|| ResilienceError::TaskNotFound(service.clone()))?;
            if slot.task.state != RecoveryState::AwaitingManual {
                return Err(ResilienceError::InvalidTaskState {
                    service: service.clone(),
                    state: slot.task.state,
                });
            }
            q.tasks.remove(service);
            self.update_depth(q);
        }

        info!(service = %service, succeeded, "Recovery resolved manually");
        self.record_audit(
            AuditEvent::new(AuditEventKind::RecoveryResolvedManually, service.as_str())
                .with_detail(json!({ "succeeded": succeeded })),
        )
        .await;
        self.emit(RecoveryEvent::ResolvedManually {
            service_name: service.clone(),
            succeeded,
        });
        Ok(())
    }

    /// Cancel a live task.
    pub async fn cancel(&self, service: &ServiceName, reason: impl Into<String>) -> ResilienceResult<()> {
        let reason = reason.into();
        {
            let mut guard = self.queue.lock();
            let q = &mut *guard;
            if q.tasks.remove(service).is_none() {
                return Err(ResilienceError::TaskNotFound(service.clone()));
            }
            self.update_depth(q);
        }

        info!(service = %service, reason = %reason, "Recovery cancelled");
        self.record_audit(
            AuditEvent::new(AuditEventKind::RecoveryCancelled, service.as_str())
                .with_detail(json!({ "reason": reason })),
        )
        .await;
        self.emit(RecoveryEvent::Cancelled {
            service_name: service.clone(),
            reason,
        });
        Ok(())
    }

    pub fn task(&self, service: &ServiceName) -> Option<RecoveryTask> {
        self.queue.lock().tasks.get(service).map(|s| s.task.clone())
    }

    pub fn tasks(&self) -> Vec<RecoveryTask> {
        self.queue.lock().tasks.values().map(|s| s.task.clone()).collect()
    }

    /// Tasks scheduled or in progress.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().depth()
    }

    /// Incidents raised so far.
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.read().clone()
    }

    /// Tick on `tick_interval` until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        info!("Recovery orchestrator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    let events = self.drain_due().await;
                    if !events.is_empty() {
                        debug!(count = events.len(), "Recovery tick processed tasks");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Recovery orchestrator stopped");
    }

    fn claim_next(&self, now: Instant) -> Option<Claimed> {
        let mut guard = self.queue.lock();
        let q = &mut *guard;

        let mut deferred = Vec::new();
        let mut picked = None;
        while let Some(entry) = q.heap.pop() {
            let live = q.tasks.get(&entry.service_name).is_some_and(|s| {
                s.generation == entry.generation && s.task.state == RecoveryState::Scheduled
            });
            if !live {
                continue;
            }
            if entry.next_attempt_at > now {
                deferred.push(entry);
                continue;
            }
            picked = Some(entry);
            break;
        }
        q.heap.extend(deferred);

        let entry = picked?;
        let slot = q.tasks.get_mut(&entry.service_name)?;
        slot.task.state = RecoveryState::InProgress;
        slot.task.attempt_count += 1;

        Some(Claimed {
            service_name: entry.service_name,
            attempt: slot.task.attempt_count,
            generation: slot.generation,
            integrity_hash: slot.task.integrity_hash.clone(),
            strategy: slot.task.strategy,
        })
    }

    async fn reject_integrity(&self, claimed: Claimed, reason: String) -> RecoveryEvent {
        let service_name = claimed.service_name;
        {
            let mut guard = self.queue.lock();
            let q = &mut *guard;
            if q
                .tasks
                .get(&service_name)
                .is_some_and(|s| s.generation == claimed.generation)
            {
                q.tasks.remove(&service_name);
            }
            self.update_depth(q);
        }

        let incident = Incident::new(IncidentKind::IntegrityViolation, service_name.as_str(), reason);
        error!(
            service = %service_name,
            incident_id = %incident.id,
            "Integrity check failed before recovery attempt, task dropped"
        );
        self.incidents.write().push(incident.clone());
        self.record_audit(
            AuditEvent::new(AuditEventKind::IntegrityViolation, service_name.as_str())
                .with_detail(json!({ "stage": "recovery_attempt" })),
        )
        .await;

        let event = RecoveryEvent::IntegrityRejected {
            service_name,
            incident,
        };
        self.emit(event.clone());
        event
    }

    fn update_depth(&self, q: &QueueState) {
        if let Some(metrics) = &self.metrics {
            metrics.recovery_queue_depth.set(q.depth() as i64);
        }
    }

    fn emit(&self, event: RecoveryEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn record_audit(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(e) = self.audit.append(event).await {
            error!(kind = %kind, error = %e, "Failed to append recovery audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::executor::NoOpRecoveryExecutor;
    use async_trait::async_trait;
    use govbus_observability::MemoryAuditLedger;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
        order: Mutex<Vec<ServiceName>>,
    }

    impl FlakyExecutor {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                order: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecoveryExecutor for FlakyExecutor {
        async fn attempt(&self, service: &ServiceName, _attempt: u32) -> ResilienceResult<()> {
            self.order.lock().push(service.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ResilienceError::TransientDependency {
                    service: service.clone(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            max_retry_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            linear_increment: Duration::from_secs(2),
            tick_interval: Duration::from_millis(100),
        }
    }

    fn orchestrator(
        executor: Arc<dyn RecoveryExecutor>,
    ) -> (RecoveryOrchestrator, Arc<MemoryAuditLedger>) {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let orchestrator =
            RecoveryOrchestrator::new(config(), IntegrityAnchor::default(), executor, ledger.clone());
        (orchestrator, ledger)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_priority_value_dequeued_first() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let (orchestrator, _) = orchestrator(executor.clone());

        orchestrator
            .schedule(RecoveryRequest::new("transport").priority(2))
            .await
            .unwrap();
        orchestrator
            .schedule(RecoveryRequest::new("policy").priority(1))
            .await
            .unwrap();

        orchestrator.drain_due().await;
        assert_eq!(
            *executor.order.lock(),
            vec![ServiceName::from("policy"), ServiceName::from("transport")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_is_idempotent() {
        let (orchestrator, _) = orchestrator(Arc::new(NoOpRecoveryExecutor));
        orchestrator.schedule(RecoveryRequest::new("opa")).await.unwrap();
        orchestrator.schedule(RecoveryRequest::new("opa")).await.unwrap();

        assert_eq!(orchestrator.queue_depth(), 1);
        assert_eq!(orchestrator.drain_due().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_retry_then_success() {
        let (orchestrator, ledger) = orchestrator(Arc::new(FlakyExecutor::new(2)));
        orchestrator.schedule(RecoveryRequest::new("opa")).await.unwrap();

        let first = orchestrator.tick().await.unwrap();
        assert!(matches!(first, RecoveryEvent::RetryScheduled { delay, .. } if delay == Duration::from_secs(1)));
        assert!(orchestrator.tick().await.is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = orchestrator.tick().await.unwrap();
        assert!(matches!(second, RecoveryEvent::RetryScheduled { delay, .. } if delay == Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(2)).await;
        let third = orchestrator.tick().await.unwrap();
        assert!(matches!(third, RecoveryEvent::Succeeded { attempts: 3, .. }));
        assert!(orchestrator.task(&"opa".into()).is_none());
        assert_eq!(ledger.count_kind(AuditEventKind::RecoverySucceeded), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_raises_incident() {
        let (orchestrator, ledger) = orchestrator(Arc::new(FlakyExecutor::new(u32::MAX)));
        orchestrator
            .schedule(RecoveryRequest::new("opa").strategy(RecoveryStrategy::Immediate))
            .await
            .unwrap();

        let events = orchestrator.drain_due().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], RecoveryEvent::Failed { attempts: 3, .. }));

        let incidents = orchestrator.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::PermanentFailure);
        assert_eq!(ledger.count_kind(AuditEventKind::RecoveryFailed), 1);
        assert_eq!(orchestrator.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_waits_for_resolution() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let (orchestrator, ledger) = orchestrator(executor.clone());
        let task = orchestrator
            .schedule(RecoveryRequest::new("opa").strategy(RecoveryStrategy::Manual))
            .await
            .unwrap();
        assert_eq!(task.state, RecoveryState::AwaitingManual);

        assert!(orchestrator.drain_due().await.is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        orchestrator.resolve_manual(&"opa".into(), true).await.unwrap();
        assert!(orchestrator.task(&"opa".into()).is_none());
        assert_eq!(ledger.count_kind(AuditEventKind::RecoveryResolvedManually), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_requires_awaiting_manual() {
        let (orchestrator, _) = orchestrator(Arc::new(NoOpRecoveryExecutor));
        orchestrator.schedule(RecoveryRequest::new("opa")).await.unwrap();

        let err = orchestrator.resolve_manual(&"opa".into(), true).await.unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidTaskState { state: RecoveryState::Scheduled, .. }));

        let err = orchestrator.resolve_manual(&"nope".into(), true).await.unwrap_err();
        assert!(matches!(err, ResilienceError::TaskNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_hash_never_schedules() {
        let executor = Arc::new(FlakyExecutor::new(0));
        let (orchestrator, ledger) = orchestrator(executor.clone());

        let err = orchestrator
            .schedule(RecoveryRequest::new("opa").integrity_hash("tampered"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Integrity(_)));
        assert_eq!(orchestrator.queue_depth(), 0);
        assert!(orchestrator.drain_due().await.is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.count_kind(AuditEventKind::IntegrityViolation), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_task() {
        let (orchestrator, ledger) = orchestrator(Arc::new(NoOpRecoveryExecutor));
        orchestrator.schedule(RecoveryRequest::new("opa")).await.unwrap();

        orchestrator.cancel(&"opa".into(), "operator").await.unwrap();
        assert!(orchestrator.drain_due().await.is_empty());
        assert_eq!(ledger.count_kind(AuditEventKind::RecoveryCancelled), 1);
        assert!(orchestrator.cancel(&"opa".into(), "again").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_track_queue_depth() {
        let metrics = Arc::new(BusMetrics::new().unwrap());
        let ledger = Arc::new(MemoryAuditLedger::new());
        let orchestrator = RecoveryOrchestrator::new(
            config(),
            IntegrityAnchor::default(),
            Arc::new(NoOpRecoveryExecutor),
            ledger,
        )
        .with_metrics(metrics.clone());

        orchestrator.schedule(RecoveryRequest::new("a")).await.unwrap();
        orchestrator.schedule(RecoveryRequest::new("b")).await.unwrap();
        assert_eq!(metrics.recovery_queue_depth.get(), 2);

        orchestrator.drain_due().await;
        assert_eq!(metrics.recovery_queue_depth.get(), 0);
    }
}
