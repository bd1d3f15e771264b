//! Deliberation Coordinator.
//!
//! Holds messages awaiting approver decisions and resolves them once quorum
//! is reached, the item is cancelled, or its timeout elapses. Waiting on an
//! item is an explicit suspension point: callers `await` [`wait`] and may
//! drop the future at any time.
//!
//! [`wait`]: DeliberationCoordinator::wait

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use govbus_observability::BusMetrics;
use govbus_types::{AgentMessage, DeliberationId};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DeliberationConfig;
use crate::error::{DeliberationError, DeliberationResult};
use crate::item::{
    ApproverDecision, Decision, DeliberationItem, DeliberationStatus, Resolution,
};

/// Upper bound used when a configured timeout does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

struct Slot {
    item: DeliberationItem,
    deadline: Instant,
    resolved: Option<Instant>,
    status_tx: watch::Sender<DeliberationStatus>,
}

impl Slot {
    fn is_overdue(&self, now: Instant) -> bool {
        self.item.status == DeliberationStatus::Pending && now >= self.deadline
    }

    fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        self.resolved
            .is_some_and(|resolved| now.duration_since(resolved) >= retention)
    }
}

/// Holds high-impact messages for approver review and resolves each item by
/// quorum, cancellation or timeout.
pub struct DeliberationCoordinator {
    config: DeliberationConfig,
    items: DashMap<DeliberationId, Slot>,
    pending: AtomicI64,
    metrics: Option<Arc<BusMetrics>>,
}

impl DeliberationCoordinator {
    pub fn new(config: DeliberationConfig) -> DeliberationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            items: DashMap::new(),
            pending: AtomicI64::new(0),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &DeliberationConfig {
        &self.config
    }

    /// Hold `message` for review and return the new item's id.
    pub fn enqueue(&self, message: AgentMessage) -> DeliberationId {
        let item_id = DeliberationId::generate();
        let created_at = Utc::now();
        let deadline = chrono::Duration::from_std(self.config.timeout)
            .ok()
            .and_then(|timeout| created_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let now = Instant::now();
        let instant_deadline = now
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        info!(
            item_id = %item_id,
            message_id = %message.message_id,
            required = self.config.required_approvals,
            "Message held for deliberation"
        );

        let (status_tx, _) = watch::channel(DeliberationStatus::Pending);
        self.items.insert(
            item_id,
            Slot {
                item: DeliberationItem {
                    item_id,
                    message,
                    status: DeliberationStatus::Pending,
                    decisions: Vec::new(),
                    created_at,
                    deadline,
                    resolved_at: None,
                    resolution: None,
                },
                deadline: instant_deadline,
                resolved: None,
                status_tx,
            },
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.update_gauge();

        item_id
    }

    /// Record one approver's decision.
    ///
    /// Returns the item as it stands after the decision. Decisions on a
    /// resolved item, or on an item whose deadline has passed, fail with
    /// [`DeliberationError::AlreadyResolved`] and change nothing.
    pub fn decide(
        &self,
        item_id: DeliberationId,
        approver: impl Into<String>,
        decision: Decision,
    ) -> DeliberationResult<DeliberationItem> {
        let approver = approver.into();
        let mut resolved = false;

        let result = {
            let mut slot = self
                .items
                .get_mut(&item_id)
                .ok_or(DeliberationError::ItemNotFound(item_id))?;

            if slot.is_overdue(Instant::now()) {
                resolved |= self.resolve(&mut slot, self.config.timeout_disposition, Resolution::Timeout);
            }

            if slot.item.status.is_terminal() {
                warn!(
                    item_id = %item_id,
                    approver = %approver,
                    status = %slot.item.status,
                    "Late decision rejected"
                );
                Err(DeliberationError::AlreadyResolved {
                    item_id,
                    status: slot.item.status,
                })
            } else if !self.config.is_eligible(&approver) {
                warn!(item_id = %item_id, approver = %approver, "Ineligible approver");
                Err(DeliberationError::NotEligible { item_id, approver })
            } else if slot.item.has_decided(&approver) {
                Err(DeliberationError::DuplicateDecision { item_id, approver })
            } else {
                debug!(item_id = %item_id, approver = %approver, ?decision, "Decision recorded");
                slot.item.decisions.push(ApproverDecision {
                    approver,
                    decision,
                    decided_at: Utc::now(),
                });
                if let Some(verdict) = slot.item.quorum(&self.config) {
                    resolved |= self.resolve(&mut slot, verdict, Resolution::Quorum);
                }
                Ok(slot.item.clone())
            }
        };

        if resolved {
            self.update_gauge();
        }
        result
    }

    /// Current view of an item. An overdue item is resolved first.
    pub fn status(&self, item_id: DeliberationId) -> DeliberationResult<DeliberationItem> {
        let mut resolved = false;
        let item = {
            let mut slot = self
                .items
                .get_mut(&item_id)
                .ok_or(DeliberationError::ItemNotFound(item_id))?;
            if slot.is_overdue(Instant::now()) {
                resolved = self.resolve(&mut slot, self.config.timeout_disposition, Resolution::Timeout);
            }
            slot.item.clone()
        };
        if resolved {
            self.update_gauge();
        }
        Ok(item)
    }

    /// Administrative cancellation. The item resolves as rejected.
    pub fn cancel(
        &self,
        item_id: DeliberationId,
        by: impl Into<String>,
        reason: impl Into<String>,
    ) -> DeliberationResult<DeliberationItem> {
        let result = {
            let mut slot = self
                .items
                .get_mut(&item_id)
                .ok_or(DeliberationError::ItemNotFound(item_id))?;
            if slot.item.status.is_terminal() {
                Err(DeliberationError::AlreadyResolved {
                    item_id,
                    status: slot.item.status,
                })
            } else {
                let resolution = Resolution::Cancelled {
                    by: by.into(),
                    reason: reason.into(),
                };
                self.resolve(&mut slot, Decision::Reject, resolution);
                Ok(slot.item.clone())
            }
        };
        if result.is_ok() {
            self.update_gauge();
        }
        result
    }

    /// Suspend until the item resolves by quorum, cancellation or timeout.
    ///
    /// Dropping the returned future abandons the wait without affecting
    /// the item.
    pub async fn wait(&self, item_id: DeliberationId) -> DeliberationResult<DeliberationItem> {
        let (mut status_rx, deadline) = {
            let slot = self
                .items
                .get(&item_id)
                .ok_or(DeliberationError::ItemNotFound(item_id))?;
            (slot.status_tx.subscribe(), slot.deadline)
        };

        loop {
            if status_rx.borrow_and_update().is_terminal() {
                break;
            }
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped: the item was purged.
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.status(item_id)?;
                }
            }
        }

        self.status(item_id)
    }

    /// Resolve every pending item whose deadline has passed.
    pub fn expire_overdue(&self) -> Vec<DeliberationItem> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for mut slot in self.items.iter_mut() {
            if slot.is_overdue(now) {
                self.resolve(&mut slot, self.config.timeout_disposition, Resolution::Timeout);
                expired.push(slot.item.clone());
            }
        }
        if !expired.is_empty() {
            self.update_gauge();
        }
        expired
    }

    /// Periodically expire overdue items and purge stale resolved ones until
    /// `shutdown` flips to `true`.
    pub async fn run_expiry_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        info!("Deliberation expiry sweeper started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.expire_overdue();
                    if !expired.is_empty() {
                        info!(count = expired.len(), "Expired overdue deliberation items");
                    }
                    let purged = self.purge_resolved();
                    if purged > 0 {
                        debug!(purged, remaining = self.items.len(), "Purged resolved deliberation items");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Deliberation expiry sweeper stopped");
    }

    /// Drop items resolved longer than `resolved_retention` ago. Returns how
    /// many were removed.
    pub fn purge_resolved(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.resolved_retention;
        let before = self.items.len();
        self.items.retain(|_, slot| !slot.is_stale(now, retention));
        before.saturating_sub(self.items.len())
    }

    /// Items tracked, pending or resolved.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst).max(0) as usize
    }

    /// Pending items, oldest first.
    pub fn pending_items(&self) -> Vec<DeliberationItem> {
        let mut items: Vec<DeliberationItem> = self
            .items
            .iter()
            .filter(|slot| slot.item.status == DeliberationStatus::Pending)
            .map(|slot| slot.item.clone())
            .collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    /// Move a pending slot to its terminal state. Returns whether it did.
    fn resolve(&self, slot: &mut Slot, verdict: Decision, resolution: Resolution) -> bool {
        if slot.item.status.is_terminal() {
            return false;
        }

        let status = DeliberationStatus::from(verdict);
        slot.item.status = status;
        slot.item.resolved_at = Some(Utc::now());
        slot.resolved = Some(Instant::now());
        slot.item.resolution = Some(resolution);
        slot.status_tx.send_replace(status);
        self.pending.fetch_sub(1, Ordering::SeqCst);

        info!(
            item_id = %slot.item.item_id,
            message_id = %slot.item.message.message_id,
            status = %status,
            resolution = ?slot.item.resolution,
            approvals = slot.item.approvals(),
            rejections = slot.item.rejections(),
            "Deliberation resolved"
        );
        true
    }

    fn update_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics
                .deliberation_queue_depth
                .set(self.pending.load(Ordering::SeqCst));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuorumMode;
    use govbus_types::{AgentId, TenantId};

    fn message() -> AgentMessage {
        AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("planner"),
            AgentId::new("executor"),
            serde_json::json!({ "action": "transfer" }),
        )
    }

    fn pool(required: u32, mode: QuorumMode) -> DeliberationCoordinator {
        DeliberationCoordinator::new(DeliberationConfig {
            required_approvals: required,
            mode,
            eligible_approvers: vec!["alice".into(), "bob".into(), "carol".into()],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_single_approver_approves() {
        let coordinator = DeliberationCoordinator::new(DeliberationConfig::default()).unwrap();
        let id = coordinator.enqueue(message());
        assert_eq!(coordinator.pending_count(), 1);

        let item = coordinator.decide(id, "alice", Decision::Approve).unwrap();
        assert_eq!(item.status, DeliberationStatus::Approved);
        assert_eq!(item.resolution, Some(Resolution::Quorum));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn test_two_of_three_threshold() {
        let coordinator = pool(2, QuorumMode::Threshold);
        let id = coordinator.enqueue(message());

        let item = coordinator.decide(id, "alice", Decision::Approve).unwrap();
        assert_eq!(item.status, DeliberationStatus::Pending);
        let item = coordinator.decide(id, "bob", Decision::Reject).unwrap();
        assert_eq!(item.status, DeliberationStatus::Pending);
        let item = coordinator.decide(id, "carol", Decision::Approve).unwrap();
        assert_eq!(item.status, DeliberationStatus::Approved);
    }

    #[test]
    fn test_threshold_rejects_when_approval_unreachable() {
        let coordinator = pool(2, QuorumMode::Threshold);
        let id = coordinator.enqueue(message());

        coordinator.decide(id, "alice", Decision::Reject).unwrap();
        let item = coordinator.decide(id, "bob", Decision::Reject).unwrap();
        assert_eq!(item.status, DeliberationStatus::Rejected);
    }

    #[test]
    fn test_unanimous_single_rejection_rejects() {
        let coordinator = pool(1, QuorumMode::Unanimous);
        let id = coordinator.enqueue(message());

        coordinator.decide(id, "alice", Decision::Approve).unwrap();
        let item = coordinator.decide(id, "bob", Decision::Reject).unwrap();
        assert_eq!(item.status, DeliberationStatus::Rejected);
    }

    #[test]
    fn test_unanimous_needs_everyone() {
        let coordinator = pool(1, QuorumMode::Unanimous);
        let id = coordinator.enqueue(message());

        coordinator.decide(id, "alice", Decision::Approve).unwrap();
        coordinator.decide(id, "bob", Decision::Approve).unwrap();
        assert_eq!(coordinator.status(id).unwrap().status, DeliberationStatus::Pending);
        let item = coordinator.decide(id, "carol", Decision::Approve).unwrap();
        assert_eq!(item.status, DeliberationStatus::Approved);
    }

    #[test]
    fn test_late_decision_is_already_resolved() {
        let coordinator = pool(1, QuorumMode::Threshold);
        let id = coordinator.enqueue(message());
        coordinator.decide(id, "alice", Decision::Approve).unwrap();
        let before = coordinator.status(id).unwrap().decisions;

        let err = coordinator.decide(id, "bob", Decision::Reject).unwrap_err();
        assert!(matches!(
            err,
            DeliberationError::AlreadyResolved {
                status: DeliberationStatus::Approved,
                ..
            }
        ));
        assert_eq!(coordinator.status(id).unwrap().decisions, before);
    }

    #[test]
    fn test_ineligible_and_duplicate_decisions() {
        let coordinator = pool(2, QuorumMode::Threshold);
        let id = coordinator.enqueue(message());

        assert!(matches!(
            coordinator.decide(id, "mallory", Decision::Approve),
            Err(DeliberationError::NotEligible { .. })
        ));
        coordinator.decide(id, "alice", Decision::Approve).unwrap();
        assert!(matches!(
            coordinator.decide(id, "alice", Decision::Approve),
            Err(DeliberationError::DuplicateDecision { .. })
        ));
        assert_eq!(coordinator.status(id).unwrap().approvals(), 1);
    }

    #[test]
    fn test_unknown_item() {
        let coordinator = pool(1, QuorumMode::Threshold);
        let id = DeliberationId::generate();
        assert!(matches!(
            coordinator.status(id),
            Err(DeliberationError::ItemNotFound(_))
        ));
    }

    #[test]
    fn test_cancel_rejects_and_is_terminal() {
        let coordinator = pool(1, QuorumMode::Threshold);
        let id = coordinator.enqueue(message());

        let item = coordinator.cancel(id, "admin", "superseded").unwrap();
        assert_eq!(item.status, DeliberationStatus::Rejected);
        assert!(matches!(item.resolution, Some(Resolution::Cancelled { .. })));
        assert!(coordinator.cancel(id, "admin", "again").is_err());
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_to_disposition() {
        let coordinator = DeliberationCoordinator::new(DeliberationConfig {
            timeout: Duration::from_secs(10),
            ..Default::default()
        })
        .unwrap();
        let id = coordinator.enqueue(message());

        tokio::time::advance(Duration::from_secs(11)).await;

        let err = coordinator.decide(id, "alice", Decision::Approve).unwrap_err();
        assert!(matches!(
            err,
            DeliberationError::AlreadyResolved {
                status: DeliberationStatus::Rejected,
                ..
            }
        ));
        let item = coordinator.status(id).unwrap();
        assert_eq!(item.resolution, Some(Resolution::Timeout));
        assert!(item.decisions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_decision() {
        let coordinator = Arc::new(pool(1, QuorumMode::Threshold));
        let id = coordinator.enqueue(message());

        let waiter = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.wait(id).await }
        });
        tokio::task::yield_now().await;

        coordinator.decide(id, "bob", Decision::Approve).unwrap();
        let item = waiter.await.unwrap().unwrap();
        assert_eq!(item.status, DeliberationStatus::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_timeout() {
        let coordinator = DeliberationCoordinator::new(DeliberationConfig {
            timeout: Duration::from_secs(30),
            timeout_disposition: Decision::Approve,
            ..Default::default()
        })
        .unwrap();
        let id = coordinator.enqueue(message());

        let item = coordinator.wait(id).await.unwrap();
        assert_eq!(item.status, DeliberationStatus::Approved);
        assert_eq!(item.resolution, Some(Resolution::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_and_purge() {
        let coordinator = DeliberationCoordinator::new(DeliberationConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap();
        let first = coordinator.enqueue(message());
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = coordinator.enqueue(message());
        tokio::time::advance(Duration::from_secs(3)).await;

        let expired = coordinator.expire_overdue();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].item_id, first);
        assert_eq!(coordinator.pending_count(), 1);
        assert_eq!(coordinator.pending_items()[0].item_id, second);

        // Still inside the retention window.
        assert_eq!(coordinator.purge_resolved(), 0);
        assert!(coordinator.status(first).is_ok());

        tokio::time::advance(coordinator.config().resolved_retention).await;
        assert_eq!(coordinator.purge_resolved(), 1);
        assert!(matches!(
            coordinator.status(first),
            Err(DeliberationError::ItemNotFound(_))
        ));
        assert_eq!(coordinator.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_items() {
        let coordinator = Arc::new(
            DeliberationCoordinator::new(DeliberationConfig {
                timeout: Duration::from_secs(5),
                ..Default::default()
            })
            .unwrap(),
        );
        let id = coordinator.enqueue(message());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            coordinator
                .clone()
                .run_expiry_sweeper(Duration::from_secs(1), shutdown_rx),
        );

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(
            coordinator.status(id).unwrap().resolution,
            Some(Resolution::Timeout)
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_stale_items() {
        let coordinator = Arc::new(
            DeliberationCoordinator::new(DeliberationConfig {
                timeout: Duration::from_secs(5),
                resolved_retention: Duration::from_secs(10),
                ..Default::default()
            })
            .unwrap(),
        );
        let decided = coordinator.enqueue(message());
        coordinator.decide(decided, "alice", Decision::Approve).unwrap();
        coordinator.enqueue(message());
        assert_eq!(coordinator.len(), 2);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            coordinator
                .clone()
                .run_expiry_sweeper(Duration::from_secs(1), shutdown_rx),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(coordinator.is_empty());
        assert!(coordinator.status(decided).is_err());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
