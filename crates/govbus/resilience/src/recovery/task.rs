//! Recovery task types.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use govbus_types::{Incident, ServiceName, CONSTITUTIONAL_HASH};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::RecoveryConfig;

/// How retries are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Delay doubles each failed attempt, capped at `max_delay`.
    ExponentialBackoff,
    /// Delay grows by `linear_increment` each failed attempt.
    LinearBackoff,
    /// Retry on the next tick.
    Immediate,
    /// Never retried automatically; waits for `resolve_manual`.
    Manual,
}

impl RecoveryStrategy {
    /// Delay before the next attempt after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32, config: &RecoveryConfig) -> Duration {
        let n = failed_attempts.max(1);
        let delay = match self {
            RecoveryStrategy::ExponentialBackoff => {
                let factor = 2u32.saturating_pow(n - 1);
                config.base_delay.saturating_mul(factor)
            }
            RecoveryStrategy::LinearBackoff => config.linear_increment.saturating_mul(n),
            RecoveryStrategy::Immediate | RecoveryStrategy::Manual => Duration::ZERO,
        };
        delay.min(config.max_delay)
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::ExponentialBackoff => write!(f, "exponential_backoff"),
            RecoveryStrategy::LinearBackoff => write!(f, "linear_backoff"),
            RecoveryStrategy::Immediate => write!(f, "immediate"),
            RecoveryStrategy::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle of a recovery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Idle,
    Scheduled,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    AwaitingManual,
}

impl RecoveryState {
    /// Whether the task has been destroyed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryState::Succeeded | RecoveryState::Failed | RecoveryState::Cancelled
        )
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryState::Idle => "idle",
            RecoveryState::Scheduled => "scheduled",
            RecoveryState::InProgress => "in_progress",
            RecoveryState::Succeeded => "succeeded",
            RecoveryState::Failed => "failed",
            RecoveryState::Cancelled => "cancelled",
            RecoveryState::AwaitingManual => "awaiting_manual",
        };
        f.write_str(s)
    }
}

/// Request to recover a dependency.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub service_name: ServiceName,
    pub strategy: RecoveryStrategy,
    /// Lower is more urgent.
    pub priority: u32,
    /// Integrity hash in force when the request was made.
    pub integrity_hash: String,
}

impl RecoveryRequest {
    pub fn new(service_name: impl Into<ServiceName>) -> Self {
        Self {
            service_name: service_name.into(),
            strategy: RecoveryStrategy::ExponentialBackoff,
            priority: 1,
            integrity_hash: CONSTITUTIONAL_HASH.to_string(),
        }
    }

    pub fn strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn integrity_hash(mut self, hash: impl Into<String>) -> Self {
        self.integrity_hash = hash.into();
        self
    }
}

/// A recovery task as seen from outside the orchestrator.
#[derive(Debug, Clone)]
pub struct RecoveryTask {
    pub service_name: ServiceName,
    pub strategy: RecoveryStrategy,
    pub priority: u32,
    pub attempt_count: u32,
    pub next_attempt_at: Instant,
    pub state: RecoveryState,
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl RecoveryTask {
    pub(crate) fn from_request(request: RecoveryRequest, now: Instant) -> Self {
        Self {
            service_name: request.service_name,
            strategy: request.strategy,
            priority: request.priority,
            attempt_count: 0,
            next_attempt_at: now,
            state: RecoveryState::Idle,
            integrity_hash: request.integrity_hash,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Result of one attempt or administrative action.
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    Scheduled {
        service_name: ServiceName,
        strategy: RecoveryStrategy,
        priority: u32,
    },
    Succeeded {
        service_name: ServiceName,
        attempts: u32,
    },
    RetryScheduled {
        service_name: ServiceName,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Attempts exhausted; an incident has been raised.
    Failed {
        service_name: ServiceName,
        attempts: u32,
        incident: Incident,
    },
    AwaitingManual {
        service_name: ServiceName,
    },
    ResolvedManually {
        service_name: ServiceName,
        succeeded: bool,
    },
    Cancelled {
        service_name: ServiceName,
        reason: String,
    },
    /// Integrity check failed before an attempt; the task was dropped.
    IntegrityRejected {
        service_name: ServiceName,
        incident: Incident,
    },
}

impl RecoveryEvent {
    pub fn service_name(&self) -> &ServiceName {
        match self {
            RecoveryEvent::Scheduled { service_name, .. }
            | RecoveryEvent::Succeeded { service_name, .. }
            | RecoveryEvent::RetryScheduled { service_name, .. }
            | RecoveryEvent::Failed { service_name, .. }
            | RecoveryEvent::AwaitingManual { service_name }
            | RecoveryEvent::ResolvedManually { service_name, .. }
            | RecoveryEvent::Cancelled { service_name, .. }
            | RecoveryEvent::IntegrityRejected { service_name, .. } => service_name,
        }
    }
}

/// Heap key ordered by `(priority, next_attempt_at, seq)`, smallest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub priority: u32,
    pub next_attempt_at: Instant,
    pub seq: u64,
    pub service_name: ServiceName,
    pub generation: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` pops the smallest key.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.next_attempt_at.cmp(&self.next_attempt_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let config = RecoveryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let s = RecoveryStrategy::ExponentialBackoff;
        assert_eq!(s.backoff(1, &config), Duration::from_secs(1));
        assert_eq!(s.backoff(2, &config), Duration::from_secs(2));
        assert_eq!(s.backoff(3, &config), Duration::from_secs(4));
        assert_eq!(s.backoff(4, &config), Duration::from_secs(5));
        assert_eq!(s.backoff(40, &config), Duration::from_secs(5));
    }

    #[test]
    fn test_linear_and_immediate_backoff() {
        let config = RecoveryConfig {
            linear_increment: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(
            RecoveryStrategy::LinearBackoff.backoff(3, &config),
            Duration::from_secs(6)
        );
        assert_eq!(RecoveryStrategy::Immediate.backoff(3, &config), Duration::ZERO);
    }

    #[test]
    fn test_queue_pops_lowest_priority_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (seq, priority) in [(0, 2), (1, 1), (2, 3)] {
            heap.push(QueueEntry {
                priority,
                next_attempt_at: now,
                seq,
                service_name: format!("svc-{priority}").into(),
                generation: 0,
            });
        }
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop().map(|e| e.priority)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
