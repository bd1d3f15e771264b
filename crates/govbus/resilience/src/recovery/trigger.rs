//! Bridge from health degradation to recovery scheduling.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::orchestrator::RecoveryOrchestrator;
use super::task::{RecoveryRequest, RecoveryStrategy};
use crate::error::ResilienceResult;
use crate::health::{HealthObserver, HealthSnapshot, HealthStatus};
use crate::registry::CircuitBreakerRegistry;

/// Schedules recovery for every open breaker when health degrades.
///
/// Critical health schedules at priority 0, degraded at priority 1.
pub struct RecoveryTrigger {
    registry: Arc<CircuitBreakerRegistry>,
    orchestrator: Arc<RecoveryOrchestrator>,
    strategy: RecoveryStrategy,
    integrity_hash: String,
}

impl RecoveryTrigger {
    pub fn new(
        registry: Arc<CircuitBreakerRegistry>,
        orchestrator: Arc<RecoveryOrchestrator>,
        integrity_hash: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            strategy: RecoveryStrategy::ExponentialBackoff,
            integrity_hash: integrity_hash.into(),
        }
    }

    pub fn with_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn priority_for(status: HealthStatus) -> Option<u32> {
        match status {
            HealthStatus::Critical => Some(0),
            HealthStatus::Degraded => Some(1),
            HealthStatus::Healthy | HealthStatus::Unknown => None,
        }
    }
}

#[async_trait]
impl HealthObserver for RecoveryTrigger {
    fn name(&self) -> &str {
        "recovery-trigger"
    }

    async fn on_snapshot(&self, snapshot: &HealthSnapshot) -> ResilienceResult<()> {
        let Some(priority) = Self::priority_for(snapshot.status) else {
            return Ok(());
        };

        for service in self.registry.open_services() {
            debug!(service = %service, status = %snapshot.status, "Health degraded, scheduling recovery");
            let request = RecoveryRequest::new(service.clone())
                .strategy(self.strategy)
                .priority(priority)
                .integrity_hash(self.integrity_hash.clone());
            if let Err(e) = self.orchestrator.schedule(request).await {
                warn!(service = %service, error = %e, "Failed to schedule recovery");
            }
        }
        Ok(())
    }
}
