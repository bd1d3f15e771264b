//! Recovery executor collaborator.

use async_trait::async_trait;
use govbus_types::ServiceName;
use tracing::debug;

use crate::error::ResilienceResult;

/// Performs the actual recovery work for a dependency (reconnect, probe,
/// restart). An `Err` counts as a failed attempt.
#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    async fn attempt(&self, service: &ServiceName, attempt: u32) -> ResilienceResult<()>;
}

/// Executor that always succeeds.
pub struct NoOpRecoveryExecutor;

#[async_trait]
impl RecoveryExecutor for NoOpRecoveryExecutor {
    async fn attempt(&self, service: &ServiceName, attempt: u32) -> ResilienceResult<()> {
        debug!(service = %service, attempt, "No-op recovery attempt");
        Ok(())
    }
}
