//! Recovery orchestration.
//!
//! Tasks are scheduled per dependency, ordered by priority then due time,
//! retried with the configured backoff and surfaced as incidents once
//! attempts run out.

pub mod executor;
pub mod orchestrator;
pub mod task;
pub mod trigger;

pub use executor::{NoOpRecoveryExecutor, RecoveryExecutor};
pub use orchestrator::RecoveryOrchestrator;
pub use task::{RecoveryEvent, RecoveryRequest, RecoveryState, RecoveryStrategy, RecoveryTask};
pub use trigger::RecoveryTrigger;
