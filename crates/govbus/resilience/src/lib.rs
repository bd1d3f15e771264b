//! # govbus Resilience
//!
//! Failure isolation and self-healing for the governed message bus.
//!
//! - [`CircuitBreakerRegistry`]: one tri-state breaker per dependency
//! - [`HealthAggregator`]: rolling health score over all breakers
//! - [`RecoveryOrchestrator`]: priority-ordered retry scheduling
//!
//! Every component is an explicit instance; the application context owns
//! them and hands out `Arc`s.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use govbus_observability::MemoryAuditLedger;
//! use govbus_resilience::{
//!     CircuitBreakerRegistry, HealthAggregator, RecoveryOrchestrator, RecoveryTrigger,
//!     recovery::NoOpRecoveryExecutor,
//! };
//! use govbus_types::{IntegrityAnchor, CONSTITUTIONAL_HASH};
//!
//! let registry = Arc::new(CircuitBreakerRegistry::new(Default::default()));
//! let health = HealthAggregator::new(Default::default(), registry.clone());
//! let recovery = Arc::new(RecoveryOrchestrator::new(
//!     Default::default(),
//!     IntegrityAnchor::default(),
//!     Arc::new(NoOpRecoveryExecutor),
//!     Arc::new(MemoryAuditLedger::new()),
//! ));
//! health.register_callback(Arc::new(RecoveryTrigger::new(
//!     registry.clone(),
//!     recovery.clone(),
//!     CONSTITUTIONAL_HASH,
//! )));
//! ```

#![deny(unsafe_code)]

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod recovery;
pub mod registry;

pub use circuit_breaker::{BreakerTransition, CircuitBreaker, CircuitBreakerState, CircuitState};
pub use config::{CircuitBreakerConfig, HealthConfig, RecoveryConfig};
pub use error::{ResilienceError, ResilienceResult};
pub use health::{HealthAggregator, HealthObserver, HealthSnapshot, HealthStatus};
pub use recovery::{
    RecoveryEvent, RecoveryExecutor, RecoveryOrchestrator, RecoveryRequest, RecoveryState,
    RecoveryStrategy, RecoveryTask, RecoveryTrigger,
};
pub use registry::CircuitBreakerRegistry;
