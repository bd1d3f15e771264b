//! Bus configuration.
//!
//! [`BusConfig`] gathers every component's settings. Loading it from files
//! or secret stores is left to the embedding application; it only parses
//! JSON and validates.

use std::time::Duration;

use govbus_deliberation::DeliberationConfig;
use govbus_observability::TracingConfig;
use govbus_resilience::{CircuitBreakerConfig, HealthConfig, RecoveryConfig};
use govbus_scoring::{RouterConfig, ScoringConfig};
use govbus_types::CONSTITUTIONAL_HASH;
use govbus_workflow::ExecutorConfig;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::policy::LocalRules;

/// Which authorization backend the gateway builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    LocalFast,
    ExternalPolicy,
    Hybrid,
}

/// What to do when the policy engine cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Refuse the message for now; it can be retried.
    FailClosed,
    /// Let the message through on local rules alone.
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub validation_mode: ValidationMode,
    pub failure_policy: FailurePolicy,
    pub local_rules: LocalRules,

    /// Deadline for one policy evaluation.
    pub policy_timeout: Duration,

    /// Deadline for one transport delivery.
    pub transport_timeout: Duration,

    /// Delivery attempts for a message approved in deliberation.
    pub approved_delivery_attempts: u32,

    /// Pause between those attempts.
    pub approved_delivery_backoff: Duration,

    /// How long a resolved message stays in the dedup table. Resubmitting
    /// it after this window processes it as new.
    pub record_retention: Duration,

    /// How often expired dedup records are evicted.
    pub record_sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::LocalFast,
            failure_policy: FailurePolicy::FailClosed,
            local_rules: LocalRules::default(),
            policy_timeout: Duration::from_secs(2),
            transport_timeout: Duration::from_secs(5),
            approved_delivery_attempts: 3,
            approved_delivery_backoff: Duration::from_secs(1),
            record_retention: Duration::from_secs(3600),
            record_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.policy_timeout.is_zero() || self.transport_timeout.is_zero() {
            return Err(GatewayError::Configuration(
                "policy_timeout and transport_timeout must be non-zero".into(),
            ));
        }
        if self.approved_delivery_attempts == 0 {
            return Err(GatewayError::Configuration(
                "approved_delivery_attempts must be at least 1".into(),
            ));
        }
        if self.record_retention.is_zero() || self.record_sweep_interval.is_zero() {
            return Err(GatewayError::Configuration(
                "record_retention and record_sweep_interval must be non-zero".into(),
            ));
        }
        if self.local_rules.max_payload_bytes == 0 {
            return Err(GatewayError::Configuration(
                "local_rules.max_payload_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Messages processed at once.
    pub concurrency: usize,

    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.concurrency == 0 {
            return Err(GatewayError::Configuration(
                "worker concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(GatewayError::Configuration(
                "worker poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`GovernanceBus`](crate::GovernanceBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Hash every message and step must present.
    pub integrity_hash: String,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub recovery: RecoveryConfig,
    pub scoring: ScoringConfig,
    pub router: RouterConfig,
    pub deliberation: DeliberationConfig,
    pub executor: ExecutorConfig,
    pub gateway: GatewayConfig,
    pub worker: WorkerConfig,

    /// Subscriber settings for the embedding binary's `init_tracing` call.
    pub tracing: TracingConfig,

    /// How often overdue deliberation items are expired.
    pub deliberation_sweep_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            integrity_hash: CONSTITUTIONAL_HASH.to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
            recovery: RecoveryConfig::default(),
            scoring: ScoringConfig::default(),
            router: RouterConfig::default(),
            deliberation: DeliberationConfig::default(),
            executor: ExecutorConfig::default(),
            gateway: GatewayConfig::default(),
            worker: WorkerConfig::default(),
            tracing: TracingConfig::default(),
            deliberation_sweep_interval: Duration::from_secs(1),
        }
    }
}

impl BusConfig {
    /// Parse and validate. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> GatewayResult<Self> {
        let config: BusConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.integrity_hash.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "integrity_hash must not be empty".into(),
            ));
        }
        if self.deliberation_sweep_interval.is_zero() {
            return Err(GatewayError::Configuration(
                "deliberation_sweep_interval must be non-zero".into(),
            ));
        }
        self.circuit_breaker.validate()?;
        self.health.validate()?;
        self.recovery.validate()?;
        self.scoring.validate()?;
        self.router.validate()?;
        self.deliberation.validate()?;
        self.executor.validate()?;
        self.gateway.validate()?;
        self.worker.validate()
    }
}
