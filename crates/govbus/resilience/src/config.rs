//! Resilience configuration.
//!
//! Every threshold is a tunable default; deployments override them through
//! the bus configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResilienceError, ResilienceResult};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit waits before letting a probe call through.
    pub cooldown: Duration,

    /// Calls allowed through while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ResilienceError::Configuration(
                "half_open_max_calls must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Score at or above which the system is healthy.
    pub healthy_threshold: f64,

    /// Score at or above which the system is degraded (below is critical).
    pub degraded_threshold: f64,

    /// Snapshots kept in the rolling history.
    pub history_capacity: usize,

    /// Interval of the background observation loop.
    pub observe_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 0.7,
            degraded_threshold: 0.5,
            history_capacity: 100,
            observe_interval: Duration::from_secs(5),
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.healthy_threshold) || !in_unit(self.degraded_threshold) {
            return Err(ResilienceError::Configuration(
                "health thresholds must lie in [0, 1]".into(),
            ));
        }
        if self.degraded_threshold > self.healthy_threshold {
            return Err(ResilienceError::Configuration(format!(
                "degraded_threshold {} exceeds healthy_threshold {}",
                self.degraded_threshold, self.healthy_threshold
            )));
        }
        if self.history_capacity == 0 {
            return Err(ResilienceError::Configuration(
                "history_capacity must be at least 1".into(),
            ));
        }
        if self.observe_interval.is_zero() {
            return Err(ResilienceError::Configuration(
                "observe_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Recovery orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Failed attempts before a task is declared permanently failed.
    pub max_retry_attempts: u32,

    /// First retry delay for exponential backoff.
    pub base_delay: Duration,

    /// Upper bound for any computed backoff.
    pub max_delay: Duration,

    /// Added per failed attempt for linear backoff.
    pub linear_increment: Duration,

    /// Interval of the background tick loop.
    pub tick_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            linear_increment: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_retry_attempts == 0 {
            return Err(ResilienceError::Configuration(
                "max_retry_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ResilienceError::Configuration(
                "base_delay exceeds max_delay".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ResilienceError::Configuration(
                "tick_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(HealthConfig::default().validate().is_ok());
        assert!(RecoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_health_thresholds_rejected() {
        let config = HealthConfig {
            healthy_threshold: 0.4,
            degraded_threshold: 0.6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ResilienceError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
