//! Circuit breaker state machine.
//!
//! One breaker per tracked dependency:
//! - `closed --(N consecutive failures)--> open`
//! - `open --(cooldown elapsed, next call)--> half_open`
//! - `half_open --(success)--> closed`
//! - `half_open --(failure)--> open` (cooldown restarts)
//!
//! All mutation happens under the breaker's own lock, so transitions for one
//! service are linearizable while other services never contend.

use chrono::{DateTime, Utc};
use govbus_types::ServiceName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,

    /// Calls are rejected until the cooldown elapses.
    Open,

    /// A probe call decides whether to close or re-open.
    HalfOpen,
}

impl CircuitState {
    /// Weight used by the health aggregator.
    pub fn health_weight(&self) -> f64 {
        match self {
            CircuitState::Closed => 1.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 0.0,
        }
    }

    /// Gauge encoding (0 closed, 1 half-open, 2 open).
    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub service_name: ServiceName,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition_at: DateTime<Utc>,
}

/// A state change produced by the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub service_name: ServiceName,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
    last_transition_at: DateTime<Utc>,
}

/// Circuit breaker for a single dependency.
pub struct CircuitBreaker {
    service_name: ServiceName,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service_name: ServiceName, config: CircuitBreakerConfig) -> Self {
        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_calls: 0,
                opened_at: None,
                last_transition_at: Utc::now(),
            }),
        }
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            service_name: self.service_name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_transition_at: inner.last_transition_at,
        }
    }

    /// Ask to place a call.
    ///
    /// This is "the next call" of the state machine: an open breaker whose
    /// cooldown has elapsed moves to half-open here.
    pub fn try_acquire(&self) -> (bool, Option<BreakerTransition>) {
        let mut inner = self.inner.lock();
        let transition = self.maybe_half_open(&mut inner);

        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };

        (allowed, transition)
    }

    /// Record the outcome of a call, returning every transition it caused.
    pub fn record(&self, success: bool) -> Vec<BreakerTransition> {
        let mut inner = self.inner.lock();
        let mut transitions = Vec::new();

        // An outcome reported against an open breaker past its cooldown is
        // the probe call.
        if let Some(t) = self.maybe_half_open(&mut inner) {
            transitions.push(t);
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service_name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening due to failures"
                    );
                    transitions.push(self.transition_to(&mut inner, CircuitState::Open));
                }
            }
            (CircuitState::HalfOpen, true) => {
                info!(service = %self.service_name, "Circuit breaker closing after successful probe");
                transitions.push(self.transition_to(&mut inner, CircuitState::Closed));
            }
            (CircuitState::HalfOpen, false) => {
                inner.consecutive_failures += 1;
                warn!(service = %self.service_name, "Circuit breaker re-opening after half-open failure");
                transitions.push(self.transition_to(&mut inner, CircuitState::Open));
            }
            (CircuitState::Open, _) => {
                debug!(
                    service = %self.service_name,
                    success,
                    "Outcome recorded while circuit open, ignored"
                );
            }
        }

        transitions
    }

    /// Administrative reset to closed.
    pub fn reset(&self) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
            return None;
        }
        info!(service = %self.service_name, from = %inner.state, "Circuit breaker reset");
        Some(self.transition_to(&mut inner, CircuitState::Closed))
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) -> Option<BreakerTransition> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        if opened_at.elapsed() < self.config.cooldown {
            return None;
        }
        info!(service = %self.service_name, "Circuit breaker half-open after cooldown");
        Some(self.transition_to(inner, CircuitState::HalfOpen))
    }

    fn transition_to(&self, inner: &mut BreakerInner, to: CircuitState) -> BreakerTransition {
        let from = inner.state;
        let now = Utc::now();
        inner.state = to;
        inner.last_transition_at = now;
        inner.half_open_calls = 0;

        match to {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {}
        }

        BreakerTransition {
            service_name: self.service_name.clone(),
            from,
            to,
            at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(100),
            half_open_max_calls: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_open_half_open_closed() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());

        assert!(breaker.record(false).is_empty());
        assert!(breaker.record(false).is_empty());
        let t = breaker.record(false);
        assert_eq!(t.len(), 1);
        assert_eq!((t[0].from, t[0].to), (CircuitState::Closed, CircuitState::Open));

        let (allowed, transition) = breaker.try_acquire();
        assert!(!allowed);
        assert!(transition.is_none());

        tokio::time::advance(Duration::from_millis(150)).await;

        let (allowed, transition) = breaker.try_acquire();
        assert!(allowed);
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::HalfOpen));

        let t = breaker.record(true);
        assert_eq!(t[0].to, CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_restarts_cooldown() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());
        for _ in 0..3 {
            breaker.record(false);
        }

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(breaker.try_acquire().0);
        let t = breaker.record(false);
        assert_eq!(t[0].to, CircuitState::Open);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!breaker.try_acquire().0);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(breaker.try_acquire().0);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_probe_calls() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(breaker.try_acquire().0);
        assert!(!breaker.try_acquire().0);
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());

        breaker.record(false);
        breaker.record(false);
        breaker.record(true);
        breaker.record(false);
        breaker.record(false);

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_after_cooldown_acts_as_probe() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        let t = breaker.record(true);
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].to, CircuitState::HalfOpen);
        assert_eq!(t[1].to, CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let breaker = CircuitBreaker::new("opa".into(), test_config());
        assert!(breaker.reset().is_none());
        for _ in 0..3 {
            breaker.record(false);
        }
        let t = breaker.reset();
        assert_eq!(t.map(|t| (t.from, t.to)), Some((CircuitState::Open, CircuitState::Closed)));
    }
}
