//! Circuit Breaker Registry.
//!
//! Owns one [`CircuitBreaker`] per dependency. Breakers are created lazily
//! and registration is idempotent. Every transition is published on a
//! broadcast channel and mirrored into the breaker-state gauge.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use govbus_observability::BusMetrics;
use govbus_types::ServiceName;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::{BreakerTransition, CircuitBreaker, CircuitBreakerState, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Registry of per-service circuit breakers.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<ServiceName, Arc<CircuitBreaker>>,
    transition_tx: broadcast::Sender<BreakerTransition>,
    metrics: Option<Arc<BusMetrics>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (transition_tx, _) = broadcast::channel(256);
        Self {
            config,
            breakers: DashMap::new(),
            transition_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to breaker transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.transition_tx.subscribe()
    }

    /// Get or create the breaker for a service.
    pub fn register(&self, service: &ServiceName) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }

        let breaker = self
            .breakers
            .entry(service.clone())
            .or_insert_with(|| {
                debug!(service = %service, "Registering circuit breaker");
                Arc::new(CircuitBreaker::new(service.clone(), self.config.clone()))
            })
            .clone();

        if let Some(metrics) = &self.metrics {
            metrics.set_breaker_state(service.as_str(), breaker.state().gauge_value());
        }
        breaker
    }

    /// Record the outcome of a call to `service`.
    pub fn record_outcome(&self, service: &ServiceName, success: bool) -> Vec<BreakerTransition> {
        let breaker = self.register(service);
        let transitions = breaker.record(success);
        for t in &transitions {
            self.publish(t.clone());
        }
        transitions
    }

    pub fn current_state(&self, service: &ServiceName) -> Option<CircuitBreakerState> {
        let breaker = self.breakers.get(service)?.clone();
        Some(breaker.snapshot())
    }

    /// Snapshot of every tracked breaker.
    pub fn snapshot(&self) -> Vec<CircuitBreakerState> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        breakers.iter().map(|b| b.snapshot()).collect()
    }

    /// Services whose breaker is currently open.
    pub fn open_services(&self) -> Vec<ServiceName> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.service_name)
            .collect()
    }

    /// Whether a call to `service` may proceed right now.
    pub fn allow_request(&self, service: &ServiceName) -> bool {
        let breaker = self.register(service);
        let (allowed, transition) = breaker.try_acquire();
        if let Some(t) = transition {
            self.publish(t);
        }
        allowed
    }

    /// Run `fut` under the breaker for `service`.
    ///
    /// An open breaker short-circuits with [`ResilienceError::CircuitOpen`];
    /// otherwise the outcome is recorded and errors surface as
    /// [`ResilienceError::TransientDependency`].
    #[instrument(skip(self, fut), fields(service = %service))]
    pub async fn call<F, T, E>(&self, service: &ServiceName, fut: F) -> ResilienceResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.allow_request(service) {
            return Err(ResilienceError::CircuitOpen(service.clone()));
        }

        let mut guard = OutcomeGuard {
            registry: self,
            service,
            settled: false,
        };
        let result = fut.await;
        guard.settled = true;

        match result {
            Ok(value) => {
                self.record_outcome(service, true);
                Ok(value)
            }
            Err(e) => {
                self.record_outcome(service, false);
                Err(ResilienceError::TransientDependency {
                    service: service.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Administrative reset of a breaker to closed.
    pub fn reset(&self, service: &ServiceName) -> ResilienceResult<()> {
        let breaker = self
            .breakers
            .get(service)
            .map(|b| b.clone())
            .ok_or_else(|| ResilienceError::UnknownService(service.clone()))?;
        if let Some(t) = breaker.reset() {
            self.publish(t);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn publish(&self, transition: BreakerTransition) {
        if let Some(metrics) = &self.metrics {
            metrics.set_breaker_state(transition.service_name.as_str(), transition.to.gauge_value());
        }
        // No subscribers is fine.
        let _ = self.transition_tx.send(transition);
    }
}

/// Records a failure for a [`CircuitBreakerRegistry::call`] that was
/// dropped before its future produced an outcome, so a half-open slot is
/// never held by a cancelled caller.
struct OutcomeGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    service: &'a ServiceName,
    settled: bool,
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(service = %self.service, "Guarded call abandoned before completion, counting as failure");
            self.registry.record_outcome(self.service, false);
        }
    }
}
