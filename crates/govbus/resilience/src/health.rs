//! Health Aggregator.
//!
//! Turns breaker states into a rolling health score. Observation never
//! blocks message delivery: snapshots are cheap to compute and every
//! observer callback runs in its own spawned task.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use govbus_observability::BusMetrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitState;
use crate::config::HealthConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::registry::CircuitBreakerRegistry;

/// Aggregate system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// No breakers are tracked yet.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Immutable point-in-time health observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub health_score: f64,
    pub total: usize,
    pub closed: usize,
    pub half_open: usize,
    pub open: usize,
}

impl HealthSnapshot {
    /// Compute a snapshot from breaker states.
    pub fn from_states(states: &[CircuitState], config: &HealthConfig) -> Self {
        let total = states.len();
        let count = |s: CircuitState| states.iter().filter(|x| **x == s).count();
        let closed = count(CircuitState::Closed);
        let half_open = count(CircuitState::HalfOpen);
        let open = count(CircuitState::Open);

        let (health_score, status) = if total == 0 {
            (0.0, HealthStatus::Unknown)
        } else {
            let score =
                states.iter().map(|s| s.health_weight()).sum::<f64>() / total as f64;
            let status = if score >= config.healthy_threshold {
                HealthStatus::Healthy
            } else if score >= config.degraded_threshold {
                HealthStatus::Degraded
            } else {
                HealthStatus::Critical
            };
            (score, status)
        };

        Self {
            timestamp: Utc::now(),
            status,
            health_score,
            total,
            closed,
            half_open,
            open,
        }
    }
}

/// Receives every health snapshot.
///
/// Runs detached from the observation loop; a failing or panicking
/// observer is logged and otherwise ignored.
#[async_trait]
pub trait HealthObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_snapshot(&self, snapshot: &HealthSnapshot) -> ResilienceResult<()>;
}

struct FnObserver<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> HealthObserver for FnObserver<F>
where
    F: Fn(&HealthSnapshot) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_snapshot(&self, snapshot: &HealthSnapshot) -> ResilienceResult<()> {
        (self.f)(snapshot);
        Ok(())
    }
}

/// Rolling health aggregation over a breaker registry.
pub struct HealthAggregator {
    config: HealthConfig,
    registry: Arc<CircuitBreakerRegistry>,
    history: RwLock<VecDeque<HealthSnapshot>>,
    observers: RwLock<Vec<Arc<dyn HealthObserver>>>,
    metrics: Option<Arc<BusMetrics>>,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig, registry: Arc<CircuitBreakerRegistry>) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            registry,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            observers: RwLock::new(Vec::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Register an observer notified after every observation.
    pub fn register_callback(&self, observer: Arc<dyn HealthObserver>) {
        debug!(observer = observer.name(), "Registering health observer");
        self.observers.write().push(observer);
    }

    /// Register a plain closure as an observer.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&HealthSnapshot) + Send + Sync + 'static,
    {
        self.register_callback(Arc::new(FnObserver {
            name: name.into(),
            f,
        }));
    }

    /// Take a snapshot, append it to history and notify observers.
    pub fn observe(&self) -> HealthSnapshot {
        let states: Vec<CircuitState> =
            self.registry.snapshot().iter().map(|s| s.state).collect();
        let snapshot = HealthSnapshot::from_states(&states, &self.config);

        let previous_status = {
            let mut history = self.history.write();
            let previous = history.back().map(|s| s.status);
            if history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
            previous
        };

        if previous_status != Some(snapshot.status) {
            info!(
                status = %snapshot.status,
                score = snapshot.health_score,
                open = snapshot.open,
                total = snapshot.total,
                "Health status changed"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.health_score.set(snapshot.health_score);
        }

        self.notify(&snapshot);
        snapshot
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.history.read().back().cloned()
    }

    /// The last `window` snapshots, oldest first.
    pub fn history(&self, window: usize) -> Vec<HealthSnapshot> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(window);
        history.iter().skip(skip).cloned().collect()
    }

    /// Snapshots taken at or after `since`, oldest first.
    pub fn history_since(&self, since: DateTime<Utc>) -> Vec<HealthSnapshot> {
        self.history
            .read()
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Observe on `observe_interval` and on every breaker transition until
    /// `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.observe_interval);
        let mut transitions = self.registry.subscribe();
        let mut listening = true;

        info!("Health aggregator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    self.observe();
                }
                received = transitions.recv(), if listening => {
                    match received {
                        Ok(t) => {
                            debug!(service = %t.service_name, to = %t.to, "Observing breaker transition");
                            self.observe();
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Health aggregator lagged behind breaker transitions");
                            self.observe();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            listening = false;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health aggregator stopped");
    }

    fn notify(&self, snapshot: &HealthSnapshot) {
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, skipping health observers");
            return;
        };

        for observer in observers {
            let snapshot = snapshot.clone();
            handle.spawn(async move {
                let name = observer.name().to_string();
                let outcome = AssertUnwindSafe(observer.on_snapshot(&snapshot))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(observer = %name, error = %e, "Health observer failed");
                    }
                    Err(_) => {
                        let e = ResilienceError::ObserverFailed {
                            name,
                            reason: "panicked".into(),
                        };
                        error!(error = %e, "Health observer panicked");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use govbus_types::ServiceName;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup(capacity: usize) -> (Arc<CircuitBreakerRegistry>, HealthAggregator) {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
            half_open_max_calls: 1,
        }));
        let aggregator = HealthAggregator::new(
            HealthConfig {
                history_capacity: capacity,
                ..Default::default()
            },
            registry.clone(),
        );
        (registry, aggregator)
    }

    #[test]
    fn test_no_breakers_is_unknown() {
        let (_, aggregator) = setup(10);
        let snapshot = aggregator.observe();
        assert_eq!(snapshot.status, HealthStatus::Unknown);
        assert_eq!(snapshot.total, 0);
    }

    #[test]
    fn test_three_closed_one_open_is_healthy() {
        let (registry, aggregator) = setup(10);
        for name in ["a", "b", "c", "d"] {
            registry.register(&ServiceName::from(name));
        }
        registry.record_outcome(&"d".into(), false);

        let snapshot = aggregator.observe();
        assert_eq!(snapshot.health_score, 0.75);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!((snapshot.closed, snapshot.open), (3, 1));
    }

    #[test]
    fn test_status_thresholds() {
        let config = HealthConfig::default();
        use CircuitState::*;

        let degraded = HealthSnapshot::from_states(&[Closed, Open, HalfOpen, Closed], &config);
        assert_eq!(degraded.health_score, 0.625);
        assert_eq!(degraded.status, HealthStatus::Degraded);

        let critical = HealthSnapshot::from_states(&[Closed, Open, Open], &config);
        assert_eq!(critical.status, HealthStatus::Critical);
    }

    #[test]
    fn test_history_is_bounded() {
        let (_, aggregator) = setup(3);
        for _ in 0..5 {
            aggregator.observe();
        }
        assert_eq!(aggregator.history(10).len(), 3);
        assert_eq!(aggregator.history(2).len(), 2);
        assert!(aggregator.latest().is_some());
    }

    #[tokio::test]
    async fn test_callbacks_are_isolated() {
        let (_, aggregator) = setup(10);
        let calls = Arc::new(AtomicUsize::new(0));

        aggregator.register_fn("panicky", |_| panic!("observer bug"));
        let counter = calls.clone();
        aggregator.register_fn("counter", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.observe();
        aggregator.observe();

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_observes_transitions() {
        let (registry, _) = setup(10);
        let aggregator = Arc::new(HealthAggregator::new(
            HealthConfig {
                observe_interval: Duration::from_secs(3600),
                ..Default::default()
            },
            registry.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.clone().run(shutdown_rx));

        // First interval tick fires immediately.
        tokio::time::sleep(Duration::from_millis(1)).await;
        registry.record_outcome(&"opa".into(), false);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let latest = aggregator.latest().unwrap();
        assert_eq!(latest.open, 1);
        assert_eq!(latest.status, HealthStatus::Critical);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
