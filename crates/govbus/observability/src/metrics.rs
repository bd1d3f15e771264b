//! Prometheus metrics for the governed message bus

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::error::{ObservabilityError, Result};

/// Bus-wide metric handles.
///
/// Owns its own registry so several buses can live in one process (and in
/// one test binary) without colliding on metric names.
pub struct BusMetrics {
    registry: Registry,

    /// Breaker state by service (0 closed, 1 half-open, 2 open)
    pub breaker_state: IntGaugeVec,

    /// Latest aggregate health score
    pub health_score: Gauge,

    /// Live recovery tasks
    pub recovery_queue_depth: IntGauge,

    /// Pending deliberation items
    pub deliberation_queue_depth: IntGauge,

    /// Duration of each DAG wave
    pub dag_wave_latency_seconds: Histogram,

    /// Message outcomes
    pub messages_total: IntCounterVec,
}

impl BusMetrics {
    /// Create and register all bus metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("govbus".to_string()), None)?;

        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "breaker_state",
                "Circuit breaker state (0=closed, 1=half_open, 2=open)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let health_score = Gauge::new("health_score", "Aggregate health score in [0, 1]")?;
        registry.register(Box::new(health_score.clone()))?;

        let recovery_queue_depth =
            IntGauge::new("recovery_queue_depth", "Recovery tasks awaiting execution")?;
        registry.register(Box::new(recovery_queue_depth.clone()))?;

        let deliberation_queue_depth = IntGauge::new(
            "deliberation_queue_depth",
            "Deliberation items awaiting a decision",
        )?;
        registry.register(Box::new(deliberation_queue_depth.clone()))?;

        let dag_wave_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("dag_wave_latency_seconds", "DAG wave execution latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(dag_wave_latency_seconds.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new("messages_total", "Messages by terminal or pending outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        Ok(Self {
            registry,
            breaker_state,
            health_score,
            recovery_queue_depth,
            deliberation_queue_depth,
            dag_wave_latency_seconds,
            messages_total,
        })
    }

    /// Set the breaker gauge for a service.
    pub fn set_breaker_state(&self, service: &str, code: i64) {
        self.breaker_state.with_label_values(&[service]).set(code);
    }

    /// Count a message outcome (`delivered`, `dropped`, `deliberating`, `rejected`).
    pub fn record_message(&self, outcome: &str) {
        self.messages_total.with_label_values(&[outcome]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ObservabilityError::Export(e.to_string()))
    }
}
