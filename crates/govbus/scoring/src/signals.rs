//! Impact components and per-message scoring context.

use std::collections::BTreeMap;

use govbus_types::{AgentMessage, MessagePriority};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ScoringConfig;
use crate::history::AgentHistory;

/// One of the five weighted impact signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactComponent {
    Semantic,
    Permission,
    Drift,
    Context,
    Historical,
}

impl ImpactComponent {
    pub const ALL: [ImpactComponent; 5] = [
        ImpactComponent::Semantic,
        ImpactComponent::Permission,
        ImpactComponent::Drift,
        ImpactComponent::Context,
        ImpactComponent::Historical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactComponent::Semantic => "semantic",
            ImpactComponent::Permission => "permission",
            ImpactComponent::Drift => "drift",
            ImpactComponent::Context => "context",
            ImpactComponent::Historical => "historical",
        }
    }
}

impl std::fmt::Display for ImpactComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra inputs for scoring one message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringContext {
    /// Externally computed component values (e.g. from a risk model).
    pub overrides: BTreeMap<ImpactComponent, f64>,

    /// Scopes the sender asks to exercise.
    pub requested_scopes: Vec<String>,

    /// Sender and recipient belong to different tenants.
    pub cross_tenant: bool,
}

impl ScoringContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, component: ImpactComponent, value: f64) -> Self {
        self.overrides.insert(component, value);
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn cross_tenant(mut self) -> Self {
        self.cross_tenant = true;
        self
    }
}

/// Clamp a component input into `[0, 1]`, logging when it was out of range.
///
/// NaN maps to 1.0 so a broken input errs towards deliberation.
pub fn clamp_component(component: ImpactComponent, value: f64) -> f64 {
    if value.is_nan() {
        warn!(component = %component, "Impact component is NaN, treating as maximum risk");
        return 1.0;
    }
    if !(0.0..=1.0).contains(&value) {
        let clamped = value.clamp(0.0, 1.0);
        warn!(
            component = %component,
            value,
            clamped,
            "Impact component out of range, clamped"
        );
        return clamped;
    }
    value
}

/// High-risk keyword hits in the payload, saturating at `keyword_saturation`.
pub(crate) fn semantic_signal(message: &AgentMessage, config: &ScoringConfig) -> f64 {
    let text = message.payload.to_string().to_lowercase();
    let hits = config
        .high_risk_keywords
        .iter()
        .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
        .count();
    (hits as f64 / config.keyword_saturation as f64).min(1.0)
}

/// Share of requested scopes that are privileged.
///
/// Scopes come from the context and from a `scopes` array in the payload.
pub(crate) fn permission_signal(
    message: &AgentMessage,
    context: &ScoringContext,
    config: &ScoringConfig,
) -> f64 {
    let payload_scopes = message
        .payload
        .get("scopes")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str());

    let requested: Vec<&str> = context
        .requested_scopes
        .iter()
        .map(String::as_str)
        .chain(payload_scopes)
        .collect();

    if requested.is_empty() {
        return 0.0;
    }

    let privileged = requested
        .iter()
        .filter(|scope| config.privileged_scopes.iter().any(|p| p == *scope))
        .count();
    privileged as f64 / requested.len() as f64
}

/// Relative deviation of payload size from the sender's historical mean.
pub(crate) fn drift_signal(
    message: &AgentMessage,
    history: &AgentHistory,
    config: &ScoringConfig,
) -> f64 {
    if history.samples == 0 || history.mean_payload_size <= 0.0 {
        return 0.0;
    }
    let size = message.payload_size() as f64;
    let deviation = (size - history.mean_payload_size).abs() / history.mean_payload_size;
    (deviation / config.drift_tolerance).min(1.0)
}

/// Priority and tenancy of the exchange.
pub(crate) fn context_signal(message: &AgentMessage, context: &ScoringContext) -> f64 {
    let base: f64 = match message.priority {
        MessagePriority::Low => 0.0,
        MessagePriority::Normal => 0.25,
        MessagePriority::High => 0.6,
        MessagePriority::Critical => 1.0,
    };
    let tenancy = if context.cross_tenant { 0.5 } else { 0.0 };
    (base + tenancy).min(1.0)
}

/// The sender's rejection rate in past deliberations.
pub(crate) fn historical_signal(history: &AgentHistory) -> f64 {
    history.rejection_rate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use govbus_types::{AgentId, TenantId};
    use serde_json::json;

    fn message(payload: serde_json::Value) -> AgentMessage {
        AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("planner"),
            AgentId::new("executor"),
            payload,
        )
    }

    #[test]
    fn test_clamp_component() {
        assert_eq!(clamp_component(ImpactComponent::Drift, 0.4), 0.4);
        assert_eq!(clamp_component(ImpactComponent::Drift, 1.7), 1.0);
        assert_eq!(clamp_component(ImpactComponent::Drift, -0.2), 0.0);
        assert_eq!(clamp_component(ImpactComponent::Drift, f64::NAN), 1.0);
    }

    #[test]
    fn test_semantic_saturates() {
        let config = ScoringConfig::default();
        let calm = message(json!({ "text": "hello" }));
        let hot = message(json!({ "text": "delete the admin credential and transfer payment" }));

        assert_eq!(semantic_signal(&calm, &config), 0.0);
        assert_eq!(semantic_signal(&hot, &config), 1.0);
    }

    #[test]
    fn test_permission_reads_payload_scopes() {
        let config = ScoringConfig::default();
        let msg = message(json!({ "scopes": ["read:docs", "admin"] }));
        let value = permission_signal(&msg, &ScoringContext::new(), &config);
        assert_eq!(value, 0.5);
    }

    #[test]
    fn test_context_cross_tenant() {
        let msg = message(json!({})).with_priority(MessagePriority::High);
        assert_eq!(context_signal(&msg, &ScoringContext::new()), 0.6);
        assert_eq!(context_signal(&msg, &ScoringContext::new().cross_tenant()), 1.0);

        let routine = message(json!({}));
        assert_eq!(context_signal(&routine, &ScoringContext::new().cross_tenant()), 0.75);
    }
}
