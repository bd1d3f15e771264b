//! Impact Scorer.
//!
//! Composite risk score as a fixed weighted sum of five components. Scoring
//! reads nothing but the message, the context, and one snapshot of the
//! sender's history, so identical inputs give identical scores.

use std::sync::Arc;

use govbus_types::AgentMessage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ScoringConfig, ScoringWeights};
use crate::error::ScoringResult;
use crate::history::{AgentHistory, HistoricalStats};
use crate::signals::{self, clamp_component, ImpactComponent, ScoringContext};

/// A scored message's risk breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactScore {
    pub semantic: f64,
    pub permission: f64,
    pub drift: f64,
    pub context: f64,
    pub historical: f64,
    /// Weighted sum, always in `[0, 1]`.
    pub total: f64,
}

impl ImpactScore {
    /// Combine components with the given weights.
    pub fn combine(components: [f64; 5], weights: &ScoringWeights) -> Self {
        let [semantic, permission, drift, context, historical] = components;
        let total = ImpactComponent::ALL
            .iter()
            .zip(components)
            .map(|(c, v)| weights.weight(*c) * v)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        Self {
            semantic,
            permission,
            drift,
            context,
            historical,
            total,
        }
    }

    pub fn component(&self, component: ImpactComponent) -> f64 {
        match component {
            ImpactComponent::Semantic => self.semantic,
            ImpactComponent::Permission => self.permission,
            ImpactComponent::Drift => self.drift,
            ImpactComponent::Context => self.context,
            ImpactComponent::Historical => self.historical,
        }
    }

    pub fn value(&self) -> f64 {
        self.total
    }
}

/// Computes [`ImpactScore`]s.
pub struct ImpactScorer {
    config: ScoringConfig,
    history: Arc<dyn HistoricalStats>,
}

impl ImpactScorer {
    /// Build a scorer, refusing weights that do not sum to 1.0.
    pub fn new(config: ScoringConfig, history: Arc<dyn HistoricalStats>) -> ScoringResult<Self> {
        config.validate()?;
        Ok(Self { config, history })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a message against the sender's current history.
    pub fn score(&self, message: &AgentMessage, context: &ScoringContext) -> ImpactScore {
        let history = self.history.agent_history(&message.from_agent);
        self.score_with_history(message, context, &history)
    }

    /// Score against an explicit history snapshot.
    pub fn score_with_history(
        &self,
        message: &AgentMessage,
        context: &ScoringContext,
        history: &AgentHistory,
    ) -> ImpactScore {
        let components = ImpactComponent::ALL.map(|component| {
            let raw = match context.overrides.get(&component) {
                Some(value) => *value,
                None => match component {
                    ImpactComponent::Semantic => signals::semantic_signal(message, &self.config),
                    ImpactComponent::Permission => {
                        signals::permission_signal(message, context, &self.config)
                    }
                    ImpactComponent::Drift => {
                        signals::drift_signal(message, history, &self.config)
                    }
                    ImpactComponent::Context => signals::context_signal(message, context),
                    ImpactComponent::Historical => signals::historical_signal(history),
                },
            };
            clamp_component(component, raw)
        });

        let score = ImpactScore::combine(components, &self.config.weights);
        debug!(
            message_id = %message.message_id,
            score = score.total,
            semantic = score.semantic,
            permission = score.permission,
            drift = score.drift,
            context = score.context,
            historical = score.historical,
            "Message scored"
        );
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::history::InMemoryHistory;
    use govbus_types::{AgentId, TenantId};
    use serde_json::json;

    fn scorer() -> ImpactScorer {
        ImpactScorer::new(ScoringConfig::default(), Arc::new(InMemoryHistory::new())).unwrap()
    }

    fn message() -> AgentMessage {
        AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("planner"),
            AgentId::new("executor"),
            json!({ "text": "status report" }),
        )
    }

    #[test]
    fn test_rejects_bad_weights() {
        let config = ScoringConfig {
            weights: ScoringWeights {
                semantic: 0.9,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = ImpactScorer::new(config, Arc::new(InMemoryHistory::new()));
        assert!(matches!(result, Err(ScoringError::WeightSum { .. })));
    }

    #[test]
    fn test_golden_value_all_overrides() {
        let context = ScoringContext::new()
            .with_override(ImpactComponent::Semantic, 1.0)
            .with_override(ImpactComponent::Permission, 0.5)
            .with_override(ImpactComponent::Drift, 0.0)
            .with_override(ImpactComponent::Context, 1.0)
            .with_override(ImpactComponent::Historical, 0.25);

        let score = scorer().score(&message(), &context);
        // 0.3 + 0.1 + 0 + 0.15 + 0.05
        assert!((score.total - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let scorer = scorer();
        let msg = message();
        let context = ScoringContext::new().with_scopes(["admin"]);
        assert_eq!(scorer.score(&msg, &context), scorer.score(&msg, &context));
    }

    #[test]
    fn test_override_is_clamped() {
        let context = ScoringContext::new().with_override(ImpactComponent::Semantic, 3.0);
        let score = scorer().score(&message(), &context);
        assert_eq!(score.semantic, 1.0);
        assert!(score.total <= 1.0);
    }

    #[test]
    fn test_history_raises_score() {
        let history = Arc::new(InMemoryHistory::new());
        let scorer = ImpactScorer::new(ScoringConfig::default(), history.clone()).unwrap();
        let msg = message();
        let before = scorer.score(&msg, &ScoringContext::new());

        for _ in 0..4 {
            history.record_decision(&msg.from_agent, false);
        }
        let after = scorer.score(&msg, &ScoringContext::new());

        assert_eq!(after.historical, 1.0);
        assert!(after.total > before.total);
    }
}
