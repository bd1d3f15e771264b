//! Adaptive Router.
//!
//! `score >= threshold` goes to deliberation, anything lower takes the fast
//! path. Resolved deliberations nudge the threshold with an exponential
//! moving average, kept inside `[min_threshold, max_threshold]`.

use govbus_types::AgentMessage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RouterConfig;
use crate::error::{ScoringError, ScoringResult};

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    FastPath,
    Deliberation,
}

impl std::fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteDecision::FastPath => write!(f, "fast_path"),
            RouteDecision::Deliberation => write!(f, "deliberation"),
        }
    }
}

/// A routing decision with the inputs that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub decision: RouteDecision,
    pub score: f64,
    pub threshold: f64,
}

/// Sends messages at or above a self-tuning impact threshold to deliberation
/// and delivers the rest directly.
pub struct AdaptiveRouter {
    config: RouterConfig,
    threshold: RwLock<f64>,
}

impl AdaptiveRouter {
    pub fn new(config: RouterConfig) -> ScoringResult<Self> {
        config.validate()?;
        let threshold = RwLock::new(config.initial_threshold);
        Ok(Self { config, threshold })
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.read()
    }

    /// Decide for a raw score against the current threshold.
    pub fn decide(&self, score: f64) -> RouteOutcome {
        let threshold = self.threshold();
        let decision = if score >= threshold {
            RouteDecision::Deliberation
        } else {
            RouteDecision::FastPath
        };
        RouteOutcome {
            decision,
            score,
            threshold,
        }
    }

    /// Route a scored message.
    pub fn route(&self, message: &AgentMessage) -> ScoringResult<RouteOutcome> {
        let score = message
            .impact_score()
            .ok_or_else(|| ScoringError::Unscored(message.message_id.clone()))?;
        let outcome = self.decide(score);
        debug!(
            message_id = %message.message_id,
            score,
            threshold = outcome.threshold,
            decision = %outcome.decision,
            "Message routed"
        );
        Ok(outcome)
    }

    /// Feed back a resolved deliberation.
    ///
    /// Approval moves the threshold towards just above `score` (similar
    /// messages could have been fast-pathed); rejection moves it towards just
    /// below `score`.
    pub fn record_outcome(&self, score: f64, approved: bool) -> f64 {
        let target = if approved {
            score + self.config.feedback_margin
        } else {
            score - self.config.feedback_margin
        };

        let mut threshold = self.threshold.write();
        let previous = *threshold;
        let updated = ((1.0 - self.config.smoothing) * previous + self.config.smoothing * target)
            .clamp(self.config.min_threshold, self.config.max_threshold);
        *threshold = updated;

        info!(
            score,
            approved,
            previous,
            updated,
            "Router threshold adjusted"
        );
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govbus_types::{AgentId, MessageStatus, TenantId};

    fn router() -> AdaptiveRouter {
        AdaptiveRouter::new(RouterConfig::default()).unwrap()
    }

    #[test]
    fn test_threshold_boundary() {
        let router = router();
        assert_eq!(router.decide(0.85).decision, RouteDecision::Deliberation);
        assert_eq!(router.decide(0.79).decision, RouteDecision::FastPath);
        assert_eq!(router.decide(0.8).decision, RouteDecision::Deliberation);
    }

    #[test]
    fn test_route_requires_score() {
        let router = router();
        let mut msg = AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("a"),
            AgentId::new("b"),
            serde_json::Value::Null,
        );
        assert!(matches!(router.route(&msg), Err(ScoringError::Unscored(_))));

        msg.advance(MessageStatus::Validated).unwrap();
        msg.set_impact_score(0.9).unwrap();
        let first = router.route(&msg).unwrap();
        let second = router.route(&msg).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.decision, RouteDecision::Deliberation);
    }

    #[test]
    fn test_feedback_stays_in_band() {
        let router = router();
        for _ in 0..200 {
            router.record_outcome(1.0, true);
        }
        assert_eq!(router.threshold(), 0.95);

        for _ in 0..200 {
            router.record_outcome(0.0, false);
        }
        assert_eq!(router.threshold(), 0.5);
    }

    #[test]
    fn test_rejection_lowers_threshold() {
        let router = router();
        let updated = router.record_outcome(0.8, false);
        assert!(updated < 0.8);
        assert!(updated >= 0.5);
    }
}
