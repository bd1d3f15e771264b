//! Scoring and routing configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ScoringError, ScoringResult};
use crate::signals::ImpactComponent;

/// Tolerance for the weight-sum check.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Weight of each impact component. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub permission: f64,
    pub drift: f64,
    pub context: f64,
    pub historical: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.30,
            permission: 0.20,
            drift: 0.15,
            context: 0.15,
            historical: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn weight(&self, component: ImpactComponent) -> f64 {
        match component {
            ImpactComponent::Semantic => self.semantic,
            ImpactComponent::Permission => self.permission,
            ImpactComponent::Drift => self.drift,
            ImpactComponent::Context => self.context,
            ImpactComponent::Historical => self.historical,
        }
    }

    pub fn sum(&self) -> f64 {
        ImpactComponent::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    /// Reject weights that are negative, non-finite, or do not sum to 1.0.
    pub fn validate(&self) -> ScoringResult<()> {
        for component in ImpactComponent::ALL {
            let value = self.weight(component);
            if !value.is_finite() || value < 0.0 {
                return Err(ScoringError::InvalidWeight {
                    component: component.as_str(),
                    value,
                });
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ScoringError::WeightSum { sum });
        }
        Ok(())
    }
}

/// Impact scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,

    /// Payload terms that raise the semantic component.
    pub high_risk_keywords: Vec<String>,

    /// Keyword hits at which the semantic component saturates.
    pub keyword_saturation: usize,

    /// Requested scopes treated as privileged.
    pub privileged_scopes: Vec<String>,

    /// Relative payload-size deviation at which drift saturates.
    pub drift_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            weights: ScoringWeights::default(),
            high_risk_keywords: words(&[
                "delete",
                "transfer",
                "override",
                "shutdown",
                "credential",
                "escalate",
                "payment",
                "revoke",
                "execute",
                "admin",
            ]),
            keyword_saturation: 3,
            privileged_scopes: words(&["admin", "write:policy", "funds:transfer", "agents:manage"]),
            drift_tolerance: 4.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> ScoringResult<()> {
        self.weights.validate()?;
        if self.keyword_saturation == 0 {
            return Err(ScoringError::Configuration(
                "keyword_saturation must be at least 1".into(),
            ));
        }
        if !(self.drift_tolerance.is_finite() && self.drift_tolerance > 0.0) {
            return Err(ScoringError::Configuration(
                "drift_tolerance must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Adaptive router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Threshold at startup; scores at or above it are deliberated.
    pub initial_threshold: f64,

    pub min_threshold: f64,
    pub max_threshold: f64,

    /// Weight of each feedback sample in the moving average.
    pub smoothing: f64,

    /// Distance from the resolved score that feedback aims for.
    pub feedback_margin: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 0.8,
            min_threshold: 0.5,
            max_threshold: 0.95,
            smoothing: 0.1,
            feedback_margin: 0.05,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> ScoringResult<()> {
        let ordered = 0.0 <= self.min_threshold
            && self.min_threshold <= self.initial_threshold
            && self.initial_threshold <= self.max_threshold
            && self.max_threshold <= 1.0;
        if !ordered {
            return Err(ScoringError::Configuration(format!(
                "router thresholds must satisfy 0 <= min ({}) <= initial ({}) <= max ({}) <= 1",
                self.min_threshold, self.initial_threshold, self.max_threshold
            )));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ScoringError::Configuration(
                "smoothing must lie in (0, 1]".into(),
            ));
        }
        if !(self.feedback_margin.is_finite() && self.feedback_margin >= 0.0) {
            return Err(ScoringError::Configuration(
                "feedback_margin must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(ScoringWeights::default().validate().is_ok());
        assert!(ScoringConfig::default().validate().is_ok());
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_weight_sum_rejected() {
        let weights = ScoringWeights {
            semantic: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(ScoringError::WeightSum { .. })
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = ScoringWeights {
            semantic: 0.6,
            permission: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(ScoringError::InvalidWeight { component: "permission", .. })
        ));
    }

    #[test]
    fn test_inverted_router_band_rejected() {
        let config = RouterConfig {
            min_threshold: 0.9,
            max_threshold: 0.6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
