//! Authorization backends.
//!
//! The gateway authorizes every validated message through a
//! [`ValidationBackend`] chosen once at construction: cheap local rules, an
//! external policy engine, or local rules followed by the engine.

use std::sync::Arc;

use async_trait::async_trait;
use govbus_types::AgentMessage;
use serde::{Deserialize, Serialize};

use crate::config::ValidationMode;
use crate::error::{CollaboratorError, GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// External policy-evaluation engine.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, message: &AgentMessage) -> Result<PolicyDecision, CollaboratorError>;
}

/// Evaluator with a fixed answer, plus a deny list of sending agents.
#[derive(Debug, Clone)]
pub struct StaticPolicyEvaluator {
    default: PolicyDecision,
    denied_agents: Vec<String>,
}

impl StaticPolicyEvaluator {
    pub fn allow_all() -> Self {
        Self {
            default: PolicyDecision::Allow,
            denied_agents: Vec::new(),
        }
    }

    pub fn deny_all(reason: impl Into<String>) -> Self {
        Self {
            default: PolicyDecision::deny(reason),
            denied_agents: Vec::new(),
        }
    }

    pub fn deny_agent(mut self, agent: impl Into<String>) -> Self {
        self.denied_agents.push(agent.into());
        self
    }
}

#[async_trait]
impl PolicyEvaluator for StaticPolicyEvaluator {
    async fn evaluate(&self, message: &AgentMessage) -> Result<PolicyDecision, CollaboratorError> {
        if self
            .denied_agents
            .iter()
            .any(|a| a == message.from_agent.as_str())
        {
            return Ok(PolicyDecision::deny(format!(
                "agent {} is denied by policy",
                message.from_agent
            )));
        }
        Ok(self.default.clone())
    }
}

/// In-process checks that need no round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalRules {
    /// Largest accepted payload, in serialized bytes.
    pub max_payload_bytes: usize,

    /// Agents never allowed to send.
    pub blocked_agents: Vec<String>,

    /// Tenants allowed to send. Empty means any.
    pub allowed_tenants: Vec<String>,
}

impl Default for LocalRules {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            blocked_agents: Vec::new(),
            allowed_tenants: Vec::new(),
        }
    }
}

impl LocalRules {
    pub fn evaluate(&self, message: &AgentMessage) -> PolicyDecision {
        let size = message.payload_size();
        if size > self.max_payload_bytes {
            return PolicyDecision::deny(format!(
                "payload of {size} bytes exceeds limit of {}",
                self.max_payload_bytes
            ));
        }
        if self
            .blocked_agents
            .iter()
            .any(|a| a == message.from_agent.as_str())
        {
            return PolicyDecision::deny(format!("agent {} is blocked", message.from_agent));
        }
        if !self.allowed_tenants.is_empty()
            && !self
                .allowed_tenants
                .iter()
                .any(|t| t == message.tenant_id.as_str())
        {
            return PolicyDecision::deny(format!("tenant {} is not allowed", message.tenant_id));
        }
        PolicyDecision::Allow
    }
}

/// Authorization strategy, fixed at construction.
#[derive(Clone)]
pub enum ValidationBackend {
    LocalFast(LocalRules),
    ExternalPolicy(Arc<dyn PolicyEvaluator>),
    /// Local rules first; only messages they allow reach the engine.
    Hybrid {
        rules: LocalRules,
        evaluator: Arc<dyn PolicyEvaluator>,
    },
}

impl ValidationBackend {
    pub fn from_config(
        mode: ValidationMode,
        rules: LocalRules,
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
    ) -> GatewayResult<Self> {
        match (mode, evaluator) {
            (ValidationMode::LocalFast, _) => Ok(ValidationBackend::LocalFast(rules)),
            (ValidationMode::ExternalPolicy, Some(evaluator)) => {
                Ok(ValidationBackend::ExternalPolicy(evaluator))
            }
            (ValidationMode::Hybrid, Some(evaluator)) => {
                Ok(ValidationBackend::Hybrid { rules, evaluator })
            }
            (mode, None) => Err(GatewayError::Configuration(format!(
                "validation mode {mode:?} needs a policy evaluator"
            ))),
        }
    }

    pub fn mode(&self) -> ValidationMode {
        match self {
            ValidationBackend::LocalFast(_) => ValidationMode::LocalFast,
            ValidationBackend::ExternalPolicy(_) => ValidationMode::ExternalPolicy,
            ValidationBackend::Hybrid { .. } => ValidationMode::Hybrid,
        }
    }

    pub fn local_rules(&self) -> Option<&LocalRules> {
        match self {
            ValidationBackend::LocalFast(rules) | ValidationBackend::Hybrid { rules, .. } => {
                Some(rules)
            }
            ValidationBackend::ExternalPolicy(_) => None,
        }
    }

    pub fn evaluator(&self) -> Option<&Arc<dyn PolicyEvaluator>> {
        match self {
            ValidationBackend::ExternalPolicy(evaluator)
            | ValidationBackend::Hybrid { evaluator, .. } => Some(evaluator),
            ValidationBackend::LocalFast(_) => None,
        }
    }
}

impl std::fmt::Debug for ValidationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationBackend")
            .field("mode", &self.mode())
            .field("local_rules", &self.local_rules())
            .finish()
    }
}
