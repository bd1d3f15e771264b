//! Inter-agent message envelope and its lifecycle
//!
//! ```text
//! received -> validated -> scored -> routed -> delivered
//!                                          \-> deliberating -> approved -> delivered
//!                                                          \-> rejected -> dropped
//! ```
//!
//! Any non-terminal state may also move to `dropped` (authorization denial,
//! cancellation). `delivered` and `dropped` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};
use crate::ids::{AgentId, MessageId, TenantId};
use crate::integrity::CONSTITUTIONAL_HASH;

/// Delivery priority declared by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessagePriority::Low => write!(f, "low"),
            MessagePriority::Normal => write!(f, "normal"),
            MessagePriority::High => write!(f, "high"),
            MessagePriority::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Validated,
    Scored,
    Routed,
    Deliberating,
    Approved,
    Rejected,
    Delivered,
    Dropped,
}

impl MessageStatus {
    /// Terminal messages are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Dropped)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Dropped {
            return true;
        }

        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Scored)
                | (Scored, Routed)
                | (Routed, Delivered)
                | (Routed, Deliberating)
                | (Deliberating, Approved)
                | (Deliberating, Rejected)
                | (Approved, Delivered)
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Received => "received",
            MessageStatus::Validated => "validated",
            MessageStatus::Scored => "scored",
            MessageStatus::Routed => "routed",
            MessageStatus::Deliberating => "deliberating",
            MessageStatus::Approved => "approved",
            MessageStatus::Rejected => "rejected",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

/// A message travelling between agents.
///
/// Envelope fields are public so transports can build and decode them;
/// `status` and `impact_score` are only changed through [`advance`](Self::advance)
/// and [`set_impact_score`](Self::set_impact_score).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: MessageId,
    pub integrity_hash: String,
    pub tenant_id: TenantId,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    impact_score: Option<f64>,
    #[serde(default = "default_status")]
    status: MessageStatus,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

fn default_status() -> MessageStatus {
    MessageStatus::Received
}

impl AgentMessage {
    /// Create a message stamped with the process integrity hash.
    pub fn new(
        tenant_id: TenantId,
        from_agent: AgentId,
        to_agent: AgentId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: MessageId::generate(),
            integrity_hash: CONSTITUTIONAL_HASH.to_string(),
            tenant_id,
            from_agent,
            to_agent,
            priority: MessagePriority::Normal,
            payload,
            impact_score: None,
            status: MessageStatus::Received,
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.message_id = id;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_integrity_hash(mut self, hash: impl Into<String>) -> Self {
        self.integrity_hash = hash.into();
        self
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn impact_score(&self) -> Option<f64> {
        self.impact_score
    }

    /// Record the composite impact score. Only legal while scoring.
    pub fn set_impact_score(&mut self, score: f64) -> TypesResult<()> {
        if self.status.is_terminal() {
            return Err(TypesError::TerminalMessage {
                message_id: self.message_id.clone(),
                status: self.status,
            });
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(TypesError::ScoreOutOfRange(score));
        }
        self.impact_score = Some(score);
        Ok(())
    }

    /// Move the message to its next lifecycle status.
    pub fn advance(&mut self, next: MessageStatus) -> TypesResult<()> {
        if self.status.is_terminal() {
            return Err(TypesError::TerminalMessage {
                message_id: self.message_id.clone(),
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(TypesError::InvalidTransition {
                message_id: self.message_id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == MessageStatus::Scored && self.impact_score.is_none() {
            return Err(TypesError::Unscored(self.message_id.clone()));
        }
        self.status = next;
        Ok(())
    }

    /// Approximate payload size used by drift heuristics.
    pub fn payload_size(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> AgentMessage {
        AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("a"),
            AgentId::new("b"),
            serde_json::json!({"op": "ping"}),
        )
    }

    #[test]
    fn test_fast_path_lifecycle() {
        let mut msg = message();
        msg.advance(MessageStatus::Validated).unwrap();
        msg.set_impact_score(0.2).unwrap();
        msg.advance(MessageStatus::Scored).unwrap();
        msg.advance(MessageStatus::Routed).unwrap();
        msg.advance(MessageStatus::Delivered).unwrap();
        assert!(msg.status().is_terminal());
    }

    #[test]
    fn test_deliberation_lifecycle() {
        let mut msg = message();
        msg.advance(MessageStatus::Validated).unwrap();
        msg.set_impact_score(0.9).unwrap();
        for next in [
            MessageStatus::Scored,
            MessageStatus::Routed,
            MessageStatus::Deliberating,
            MessageStatus::Rejected,
            MessageStatus::Dropped,
        ] {
            msg.advance(next).unwrap();
        }
        assert_eq!(msg.status(), MessageStatus::Dropped);
    }

    #[test]
    fn test_cannot_score_before_validation_skip() {
        let mut msg = message();
        let err = msg.advance(MessageStatus::Scored).unwrap_err();
        assert!(matches!(err, TypesError::InvalidTransition { .. }));
    }

    #[test]
    fn test_scored_requires_score() {
        let mut msg = message();
        msg.advance(MessageStatus::Validated).unwrap();
        assert!(matches!(
            msg.advance(MessageStatus::Scored),
            Err(TypesError::Unscored(_))
        ));
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut msg = message();
        msg.advance(MessageStatus::Dropped).unwrap();
        assert!(matches!(
            msg.advance(MessageStatus::Validated),
            Err(TypesError::TerminalMessage { .. })
        ));
        assert!(msg.set_impact_score(0.1).is_err());
    }

    #[test]
    fn test_score_range_enforced() {
        let mut msg = message();
        assert!(matches!(
            msg.set_impact_score(1.5),
            Err(TypesError::ScoreOutOfRange(_))
        ));
    }

    #[test]
    fn test_envelope_decodes_with_defaults() {
        let json = serde_json::json!({
            "message_id": "m-42",
            "integrity_hash": CONSTITUTIONAL_HASH,
            "tenant_id": "acme",
            "from_agent": "a",
            "to_agent": "b",
            "payload": {"op": "ping"}
        });
        let msg: AgentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg.status(), MessageStatus::Received);
        assert_eq!(msg.priority, MessagePriority::Normal);
        assert!(msg.impact_score().is_none());
    }
}
