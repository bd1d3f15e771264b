//! Integrity anchor
//!
//! Every message, recovery request and workflow step must present the
//! deployment-wide integrity hash. The anchor is built once and never
//! mutated; components hold clones of it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::message::AgentMessage;

/// Process-wide integrity hash every envelope must carry.
pub const CONSTITUTIONAL_HASH: &str = "cdd01ef066bc6cf2";

/// Rejection raised when an integrity check fails.
///
/// Never retried; callers audit it as a security event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("integrity hash mismatch: presented {presented:?}")]
    HashMismatch { presented: String },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Immutable holder of the expected integrity hash.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityAnchor {
    expected: Arc<str>,
}

impl IntegrityAnchor {
    /// Anchor on a deployment-specific hash.
    pub fn new(expected: impl AsRef<str>) -> Self {
        Self {
            expected: Arc::from(expected.as_ref()),
        }
    }

    /// The hash presented values are compared against.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Compare a presented hash against the anchor.
    pub fn verify(&self, presented: &str) -> Result<(), IntegrityViolation> {
        if constant_time_eq(presented.as_bytes(), self.expected.as_bytes()) {
            Ok(())
        } else {
            Err(IntegrityViolation::HashMismatch {
                presented: presented.to_string(),
            })
        }
    }

    /// Full envelope check: structural fields first, then the hash.
    pub fn verify_message(&self, message: &AgentMessage) -> Result<(), IntegrityViolation> {
        if message.message_id.as_str().trim().is_empty() {
            return Err(IntegrityViolation::MalformedEnvelope(
                "message_id is empty".into(),
            ));
        }
        if message.tenant_id.as_str().trim().is_empty() {
            return Err(IntegrityViolation::MalformedEnvelope(
                "tenant_id is empty".into(),
            ));
        }
        if message.from_agent.as_str().trim().is_empty()
            || message.to_agent.as_str().trim().is_empty()
        {
            return Err(IntegrityViolation::MalformedEnvelope(
                "from_agent and to_agent are required".into(),
            ));
        }
        self.verify(&message.integrity_hash)
    }
}

impl Default for IntegrityAnchor {
    fn default() -> Self {
        Self::new(CONSTITUTIONAL_HASH)
    }
}

impl fmt::Debug for IntegrityAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityAnchor")
            .field("expected", &&*self.expected)
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
