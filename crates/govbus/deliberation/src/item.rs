//! Deliberation items and decisions.

use chrono::{DateTime, Utc};
use govbus_types::{AgentMessage, DeliberationId};
use serde::{Deserialize, Serialize};

use crate::config::{DeliberationConfig, QuorumMode};

/// An individual approver's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberationStatus {
    Pending,
    Approved,
    Rejected,
}

impl DeliberationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliberationStatus::Pending)
    }
}

impl From<Decision> for DeliberationStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => DeliberationStatus::Approved,
            Decision::Reject => DeliberationStatus::Rejected,
        }
    }
}

impl std::fmt::Display for DeliberationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliberationStatus::Pending => write!(f, "pending"),
            DeliberationStatus::Approved => write!(f, "approved"),
            DeliberationStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One approver's recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproverDecision {
    pub approver: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

/// How an item reached its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum Resolution {
    Quorum,
    Timeout,
    Cancelled { by: String, reason: String },
}

/// A message held for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationItem {
    pub item_id: DeliberationId,
    pub message: AgentMessage,
    pub status: DeliberationStatus,
    pub decisions: Vec<ApproverDecision>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
}

impl DeliberationItem {
    pub fn approvals(&self) -> usize {
        self.count(Decision::Approve)
    }

    pub fn rejections(&self) -> usize {
        self.count(Decision::Reject)
    }

    pub fn has_decided(&self, approver: &str) -> bool {
        self.decisions.iter().any(|d| d.approver == approver)
    }

    fn count(&self, decision: Decision) -> usize {
        self.decisions.iter().filter(|d| d.decision == decision).count()
    }

    /// Verdict implied by the recorded decisions, if quorum is reached.
    ///
    /// Threshold mode approves at `required_approvals` approvals and rejects
    /// once approval can no longer be reached (with a closed pool) or once
    /// rejections reach `required_approvals` (with an open pool).
    pub(crate) fn quorum(&self, config: &DeliberationConfig) -> Option<Decision> {
        let approvals = self.approvals();
        let rejections = self.rejections();
        let required = config.required_approvals as usize;
        let pool = config.eligible_approvers.len();

        match config.mode {
            QuorumMode::Unanimous => {
                if rejections > 0 {
                    Some(Decision::Reject)
                } else if approvals >= pool {
                    Some(Decision::Approve)
                } else {
                    None
                }
            }
            QuorumMode::Threshold => {
                if approvals >= required {
                    Some(Decision::Approve)
                } else if pool > 0
                    && approvals + pool.saturating_sub(self.decisions.len()) < required
                {
                    Some(Decision::Reject)
                } else if pool == 0 && rejections >= required {
                    Some(Decision::Reject)
                } else {
                    None
                }
            }
        }
    }
}
