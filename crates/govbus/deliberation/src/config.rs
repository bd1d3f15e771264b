//! Deliberation configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeliberationError, DeliberationResult};
use crate::item::Decision;

/// How approvals combine into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumMode {
    /// N-of-M: `required_approvals` approvals approve.
    Threshold,
    /// Every eligible approver must approve; any rejection rejects.
    Unanimous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    /// Approvals needed in threshold mode (1 = single-approver).
    pub required_approvals: u32,

    pub mode: QuorumMode,

    /// Who may decide. Empty means anyone.
    pub eligible_approvers: Vec<String>,

    /// How long an item may stay pending.
    pub timeout: Duration,

    /// Verdict applied when the timeout elapses without quorum.
    pub timeout_disposition: Decision,

    /// How long a resolved item stays queryable before the sweeper purges it.
    pub resolved_retention: Duration,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            required_approvals: 1,
            mode: QuorumMode::Threshold,
            eligible_approvers: Vec::new(),
            timeout: Duration::from_secs(300),
            timeout_disposition: Decision::Reject,
            resolved_retention: Duration::from_secs(600),
        }
    }
}

impl DeliberationConfig {
    pub fn validate(&self) -> DeliberationResult<()> {
        if self.required_approvals == 0 {
            return Err(DeliberationError::Configuration(
                "required_approvals must be at least 1".into(),
            ));
        }
        if !self.eligible_approvers.is_empty()
            && self.required_approvals as usize > self.eligible_approvers.len()
        {
            return Err(DeliberationError::Configuration(format!(
                "required_approvals {} exceeds {} eligible approvers",
                self.required_approvals,
                self.eligible_approvers.len()
            )));
        }
        if self.mode == QuorumMode::Unanimous && self.eligible_approvers.is_empty() {
            return Err(DeliberationError::Configuration(
                "unanimous mode needs a list of eligible approvers".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(DeliberationError::Configuration(
                "timeout must be non-zero".into(),
            ));
        }
        if self.resolved_retention.is_zero() {
            return Err(DeliberationError::Configuration(
                "resolved_retention must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn is_eligible(&self, approver: &str) -> bool {
        self.eligible_approvers.is_empty() || self.eligible_approvers.iter().any(|a| a == approver)
    }
}
