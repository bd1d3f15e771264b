//! Historical statistics read by the scorer.

use dashmap::DashMap;
use govbus_types::AgentId;
use serde::{Deserialize, Serialize};

/// Immutable per-agent statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory {
    /// Deliberations that ended in approval.
    pub approved: u64,
    /// Deliberations that ended in rejection.
    pub rejected: u64,
    /// Payloads observed.
    pub samples: u64,
    /// Running mean of payload size in bytes.
    pub mean_payload_size: f64,
}

impl AgentHistory {
    pub fn rejection_rate(&self) -> f64 {
        let decided = self.approved + self.rejected;
        if decided == 0 {
            0.0
        } else {
            self.rejected as f64 / decided as f64
        }
    }
}

/// Source of historical statistics.
///
/// The gateway reports what it sees through the `observe_*` hooks; read-only
/// sources can ignore them.
pub trait HistoricalStats: Send + Sync {
    fn agent_history(&self, agent: &AgentId) -> AgentHistory;

    fn observe_payload(&self, _agent: &AgentId, _size: usize) {}

    fn observe_decision(&self, _agent: &AgentId, _approved: bool) {}
}

/// In-process statistics store.
#[derive(Default)]
pub struct InMemoryHistory {
    agents: DashMap<AgentId, AgentHistory>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a payload size into the sender's running mean.
    pub fn record_payload(&self, agent: &AgentId, size: usize) {
        let mut entry = self.agents.entry(agent.clone()).or_default();
        entry.samples += 1;
        let n = entry.samples as f64;
        entry.mean_payload_size += (size as f64 - entry.mean_payload_size) / n;
    }

    /// Record how a deliberation for this sender was resolved.
    pub fn record_decision(&self, agent: &AgentId, approved: bool) {
        let mut entry = self.agents.entry(agent.clone()).or_default();
        if approved {
            entry.approved += 1;
        } else {
            entry.rejected += 1;
        }
    }
}

impl HistoricalStats for InMemoryHistory {
    fn agent_history(&self, agent: &AgentId) -> AgentHistory {
        self.agents
            .get(agent)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn observe_payload(&self, agent: &AgentId, size: usize) {
        self.record_payload(agent, size);
    }

    fn observe_decision(&self, agent: &AgentId, approved: bool) {
        self.record_decision(agent, approved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let history = InMemoryHistory::new();
        let agent = AgentId::new("planner");
        history.record_payload(&agent, 100);
        history.record_payload(&agent, 300);

        let snapshot = history.agent_history(&agent);
        assert_eq!(snapshot.samples, 2);
        assert_eq!(snapshot.mean_payload_size, 200.0);
    }

    #[test]
    fn test_rejection_rate() {
        let history = InMemoryHistory::new();
        let agent = AgentId::new("planner");
        assert_eq!(history.agent_history(&agent).rejection_rate(), 0.0);

        history.record_decision(&agent, true);
        history.record_decision(&agent, false);
        history.record_decision(&agent, false);
        history.record_decision(&agent, false);
        assert_eq!(history.agent_history(&agent).rejection_rate(), 0.75);
    }
}
