//! Ingress queue collaborator.
//!
//! At-least-once: a received message stays leased until acked. A nack puts
//! it back for redelivery. Acking or nacking an unknown receipt is a no-op,
//! so duplicate acknowledgements are harmless.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use govbus_scoring::ScoringContext;
use govbus_types::AgentMessage;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::GatewayResult;

/// A leased queue entry.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub receipt: u64,
    pub message: AgentMessage,
    pub context: ScoringContext,
    /// Times this entry has been handed out, including this one.
    pub deliveries: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, message: AgentMessage, context: ScoringContext) -> GatewayResult<()>;

    /// Lease the next ready message, if any. Does not block.
    async fn receive(&self) -> GatewayResult<Option<QueuedMessage>>;

    async fn ack(&self, receipt: u64) -> GatewayResult<()>;

    async fn nack(&self, receipt: u64) -> GatewayResult<()>;
}

struct Entry {
    message: AgentMessage,
    context: ScoringContext,
    deliveries: u32,
}

#[derive(Default)]
pub struct MemoryQueue {
    ready: Mutex<VecDeque<Entry>>,
    leased: Mutex<HashMap<u64, Entry>>,
    next_receipt: AtomicU64,
    acked: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn leased_len(&self) -> usize {
        self.leased.lock().len()
    }

    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.ready_len() == 0 && self.leased_len() == 0
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, message: AgentMessage, context: ScoringContext) -> GatewayResult<()> {
        self.ready.lock().push_back(Entry {
            message,
            context,
            deliveries: 0,
        });
        Ok(())
    }

    async fn receive(&self) -> GatewayResult<Option<QueuedMessage>> {
        let Some(mut entry) = self.ready.lock().pop_front() else {
            return Ok(None);
        };
        entry.deliveries += 1;
        let receipt = self.next_receipt.fetch_add(1, Ordering::SeqCst);
        let leased = QueuedMessage {
            receipt,
            message: entry.message.clone(),
            context: entry.context.clone(),
            deliveries: entry.deliveries,
        };
        self.leased.lock().insert(receipt, entry);
        Ok(Some(leased))
    }

    async fn ack(&self, receipt: u64) -> GatewayResult<()> {
        if self.leased.lock().remove(&receipt).is_some() {
            self.acked.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!(receipt, "Ack for unknown receipt ignored");
        }
        Ok(())
    }

    async fn nack(&self, receipt: u64) -> GatewayResult<()> {
        let entry = self.leased.lock().remove(&receipt);
        match entry {
            Some(entry) => self.ready.lock().push_back(entry),
            None => debug!(receipt, "Nack for unknown receipt ignored"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govbus_types::{AgentId, TenantId};

    fn message() -> AgentMessage {
        AgentMessage::new(
            TenantId::new("acme"),
            AgentId::new("planner"),
            AgentId::new("executor"),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let queue = MemoryQueue::new();
        queue.enqueue(message(), ScoringContext::new()).await.unwrap();

        let leased = queue.receive().await.unwrap().unwrap();
        queue.ack(leased.receipt).await.unwrap();
        queue.ack(leased.receipt).await.unwrap();
        queue.nack(leased.receipt).await.unwrap();

        assert_eq!(queue.acked_count(), 1);
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let queue = MemoryQueue::new();
        queue.enqueue(message(), ScoringContext::new()).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert!(queue.receive().await.unwrap().is_none());
        queue.nack(first.receipt).await.unwrap();

        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.message.message_id, first.message.message_id);
        assert_eq!(second.deliveries, 2);
        assert_ne!(second.receipt, first.receipt);
    }
}
