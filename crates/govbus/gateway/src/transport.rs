//! Egress transport collaborator.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use govbus_types::{AgentMessage, MessageId};
use parking_lot::RwLock;

use crate::error::CollaboratorError;

/// Hands a governed message to its recipient.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, message: &AgentMessage) -> Result<(), CollaboratorError>;
}

/// Records deliveries in memory. Failures can be injected.
#[derive(Default)]
pub struct MemoryTransport {
    delivered: RwLock<Vec<AgentMessage>>,
    failures_remaining: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every delivery until set back to available.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<AgentMessage> {
        self.delivered.read().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.read().len()
    }

    /// How many times `message_id` was delivered.
    pub fn deliveries_of(&self, message_id: &MessageId) -> usize {
        self.delivered
            .read()
            .iter()
            .filter(|m| &m.message_id == message_id)
            .count()
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn deliver(&self, message: &AgentMessage) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("transport offline".into()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CollaboratorError::Unavailable("injected failure".into()));
        }
        self.delivered.write().push(message.clone());
        Ok(())
    }
}
