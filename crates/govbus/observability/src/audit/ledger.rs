//! Audit ledger collaborator and the in-memory hash-chained ledger

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::event::{AuditEvent, AuditEventKind, AuditReceipt};
use crate::error::{ObservabilityError, Result};

/// Append-only audit ledger.
///
/// The bus calls `append` exactly once per terminal message outcome and per
/// recovery/compensation event, and never retries a duplicate append.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Append an event, returning a receipt.
    async fn append(&self, event: AuditEvent) -> Result<AuditReceipt>;

    /// Check that a receipt refers to an intact entry.
    async fn verify(&self, receipt: &AuditReceipt) -> Result<bool>;
}

/// A finalized ledger entry.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub event: AuditEvent,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// In-memory ledger with a SHA-256 hash chain.
pub struct MemoryAuditLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryAuditLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Get all entries.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().clone()
    }

    /// Events only, in append order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.entries.read().iter().map(|e| e.event.clone()).collect()
    }

    /// Events about one subject, in append order.
    pub fn events_for(&self, subject: &str) -> Vec<AuditEvent> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.subject == subject)
            .map(|e| e.event.clone())
            .collect()
    }

    /// Number of events of a kind.
    pub fn count_kind(&self, kind: AuditEventKind) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Recompute every hash and check the links.
    pub fn verify_chain(&self) -> Result<bool> {
        let entries = self.entries.read();
        let mut previous: Option<&String> = None;

        for entry in entries.iter() {
            if entry.previous_hash.as_ref() != previous {
                return Ok(false);
            }
            let computed = compute_hash(entry.sequence, &entry.event, entry.previous_hash.as_deref())?;
            if computed != entry.entry_hash {
                return Ok(false);
            }
            previous = Some(&entry.entry_hash);
        }

        Ok(true)
    }
}

impl Default for MemoryAuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLedger for MemoryAuditLedger {
    async fn append(&self, event: AuditEvent) -> Result<AuditReceipt> {
        let mut entries = self.entries.write();

        if entries.iter().any(|e| e.event.event_id == event.event_id) {
            return Err(ObservabilityError::AppendFailed(format!(
                "duplicate event id {}",
                event.event_id
            )));
        }

        let sequence = entries.len() as u64;
        let previous_hash = entries.last().map(|e| e.entry_hash.clone());
        let entry_hash = compute_hash(sequence, &event, previous_hash.as_deref())?;

        let receipt = AuditReceipt {
            event_id: event.event_id,
            sequence,
            entry_hash: entry_hash.clone(),
            previous_hash: previous_hash.clone(),
        };

        tracing::debug!(
            sequence,
            kind = %event.kind,
            subject = %event.subject,
            "Audit event appended"
        );

        entries.push(LedgerEntry {
            sequence,
            event,
            previous_hash,
            entry_hash,
        });

        Ok(receipt)
    }

    async fn verify(&self, receipt: &AuditReceipt) -> Result<bool> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(receipt.sequence as usize) else {
            return Ok(false);
        };

        if entry.event.event_id != receipt.event_id || entry.entry_hash != receipt.entry_hash {
            return Ok(false);
        }

        let computed = compute_hash(entry.sequence, &entry.event, entry.previous_hash.as_deref())?;
        Ok(computed == receipt.entry_hash)
    }
}

fn compute_hash(sequence: u64, event: &AuditEvent, previous: Option<&str>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_be_bytes());
    hasher.update(previous.unwrap_or("").as_bytes());
    hasher.update(serde_json::to_vec(event)?);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_links_chain() {
        let ledger = MemoryAuditLedger::new();

        let first = ledger
            .append(AuditEvent::new(AuditEventKind::MessageDelivered, "m-1"))
            .await
            .unwrap();
        let second = ledger
            .append(AuditEvent::new(AuditEventKind::MessageDropped, "m-2"))
            .await
            .unwrap();

        assert_eq!(first.sequence, 0);
        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_ref(), Some(&first.entry_hash));
        assert!(ledger.verify_chain().unwrap());
        assert!(ledger.verify(&first).await.unwrap());
        assert!(ledger.verify(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_forged_receipt_fails_verification() {
        let ledger = MemoryAuditLedger::new();
        let mut receipt = ledger
            .append(AuditEvent::new(AuditEventKind::MessageDelivered, "m-1"))
            .await
            .unwrap();

        receipt.entry_hash = "00".repeat(32);
        assert!(!ledger.verify(&receipt).await.unwrap());

        receipt.sequence = 7;
        assert!(!ledger.verify(&receipt).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_event_rejected() {
        let ledger = MemoryAuditLedger::new();
        let event = AuditEvent::new(AuditEventKind::RecoverySucceeded, "opa");

        ledger.append(event.clone()).await.unwrap();
        assert!(ledger.append(event).await.is_err());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_query_helpers() {
        let ledger = MemoryAuditLedger::new();
        ledger
            .append(AuditEvent::new(AuditEventKind::DeliberationOpened, "m-1"))
            .await
            .unwrap();
        ledger
            .append(AuditEvent::new(AuditEventKind::MessageDelivered, "m-1"))
            .await
            .unwrap();
        ledger
            .append(AuditEvent::new(AuditEventKind::MessageDelivered, "m-2"))
            .await
            .unwrap();

        assert_eq!(ledger.events_for("m-1").len(), 2);
        assert_eq!(ledger.count_kind(AuditEventKind::MessageDelivered), 2);
    }
}
