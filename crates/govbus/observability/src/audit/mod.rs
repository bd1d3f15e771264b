//! Audit trail for the governed message bus
//!
//! The ledger itself is an external collaborator; [`MemoryAuditLedger`] is a
//! tamper-evident in-process implementation for development and tests.

pub mod event;
pub mod ledger;

pub use event::{AuditEvent, AuditEventKind, AuditReceipt};
pub use ledger::{AuditLedger, LedgerEntry, MemoryAuditLedger};
