//! govbus Observability
//!
//! - **Audit**: the append-only ledger collaborator and a hash-chained
//!   in-memory implementation
//! - **Metrics**: Prometheus gauges for breakers, health, and queue depths
//! - **Tracing**: subscriber setup for binaries

#![deny(unsafe_code)]

pub mod audit;
pub mod error;
pub mod metrics;
pub mod tracing;

pub use audit::{AuditEvent, AuditEventKind, AuditLedger, AuditReceipt, LedgerEntry, MemoryAuditLedger};
pub use error::{ObservabilityError, Result};
pub use metrics::BusMetrics;
pub use crate::tracing::{init_tracing, TracingConfig};
