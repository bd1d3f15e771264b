//! govbus Deliberation
//!
//! Staged human/expert review for messages the router flags as high impact.
//! An item is enqueued, collects approver decisions until quorum (N-of-M or
//! unanimous), and resolves to approved or rejected. Items that never reach
//! quorum resolve to the configured timeout disposition (reject by default).

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod item;

pub use config::{DeliberationConfig, QuorumMode};
pub use coordinator::DeliberationCoordinator;
pub use error::{DeliberationError, DeliberationResult};
pub use govbus_types::DeliberationId;
pub use item::{ApproverDecision, Decision, DeliberationItem, DeliberationStatus, Resolution};
