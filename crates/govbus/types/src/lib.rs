//! govbus Types - shared vocabulary of the governed message bus
//!
//! Every inter-agent message is validated against an immutable integrity
//! anchor, scored for risk, and either delivered immediately or held for
//! deliberation. This crate holds the pieces every other govbus crate agrees
//! on:
//!
//! - **Identifiers**: newtypes for messages, tenants, agents, services, runs
//! - **AgentMessage**: the envelope and its one-way lifecycle
//! - **IntegrityAnchor**: the deployment-wide hash check
//! - **Incident**: failures surfaced for manual follow-up

#![deny(unsafe_code)]

pub mod error;
pub mod ids;
pub mod incident;
pub mod integrity;
pub mod message;

pub use error::{TypesError, TypesResult};
pub use ids::{
    AgentId, DeliberationId, IncidentId, MessageId, ServiceName, TenantId, WorkflowRunId,
};
pub use incident::{Incident, IncidentKind};
pub use integrity::{IntegrityAnchor, IntegrityViolation, CONSTITUTIONAL_HASH};
pub use message::{AgentMessage, MessagePriority, MessageStatus};
