//! govbus Gateway
//!
//! The message-facing half of the bus:
//!
//! - **Gateway**: integrity check, authorization, scoring, routing, and
//!   delivery or deliberation for each message, exactly once
//! - **Policy**: local rules, an external policy engine, or both
//! - **Worker pool**: bounded-concurrency consumers of the ingress queue
//! - **Bus**: the application context that wires components from one
//!   [`BusConfig`] and runs the background loops
//!
//! ```no_run
//! use std::sync::Arc;
//! use govbus_gateway::{BusConfig, Collaborators, GovernanceBus, Outcome};
//! use govbus_scoring::ScoringContext;
//! use govbus_types::{AgentId, AgentMessage, TenantId};
//!
//! # async fn demo() -> govbus_gateway::GatewayResult<()> {
//! let bus = GovernanceBus::new(BusConfig::default(), Collaborators::in_memory())?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let loops = bus.start(shutdown_rx);
//!
//! let message = AgentMessage::new(
//!     TenantId::new("acme"),
//!     AgentId::new("planner"),
//!     AgentId::new("executor"),
//!     serde_json::json!({ "action": "summarize" }),
//! );
//! match bus.submit(message, ScoringContext::new()).await? {
//!     Outcome::Delivered => {}
//!     Outcome::Pending(handle) => {
//!         let _ = handle.wait().await?;
//!     }
//!     Outcome::Dropped(reason) => println!("dropped: {reason:?}"),
//! }
//!
//! let _ = shutdown_tx.send(true);
//! for handle in loops {
//!     let _ = handle.await;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod queue;
pub mod transport;
pub mod worker;

pub use bus::{Collaborators, GovernanceBus};
pub use config::{BusConfig, FailurePolicy, GatewayConfig, ValidationMode, WorkerConfig};
pub use error::{CollaboratorError, GatewayError, GatewayResult};
pub use gateway::{
    Disposition, DropReason, GatewayDeps, GatewayStepGuard, MessageGateway, Outcome,
    PendingHandle, POLICY_SERVICE, TRANSPORT_SERVICE,
};
pub use policy::{LocalRules, PolicyDecision, PolicyEvaluator, StaticPolicyEvaluator, ValidationBackend};
pub use queue::{MemoryQueue, MessageQueue, QueuedMessage};
pub use transport::{MemoryTransport, MessageTransport};
pub use worker::{WorkerOutcome, WorkerPool};
