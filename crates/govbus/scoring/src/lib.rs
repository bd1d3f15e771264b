//! govbus Scoring
//!
//! Risk assessment and routing for inbound messages:
//!
//! - [`ImpactScorer`]: weighted five-component risk score in `[0, 1]`
//! - [`AdaptiveRouter`]: fast path vs. deliberation, with a self-tuning
//!   threshold
//! - [`HistoricalStats`]: per-agent statistics the scorer reads

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod history;
pub mod router;
pub mod scorer;
pub mod signals;

pub use config::{RouterConfig, ScoringConfig, ScoringWeights, WEIGHT_EPSILON};
pub use error::{ScoringError, ScoringResult};
pub use history::{AgentHistory, HistoricalStats, InMemoryHistory};
pub use router::{AdaptiveRouter, RouteDecision, RouteOutcome};
pub use scorer::{ImpactScore, ImpactScorer};
pub use signals::{clamp_component, ImpactComponent, ScoringContext};
