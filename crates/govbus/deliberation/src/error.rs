//! Error types for govbus-deliberation.

use govbus_types::DeliberationId;
use thiserror::Error;

use crate::item::DeliberationStatus;

#[derive(Debug, Error)]
pub enum DeliberationError {
    #[error("deliberation item not found: {0}")]
    ItemNotFound(DeliberationId),

    /// A decision arrived after the item reached a terminal state.
    #[error("deliberation item {item_id} already resolved as {status}")]
    AlreadyResolved {
        item_id: DeliberationId,
        status: DeliberationStatus,
    },

    #[error("approver {approver} is not eligible to decide {item_id}")]
    NotEligible {
        item_id: DeliberationId,
        approver: String,
    },

    #[error("approver {approver} already decided {item_id}")]
    DuplicateDecision {
        item_id: DeliberationId,
        approver: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type DeliberationResult<T> = Result<T, DeliberationError>;
