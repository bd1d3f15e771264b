//! Error types for govbus-types.

use thiserror::Error;

use crate::ids::MessageId;
use crate::integrity::IntegrityViolation;
use crate::message::MessageStatus;

/// Errors raised by message lifecycle handling.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid transition for {message_id}: {from} -> {to}")]
    InvalidTransition {
        message_id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("message {message_id} is terminal ({status}) and cannot change")]
    TerminalMessage {
        message_id: MessageId,
        status: MessageStatus,
    },

    #[error("message {0} has no impact score")]
    Unscored(MessageId),

    #[error("impact score {0} outside [0.0, 1.0]")]
    ScoreOutOfRange(f64),

    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),
}

/// Result type for message operations.
pub type TypesResult<T> = Result<T, TypesError>;
