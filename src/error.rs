//! Error types for the dispatch engine.

use thiserror::Error;

use crate::domain::{BatchId, MessageId};

/// Result type alias using the msafara error type.
pub type Result<T> = std::result::Result<T, MsafaraError>;

/// Main error type for the dispatch engine.
///
/// Per-message send failures are deliberately *not* represented here: they are
/// data (`provider::SendFailure`), recorded against the message and recovered
/// inside the chunk loop. Only batch-level failures surface as errors.
#[derive(Error, Debug)]
pub enum MsafaraError {
    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Another dispatch pass holds the claim on this batch
    #[error("Batch {0} is already being processed")]
    BatchBusy(BatchId),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Batch is in an invalid state for the requested operation
    #[error("Invalid state transition: batch {0} is in state '{1}', expected '{2}'")]
    InvalidState(BatchId, String, String),

    /// HTTP client error while talking to a gateway
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Database error
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
