//! Error types for the reconciliation outbox library.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur while recording or sweeping orphan blobs.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Record not found in the outbox
    #[error("Orphan record not found: {0}")]
    RecordNotFound(Uuid),

    /// The reaper could not check or delete a blob
    #[error("Reaper failed: {0}")]
    ReaperFailed(String),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}
