//! Error types for the client mirror.

use thiserror::Error;

/// Result type for mirror operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by local edits and sync round-trips.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An engine operation failed.
    #[error(transparent)]
    Core(#[from] synclog_core::CoreError),

    /// The referenced record is not in the mirror.
    #[error("record {0:?} not found")]
    NotFound(String),

    /// The record is already locally deleted.
    #[error("record {0:?} is already deleted")]
    AlreadyDeleted(String),

    /// The record has an upload in flight; local edits must wait for
    /// its echo.
    #[error("record {0:?} has a pending upload")]
    PendingUpload(String),
}
