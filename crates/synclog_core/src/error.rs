//! Error types for the synclog engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] synclog_storage::StorageError),

    /// Serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A referenced record, plugin, or pool does not exist.
    #[error("not exists: {0}")]
    NotExists(String),

    /// A record or name that must be unique already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency or structural conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal invariant violation; a programming error, not retryable.
    #[error("logic error: {0}")]
    Logic(String),

    /// Benign no-op; nothing to do.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A sequence ID string could not be decoded.
    #[error("invalid sequence id: {0:?}")]
    InvalidSeqId(String),

    /// A persisted log frame is not what was written.
    #[error("frame corruption: {message}")]
    FrameCorruption {
        /// Description of the corruption.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotExists` error.
    pub fn not_exists(message: impl Into<String>) -> Self {
        Self::NotExists(message.into())
    }

    /// Creates an `AlreadyExists` error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a `Logic` error.
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    /// Creates an `Aborted` error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    /// Creates a frame corruption error.
    pub fn frame_corruption(message: impl Into<String>) -> Self {
        Self::FrameCorruption {
            message: message.into(),
        }
    }

    /// Returns true for version-mismatch and structural conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true when the target of an operation was missing.
    #[must_use]
    pub fn is_not_exists(&self) -> bool {
        matches!(self, Self::NotExists(_))
    }
}
