//! Store and scheduler errors.

use thiserror::Error;

/// Errors surfaced by key-value store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached or persisted to.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be decoded.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The due-time index has no entries.
    #[error("due-time index is empty")]
    EmptyIndex,

    /// A payload could not be serialized or deserialized.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored key does not form a valid resource path.
    #[error(transparent)]
    InvalidPath(#[from] crate::path::InvalidPathError),
}
