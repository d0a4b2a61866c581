//! Error types for the sync layer.

use chartsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Only [`SyncError::UnknownTable`] is fatal to the call that raised it.
/// Everything else is recorded in a pass report and the engine moves on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The name is not part of the fixed table mapping.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Network or transport failure; retried on the next cycle.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A single record could not be parsed or encoded; it is skipped.
    #[error("record serialization error in {table}: {reason}")]
    RecordSerialization { table: String, reason: String },

    /// An audit entry could not be written; always swallowed.
    #[error("audit write failed: {0}")]
    AuditWrite(String),

    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A background task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
