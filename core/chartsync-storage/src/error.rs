//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record with this id already exists in the table.
    #[error("record already exists: {table}/{id}")]
    AlreadyExists { table: String, id: String },

    /// Stored data could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Lock,
}

impl From<chartsync_types::Error> for StorageError {
    fn from(e: chartsync_types::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}
