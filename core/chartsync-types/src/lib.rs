//! Core type definitions for chartsync.
//!
//! This crate defines the storage- and transport-agnostic types shared by the
//! local store and the sync engine:
//! - Record identifiers (opaque strings, UUID v7 when minted locally)
//! - Millisecond UTC timestamps used for last-write-wins comparison
//! - The typed field value model and the generic [`Record`] container
//! - Audit actions recorded by the audit interceptor

mod action;
mod ids;
mod record;
mod timestamp;
mod value;

pub use action::AuditAction;
pub use ids::RecordId;
pub use record::{Fields, Record, ID_KEY, UPDATED_AT_KEY};
pub use timestamp::Timestamp;
pub use value::FieldValue;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building or parsing core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown audit action: {0}")]
    UnknownAction(String),
}
