//! SQLite storage layer for chartsync.
//!
//! Provides the always-available local store that the application writes to
//! while offline and that the sync engine reconciles with the remote store.
//!
//! # Architecture
//!
//! - Records of every table live in one `records` table keyed by
//!   `(table_name, id)`; fields are stored as lossless tagged JSON
//! - `updated_at` is a real column so delta queries and audit purges do not
//!   need to decode payloads
//! - Audit entries are ordinary records of the [`AUDIT_LOG_TABLE`] table, so
//!   they reach the remote store through the normal push path
//! - All mutation goes through the [`Repository`] trait, which the sync crate
//!   decorates with audit logging

mod audit_log;
mod error;
mod local_store;
mod repository;

pub use audit_log::{AuditLogEntry, AUDIT_LOG_TABLE, SYSTEM_USER};
pub use error::{StorageError, StorageResult};
pub use local_store::LocalStore;
pub use repository::{MergeOutcome, Repository};
