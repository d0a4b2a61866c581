//! Offline-first sync and audit engine for chartsync.
//!
//! The application always reads and writes the local store. This crate keeps
//! that store reconciled with a remote store whenever the device is online,
//! and records every local mutation in an audit trail.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Registry**: the fixed local ↔ remote table mapping and processing order
//! - **Sanitize**: lowers typed values to plain JSON for the wire
//! - **Audit**: repository decorator that logs every create/update/delete
//! - **Transport**: the remote client contract, an HTTP client and an
//!   in-memory remote for tests
//! - **Orchestrator**: per-table pull (last-write-wins) and batched push
//! - **Scheduler**: timers, connectivity handling and mutual exclusion
//! - **State**: the observable [`SyncState`]
//!
//! ## Sync Process
//!
//! 1. **Gate**: skip if offline or a pass is already in flight
//! 2. **Health**: abort the pass if the remote store is unhealthy
//! 3. **Pull**: for each table in order, apply remote records that are
//!    strictly newer than the local copy, with auditing suppressed
//! 4. **Push**: send every local record of the table in batches of 50
//! 5. **Settle**: publish `lastSyncAt`, the last error and pending changes
//!
//! # Example
//!
//! ```
//! use chartsync_storage::LocalStore;
//! use chartsync_sync::mock::MemoryRemote;
//! use chartsync_sync::{SyncConfig, SyncContext, SyncEngine, SystemIdentity};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open_in_memory()?;
//! let ctx = SyncContext::new(
//!     SyncConfig::default(),
//!     store,
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(SystemIdentity),
//!     true,
//! )?;
//! let engine = SyncEngine::new(ctx);
//! let _report = engine.run_pass(chartsync_sync::SyncScope::Full).await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
mod config;
mod context;
mod error;
pub mod http;
pub mod orchestrator;
pub mod registry;
pub mod sanitize;
mod scheduler;
pub mod state;
pub mod transport;

pub use audit::{
    AuditChange, AuditConfig, AuditLogger, AuditingRepository, BulkOperationGuard,
    IdentityProvider, StaticIdentity, SystemIdentity,
};
pub use config::{SyncConfig, DEFAULT_BATCH_SIZE};
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use http::{HttpTransport, RemoteConfig};
pub use orchestrator::{PassReport, PullOutcome, SyncOrchestrator, TableReport};
pub use registry::{SyncScope, SyncTier, TableMapping, TableRegistry, TABLE_MAPPINGS};
pub use sanitize::{sanitize, sanitize_fields, sanitize_record};
pub use scheduler::{SchedulerHandle, SyncEngine};
pub use state::{Subscription, SyncPhase, SyncState, SyncStatus};
pub use transport::{
    mock, HealthStatus, PullResponse, PushResponse, RemoteTransport, WireRecord,
};
