//! Process-wide wiring of the sync engine.
//!
//! A [`SyncContext`] is built once at startup and shared by reference; there
//! are no global singletons. It owns the local store, the audited repository
//! the application writes through, the remote client and the observable
//! status.

use crate::audit::{AuditLogger, AuditingRepository, IdentityProvider};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::http::HttpTransport;
use crate::registry::TableRegistry;
use crate::state::SyncStatus;
use crate::transport::RemoteTransport;
use chartsync_storage::LocalStore;
use std::sync::Arc;
use tracing::info;

/// Shared handles of one engine instance.
pub struct SyncContext {
    pub config: SyncConfig,
    pub registry: Arc<TableRegistry>,
    /// Raw store; writes here bypass auditing.
    pub store: LocalStore,
    /// Audited view of `store`. Application writes go through this.
    pub repository: Arc<AuditingRepository<LocalStore>>,
    pub audit: AuditLogger,
    pub remote: Arc<dyn RemoteTransport>,
    pub status: Arc<SyncStatus>,
}

impl SyncContext {
    /// Wires an engine over the built-in table registry.
    ///
    /// Must be called inside a Tokio runtime: the audit writer is spawned
    /// here.
    pub fn new(
        config: SyncConfig,
        store: LocalStore,
        remote: Arc<dyn RemoteTransport>,
        identity: Arc<dyn IdentityProvider>,
        is_online: bool,
    ) -> SyncResult<Arc<Self>> {
        Self::with_registry(
            config,
            TableRegistry::builtin(),
            store,
            remote,
            identity,
            is_online,
        )
    }

    /// Wires an engine over a custom table registry.
    pub fn with_registry(
        config: SyncConfig,
        registry: TableRegistry,
        store: LocalStore,
        remote: Arc<dyn RemoteTransport>,
        identity: Arc<dyn IdentityProvider>,
        is_online: bool,
    ) -> SyncResult<Arc<Self>> {
        config.validate()?;

        let registry = Arc::new(registry);
        let status = SyncStatus::new(is_online);
        // The writer exits on its own once every logger handle is dropped.
        let (audit, _writer) = AuditLogger::spawn(store.clone(), identity, config.audit.clone());
        let repository = Arc::new(
            AuditingRepository::new(store.clone(), audit.clone())
                .with_change_tracking(status.clone(), registry.clone()),
        );

        info!(
            "Sync context ready: {} tables, online={}",
            registry.len(),
            is_online
        );
        Ok(Arc::new(Self {
            config,
            registry,
            store,
            repository,
            audit,
            remote,
            status,
        }))
    }

    /// Wires an engine that talks HTTP to the remote configured in
    /// `config.remote` (or the default endpoint when unset).
    pub fn connect_http(
        config: SyncConfig,
        store: LocalStore,
        identity: Arc<dyn IdentityProvider>,
        is_online: bool,
    ) -> SyncResult<Arc<Self>> {
        let remote = HttpTransport::new(config.remote.clone().unwrap_or_default())?;
        Self::new(config, store, Arc::new(remote), identity, is_online)
    }
}
