#![allow(dead_code)]

use chartsync_storage::LocalStore;
use chartsync_sync::mock::MemoryRemote;
use chartsync_sync::{
    IdentityProvider, StaticIdentity, SyncConfig, SyncContext, SyncEngine, TableMapping,
    TableRegistry,
};
use chartsync_types::{Record, RecordId, Timestamp};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Enables log output for a test run (`RUST_LOG=chartsync_sync=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub ctx: Arc<SyncContext>,
    pub remote: Arc<MemoryRemote>,
    pub engine: Arc<SyncEngine>,
    pub identity: Arc<StaticIdentity>,
}

impl Harness {
    pub fn store(&self) -> &LocalStore {
        &self.ctx.store
    }

    /// Waits for queued audit entries to land.
    pub async fn flush_audit(&self) {
        self.ctx.audit.flush().await;
    }
}

pub fn harness(online: bool) -> Harness {
    harness_with(SyncConfig::default(), online)
}

pub fn harness_with(config: SyncConfig, online: bool) -> Harness {
    build(config, None, online)
}

pub fn harness_with_registry(registry: TableRegistry, online: bool) -> Harness {
    build(SyncConfig::default(), Some(registry), online)
}

pub fn harness_on(store: LocalStore, online: bool) -> Harness {
    build_on(store, SyncConfig::default(), None, online)
}

fn build(config: SyncConfig, registry: Option<TableRegistry>, online: bool) -> Harness {
    build_on(LocalStore::open_in_memory().unwrap(), config, registry, online)
}

fn build_on(
    store: LocalStore,
    config: SyncConfig,
    registry: Option<TableRegistry>,
    online: bool,
) -> Harness {
    init_tracing();
    let remote = Arc::new(MemoryRemote::new());
    let identity = Arc::new(StaticIdentity::new("nurse-1"));
    let provider: Arc<dyn IdentityProvider> = identity.clone();
    let ctx = match registry {
        Some(registry) => SyncContext::with_registry(
            config,
            registry,
            store,
            remote.clone(),
            provider,
            online,
        ),
        None => SyncContext::new(config, store, remote.clone(), provider, online),
    }
    .unwrap();
    let engine = SyncEngine::new(ctx.clone());
    Harness {
        ctx,
        remote,
        engine,
        identity,
    }
}

/// Registry with two plain tables, `x` before `y`.
pub fn two_table_registry() -> TableRegistry {
    use chartsync_sync::SyncTier;
    TableRegistry::from_mappings(vec![
        TableMapping::new("x", "x", "remote_x", SyncTier::Core, false),
        TableMapping::new("y", "y", "remote_y", SyncTier::Clinical, true),
    ])
    .unwrap()
}

pub fn id(id: &str) -> RecordId {
    RecordId::parse(id).unwrap()
}

pub fn record(id: &str, ts: i64) -> Record {
    Record::new(RecordId::parse(id).unwrap(), Timestamp::from_millis(ts))
        .with_field("name", format!("record {id}"))
}

pub fn wire(id: &str, ts: i64, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "updatedAt": Timestamp::from_millis(ts).to_rfc3339(),
        "name": name,
    })
}
