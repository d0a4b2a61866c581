//! Audit interceptor.
//!
//! Every create/update/delete made through an [`AuditingRepository`] produces
//! one [`AuditLogEntry`], written by a background task in its own
//! transaction. Audit logging is best-effort: enqueueing never blocks the
//! writer, and a failed or dropped entry is only logged.
//!
//! Bulk operations (pull hydration) suppress auditing through a scoped
//! [`BulkOperationGuard`]; suppression ends when the last guard is dropped,
//! on every exit path.

use crate::error::SyncError;
use crate::registry::TableRegistry;
use crate::sanitize::sanitize;
use crate::state::SyncStatus;
use chartsync_storage::{
    AuditLogEntry, LocalStore, MergeOutcome, Repository, StorageResult, AUDIT_LOG_TABLE,
    SYSTEM_USER,
};
use chartsync_types::{AuditAction, FieldValue, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Key added to a summary when fields were omitted.
pub const TRUNCATED_KEY: &str = "_truncated";

/// Configuration for the audit interceptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Tables that never produce audit entries.
    pub skip_tables: Vec<String>,
    /// Capacity of the background write queue.
    pub queue_capacity: usize,
    /// Maximum number of fields kept in an old/new value summary.
    pub max_summary_fields: usize,
    /// Maximum characters kept per string in a summary.
    pub max_string_len: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            skip_tables: vec![
                AUDIT_LOG_TABLE.to_string(),
                "sync_metadata".to_string(),
                "sessions".to_string(),
            ],
            queue_capacity: 1024,
            max_summary_fields: 20,
            max_string_len: 256,
        }
    }
}

// ── Identity ─────────────────────────────────────────────────────

/// Resolves the authenticated user at the time of a write.
pub trait IdentityProvider: Send + Sync {
    /// The current user id, if anyone is signed in.
    fn current_user_id(&self) -> Option<String>;
}

/// Provider that never resolves a user; every entry is attributed to
/// [`SYSTEM_USER`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_user_id(&self) -> Option<String> {
        None
    }
}

/// Provider backed by a value the host application sets on sign-in/out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: RwLock<Option<String>>,
}

impl StaticIdentity {
    /// Creates a provider with a signed-in user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user: RwLock::new(Some(user_id.into())),
        }
    }

    /// Sets or clears the signed-in user.
    pub fn set_user(&self, user_id: Option<String>) {
        match self.user.write() {
            Ok(mut guard) => *guard = user_id,
            Err(poisoned) => *poisoned.into_inner() = user_id,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        match self.user.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ── Logger ───────────────────────────────────────────────────────

enum AuditCommand {
    Write(AuditLogEntry),
    Flush(oneshot::Sender<()>),
}

struct AuditInner {
    tx: mpsc::Sender<AuditCommand>,
    identity: Arc<dyn IdentityProvider>,
    config: AuditConfig,
    suppression_depth: AtomicUsize,
    dropped: AtomicU64,
}

/// Handle to the audit trail. Cheap to clone; all clones share one queue and
/// one suppression counter.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditInner>,
}

/// Old and new copies of the record affected by a write.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditChange<'a> {
    pub old_value: Option<&'a Record>,
    pub new_value: Option<&'a Record>,
}

impl AuditLogger {
    /// Starts the background writer and returns the handle plus the writer's
    /// join handle. The writer exits once every handle has been dropped and
    /// the queue is drained.
    pub fn spawn(
        store: LocalStore,
        identity: Arc<dyn IdentityProvider>,
        config: AuditConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = tokio::spawn(run_writer(store, rx));
        let logger = Self {
            inner: Arc::new(AuditInner {
                tx,
                identity,
                config,
                suppression_depth: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
            }),
        };
        (logger, writer)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.inner.config
    }

    /// Whether writes to `table` are audited at all.
    #[must_use]
    pub fn audits_table(&self, table: &str) -> bool {
        !self.inner.config.skip_tables.iter().any(|t| t == table)
    }

    /// Whether a bulk operation currently suppresses auditing.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.inner.suppression_depth.load(Ordering::Acquire) > 0
    }

    /// Suppresses auditing until the returned guard is dropped. Guards nest.
    pub fn begin_bulk_operation(&self) -> BulkOperationGuard {
        let depth = self.inner.suppression_depth.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Audit suppression engaged (depth {})", depth);
        BulkOperationGuard {
            inner: self.inner.clone(),
        }
    }

    /// Entries dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Records one mutation. Never fails and never blocks; skip-listed
    /// tables and suppressed scopes are ignored.
    pub fn record(
        &self,
        action: AuditAction,
        entity_type: &str,
        entity_id: &RecordId,
        change: AuditChange<'_>,
    ) {
        if self.is_suppressed() || !self.audits_table(entity_type) {
            return;
        }

        let config = &self.inner.config;
        let entry = AuditLogEntry {
            id: RecordId::new(),
            user_id: self
                .inner
                .identity
                .current_user_id()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| SYSTEM_USER.to_string()),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            old_value: change.old_value.map(|r| summarize(r, config)),
            new_value: change.new_value.map(|r| summarize(r, config)),
            timestamp: Timestamp::now(),
        };

        match self.inner.tx.try_send(AuditCommand::Write(entry)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Audit queue full; dropped {} entry for {}/{}",
                    action, entity_type, entity_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Audit writer stopped; dropped {} entry for {}/{}",
                    action, entity_type, entity_id
                );
            }
        }
    }

    /// Waits until every entry enqueued before this call has been written
    /// (or has failed). Returns immediately if the writer is gone.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.tx.send(AuditCommand::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run_writer(store: LocalStore, mut rx: mpsc::Receiver<AuditCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Write(entry) => {
                let store = store.clone();
                let entry_id = entry.id.clone();
                let result =
                    tokio::task::spawn_blocking(move || store.append_audit_entry(&entry)).await;
                let failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(SyncError::AuditWrite(e.to_string())),
                    Err(e) => Some(SyncError::AuditWrite(format!("writer task panicked: {e}"))),
                };
                if let Some(e) = failure {
                    warn!("Dropping audit entry {}: {}", entry_id, e);
                }
            }
            AuditCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Audit writer stopped");
}

/// Scoped suppression of audit logging. Dropping it re-enables auditing
/// (once no other guard is alive).
#[must_use = "auditing is only suppressed while the guard is alive"]
pub struct BulkOperationGuard {
    inner: Arc<AuditInner>,
}

impl Drop for BulkOperationGuard {
    fn drop(&mut self) {
        let remaining = self.inner.suppression_depth.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!("Audit suppression released (depth {})", remaining);
    }
}

// ── Summaries ────────────────────────────────────────────────────

/// Builds the bounded summary stored as `oldValue`/`newValue`.
#[must_use]
pub fn summarize(record: &Record, config: &AuditConfig) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert("id".into(), serde_json::Value::String(record.id.to_string()));
    map.insert(
        "updatedAt".into(),
        serde_json::Value::String(record.updated_at.to_rfc3339()),
    );
    summarize_entries(record.fields.iter(), record.fields.len(), config, &mut map);
    serde_json::Value::Object(map)
}

fn summarize_entries<'a>(
    entries: impl Iterator<Item = (&'a String, &'a FieldValue)>,
    total: usize,
    config: &AuditConfig,
    out: &mut serde_json::Map<String, serde_json::Value>,
) {
    let kept = total.min(config.max_summary_fields);
    for (key, value) in entries.take(kept) {
        out.insert(key.clone(), summarize_value(value, config));
    }
    if total > kept {
        out.insert(TRUNCATED_KEY.into(), serde_json::Value::from(total - kept));
    }
}

fn summarize_value(value: &FieldValue, config: &AuditConfig) -> serde_json::Value {
    match value {
        FieldValue::Bytes(bytes) => {
            serde_json::Value::String(format!("[binary {} bytes]", bytes.len()))
        }
        FieldValue::Text(s) => serde_json::Value::String(truncate(s, config.max_string_len)),
        FieldValue::List(items) | FieldValue::Set(items) => {
            let mut out: Vec<serde_json::Value> = items
                .iter()
                .take(config.max_summary_fields)
                .map(|v| summarize_value(v, config))
                .collect();
            if items.len() > config.max_summary_fields {
                out.push(serde_json::Value::String(format!(
                    "[{} more]",
                    items.len() - config.max_summary_fields
                )));
            }
            serde_json::Value::Array(out)
        }
        FieldValue::Map(map) => {
            let mut out = serde_json::Map::new();
            summarize_entries(map.iter(), map.len(), config, &mut out);
            serde_json::Value::Object(out)
        }
        other => sanitize(other).to_json(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

// ── Decorator ────────────────────────────────────────────────────

/// Repository decorator that delegates every call and then records the
/// mutation in the audit trail.
///
/// Writes to tables in the sync registry also bump the pending-change
/// counter of the attached [`SyncStatus`], except inside a bulk operation.
pub struct AuditingRepository<R> {
    inner: R,
    audit: AuditLogger,
    status: Option<Arc<SyncStatus>>,
    registry: Option<Arc<TableRegistry>>,
}

impl<R: Repository> AuditingRepository<R> {
    /// Wraps `inner` with audit logging only.
    pub fn new(inner: R, audit: AuditLogger) -> Self {
        Self {
            inner,
            audit,
            status: None,
            registry: None,
        }
    }

    /// Also counts writes to synced tables as pending changes.
    #[must_use]
    pub fn with_change_tracking(
        mut self,
        status: Arc<SyncStatus>,
        registry: Arc<TableRegistry>,
    ) -> Self {
        self.status = Some(status);
        self.registry = Some(registry);
        self
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// The audit handle.
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    fn after_write(
        &self,
        action: AuditAction,
        table: &str,
        id: &RecordId,
        change: AuditChange<'_>,
    ) {
        if self.audit.is_suppressed() {
            return;
        }
        self.audit.record(action, table, id, change);
        if let (Some(status), Some(registry)) = (&self.status, &self.registry) {
            if registry.contains(table) {
                status.record_local_change();
            }
        }
    }
}

impl<R: Repository> Repository for AuditingRepository<R> {
    fn create(&self, table: &str, record: &Record) -> StorageResult<()> {
        self.inner.create(table, record)?;
        self.after_write(
            AuditAction::Create,
            table,
            &record.id,
            AuditChange {
                old_value: None,
                new_value: Some(record),
            },
        );
        Ok(())
    }

    fn update(&self, table: &str, record: &Record) -> StorageResult<Option<Record>> {
        let previous = self.inner.update(table, record)?;
        let action = if previous.is_some() {
            AuditAction::Update
        } else {
            AuditAction::Create
        };
        self.after_write(
            action,
            table,
            &record.id,
            AuditChange {
                old_value: previous.as_ref(),
                new_value: Some(record),
            },
        );
        Ok(previous)
    }

    fn merge_newer(&self, table: &str, record: &Record) -> StorageResult<MergeOutcome> {
        let outcome = self.inner.merge_newer(table, record)?;
        let (action, old_value) = match &outcome {
            MergeOutcome::Inserted => (AuditAction::Create, None),
            MergeOutcome::Replaced(previous) => (AuditAction::Update, Some(previous)),
            MergeOutcome::Kept => return Ok(outcome),
        };
        self.after_write(
            action,
            table,
            &record.id,
            AuditChange {
                old_value,
                new_value: Some(record),
            },
        );
        Ok(outcome)
    }

    fn delete(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let removed = self.inner.delete(table, id)?;
        if let Some(old) = &removed {
            self.after_write(
                AuditAction::Delete,
                table,
                id,
                AuditChange {
                    old_value: Some(old),
                    new_value: None,
                },
            );
        }
        Ok(removed)
    }

    fn get(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        self.inner.get(table, id)
    }

    fn list(&self, table: &str) -> StorageResult<Vec<Record>> {
        self.inner.list(table)
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        self.inner.count(table)
    }

    fn modified_since(&self, table: &str, since: Timestamp) -> StorageResult<Vec<Record>> {
        self.inner.modified_since(table, since)
    }
}
