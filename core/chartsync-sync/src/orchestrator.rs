//! Per-table reconciliation between the local and remote stores.
//!
//! A pass walks the registry in processing order and, for each table, pulls
//! (remote → local, last-write-wins on `updated_at`) and then pushes
//! (local → remote, in fixed-size batches). Failures are contained at the
//! level where they happen: a bad record never fails its batch, a failed
//! batch never fails its table, a failed table never fails the pass.
//!
//! The orchestrator holds no state of its own between passes and performs no
//! mutual exclusion; the scheduler owns both.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::registry::{SyncScope, TableMapping};
use crate::sanitize::sanitize_record;
use crate::transport::WireRecord;
use chartsync_storage::{MergeOutcome, Repository};
use chartsync_types::{Record, Timestamp};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Absent locally; inserted.
    Inserted,
    /// Remote copy was strictly newer; local copy overwritten.
    Updated,
    /// Local copy is as new or newer; left untouched.
    Unchanged,
}

/// Outcome of pulling and/or pushing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    /// Local table name.
    pub table: String,
    pub pulled: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed_records: usize,
    pub pushed: usize,
    pub push_batches: usize,
    pub failed_batches: usize,
    /// Error messages, in the order they occurred.
    pub errors: Vec<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    fn fail(&mut self, error: SyncError) {
        self.errors.push(error.to_string());
    }

    fn merge(&mut self, other: TableReport) {
        self.pulled += other.pulled;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed_records += other.failed_records;
        self.pushed += other.pushed;
        self.push_batches += other.push_batches;
        self.failed_batches += other.failed_batches;
        self.errors.extend(other.errors);
    }

    /// Whether nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub scope: SyncScope,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Set when the pass stopped before touching any table.
    pub aborted: Option<String>,
    pub tables: Vec<TableReport>,
}

impl PassReport {
    /// All error messages of the pass, in order.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.aborted
            .iter()
            .map(String::as_str)
            .chain(self.tables.iter().flat_map(|t| t.errors.iter().map(String::as_str)))
    }

    /// The most recent error, surfaced as `SyncState.error`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.errors().last().map(str::to_string)
    }

    /// Whether the pass completed without any error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Report for one table, if it was part of the pass.
    #[must_use]
    pub fn table(&self, local: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == local)
    }

    #[must_use]
    pub fn total_pushed(&self) -> usize {
        self.tables.iter().map(|t| t.pushed).sum()
    }

    #[must_use]
    pub fn total_push_batches(&self) -> usize {
        self.tables.iter().map(|t| t.push_batches).sum()
    }

    #[must_use]
    pub fn total_failed_batches(&self) -> usize {
        self.tables.iter().map(|t| t.failed_batches).sum()
    }
}

/// Reconciles tables between the local and remote stores.
pub struct SyncOrchestrator {
    ctx: Arc<SyncContext>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over a context.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Runs one pass over the tables of `scope`.
    ///
    /// The pass starts with a health check; an unhealthy remote aborts it
    /// before any table is touched. Otherwise every table is pulled and then
    /// pushed, sequentially, in registry order.
    pub async fn run(&self, scope: SyncScope) -> PassReport {
        let started_at = Timestamp::now();
        let tables = self.ctx.registry.tables_for(scope);
        info!("Starting {:?} sync pass over {} tables", scope, tables.len());

        let health = self.ctx.remote.health_check().await;
        if !health.healthy {
            let error = SyncError::RemoteUnavailable(format!(
                "health check failed{}",
                health
                    .provider
                    .map(|p| format!(" ({p})"))
                    .unwrap_or_default()
            ));
            warn!("Aborting {:?} sync pass: {}", scope, error);
            return PassReport {
                scope,
                started_at,
                finished_at: Timestamp::now(),
                aborted: Some(error.to_string()),
                tables: Vec::new(),
            };
        }

        let mut reports = Vec::with_capacity(tables.len());
        for mapping in &tables {
            reports.push(self.sync_table(mapping).await);
        }

        let report = PassReport {
            scope,
            started_at,
            finished_at: Timestamp::now(),
            aborted: None,
            tables: reports,
        };
        info!(
            "Finished {:?} sync pass: {} records pushed, {} errors",
            scope,
            report.total_pushed(),
            report.errors().count()
        );
        report
    }

    /// Pulls then pushes one table.
    pub async fn sync_table(&self, mapping: &TableMapping) -> TableReport {
        let mut report = self.pull_table(mapping.remote, mapping.local).await;
        report.merge(self.push_table(mapping.local, mapping.remote).await);
        report
    }

    /// Fetches every remote record of a table and applies each one locally
    /// with last-write-wins. Never fails: transport and per-record errors are
    /// collected in the report.
    pub async fn pull_table(&self, remote: &str, local: &str) -> TableReport {
        let mut report = TableReport::new(local);

        let response = self.ctx.remote.pull(remote).await;
        if !response.success {
            let error = SyncError::RemoteUnavailable(format!(
                "pull {remote}: {}",
                response.error.as_deref().unwrap_or("unknown error")
            ));
            warn!("{}", error);
            report.fail(error);
            return report;
        }

        let records = response.data.unwrap_or_default();
        report.pulled = records.len();
        debug!("Pulled {} records from {}", records.len(), remote);

        for raw in records {
            match self.apply_remote(local, raw).await {
                Ok(PullOutcome::Inserted) => report.inserted += 1,
                Ok(PullOutcome::Updated) => report.updated += 1,
                Ok(PullOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!("Skipping record in {}: {}", local, e);
                    report.failed_records += 1;
                    report.fail(e);
                }
            }
        }

        info!(
            "Pulled {}: {} inserted, {} updated, {} unchanged, {} failed",
            local, report.inserted, report.updated, report.unchanged, report.failed_records
        );
        report
    }

    /// Applies one inbound wire record to the local table.
    ///
    /// The timestamp comparison and the write are one store transaction, so a
    /// local write landing mid-pull is never overwritten by an older copy.
    /// The write runs inside a bulk operation so hydration does not flood the
    /// audit trail; the suppression scope covers only this record's write.
    pub async fn apply_remote(&self, local: &str, raw: serde_json::Value) -> SyncResult<PullOutcome> {
        let record = Record::from_wire(raw).map_err(|e| SyncError::RecordSerialization {
            table: local.to_string(),
            reason: e.to_string(),
        })?;

        let repository = self.ctx.repository.clone();
        let audit = self.ctx.audit.clone();
        let table = local.to_string();
        tokio::task::spawn_blocking(move || -> SyncResult<PullOutcome> {
            let _bulk = audit.begin_bulk_operation();
            Ok(match repository.merge_newer(&table, &record)? {
                MergeOutcome::Inserted => PullOutcome::Inserted,
                MergeOutcome::Replaced(_) => PullOutcome::Updated,
                MergeOutcome::Kept => PullOutcome::Unchanged,
            })
        })
        .await?
    }

    /// Sends every local record of a table to the remote store in batches of
    /// the configured size. A failed batch is recorded and the remaining
    /// batches are still sent; nothing is retried within the pass.
    pub async fn push_table(&self, local: &str, remote: &str) -> TableReport {
        let mut report = TableReport::new(local);

        let repository = self.ctx.repository.clone();
        let table = local.to_string();
        let records = match tokio::task::spawn_blocking(move || repository.list(&table)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                let error = SyncError::Storage(e);
                warn!("Cannot read {} for push: {}", local, error);
                report.fail(error);
                return report;
            }
            Err(e) => {
                let error = SyncError::from(e);
                warn!("Cannot read {} for push: {}", local, error);
                report.fail(error);
                return report;
            }
        };

        if records.is_empty() {
            debug!("Nothing to push for {}", local);
            return report;
        }

        let wire: Vec<WireRecord> = records.iter().map(sanitize_record).collect();
        let batch_size = self.ctx.config.batch_size.max(1);

        for (seq, chunk) in wire.chunks(batch_size).enumerate() {
            report.push_batches += 1;
            let response = self.ctx.remote.push_batch(remote, chunk).await;
            if response.success {
                report.pushed += chunk.len();
                debug!("Pushed batch {} of {} ({} records)", seq, remote, chunk.len());
            } else {
                report.failed_batches += 1;
                let error = SyncError::RemoteUnavailable(format!(
                    "push {remote} batch {seq}: {}",
                    response.error.as_deref().unwrap_or("unknown error")
                ));
                warn!("{}", error);
                report.fail(error);
            }
        }

        info!(
            "Pushed {}: {}/{} records in {} batches ({} failed)",
            local,
            report.pushed,
            wire.len(),
            report.push_batches,
            report.failed_batches
        );
        report
    }

    /// Pushes one record immediately, outside the scheduled passes.
    /// Returns whether the remote accepted it; never fails.
    pub async fn upsert_record_immediate(&self, local: &str, record: &Record) -> bool {
        let remote = match self.ctx.registry.remote_name(local) {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Immediate upsert rejected: {}", e);
                return false;
            }
        };
        if !self.ctx.status.is_online() {
            debug!("Immediate upsert of {}/{} skipped: offline", local, record.id);
            return false;
        }

        let response = self
            .ctx
            .remote
            .upsert_one(remote, &sanitize_record(record))
            .await;
        if !response.success {
            warn!(
                "Immediate upsert of {}/{} failed: {}",
                local,
                record.id,
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        response.success
    }
}
