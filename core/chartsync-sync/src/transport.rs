//! Remote transport contract.
//!
//! The engine consumes a thin request/response client to reach the remote
//! store. Implementations never return `Err`: every failure is folded into a
//! response with `success == false` and a message, which the orchestrator
//! records and moves past.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A record in wire form: a flat JSON object with `id` and `updatedAt`.
pub type WireRecord = serde_json::Map<String, serde_json::Value>;

/// Response to [`RemoteTransport::pull`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullResponse {
    /// A successful pull.
    #[must_use]
    pub fn ok(data: Vec<serde_json::Value>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed pull.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Response to [`RemoteTransport::push_batch`] and [`RemoteTransport::upsert_one`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResponse {
    /// A successful write.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed write.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Response to [`RemoteTransport::health_check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Client for the remote store.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fetches every record of a remote table.
    async fn pull(&self, table: &str) -> PullResponse;

    /// Writes a batch of records to a remote table.
    async fn push_batch(&self, table: &str, records: &[WireRecord]) -> PushResponse;

    /// Writes a single record, out of band.
    async fn upsert_one(&self, table: &str, record: &WireRecord) -> PushResponse;

    /// Probes the remote store.
    async fn health_check(&self) -> HealthStatus;
}

/// An in-memory remote store for testing.
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Inner {
        tables: HashMap<String, BTreeMap<String, WireRecord>>,
        pull_calls: Vec<String>,
        batch_calls: Vec<(String, usize)>,
        upsert_calls: Vec<String>,
        pull_failures: HashMap<String, String>,
        push_failures: HashMap<String, String>,
        failing_batches: HashMap<String, Vec<usize>>,
        pull_delay: Option<Duration>,
    }

    /// Remote store kept in memory, with call recording and failure
    /// injection.
    pub struct MemoryRemote {
        inner: Mutex<Inner>,
        healthy: AtomicBool,
    }

    impl Default for MemoryRemote {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryRemote {
        /// Creates an empty, healthy remote.
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner::default()),
                healthy: AtomicBool::new(true),
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|p| p.into_inner())
        }

        /// Stores raw wire objects in a remote table. Objects without a
        /// string `id` are stored under a synthetic key so malformed payloads
        /// can be served back.
        pub fn seed(&self, table: &str, records: Vec<serde_json::Value>) {
            let mut inner = self.lock();
            let rows = inner.tables.entry(table.to_string()).or_default();
            for (n, value) in records.into_iter().enumerate() {
                let key = value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("__malformed_{n}"));
                let object = match value {
                    serde_json::Value::Object(map) => map,
                    other => {
                        let mut map = WireRecord::new();
                        map.insert("__raw".into(), other);
                        map
                    }
                };
                rows.insert(key, object);
            }
        }

        /// All records of a remote table.
        pub fn records(&self, table: &str) -> Vec<WireRecord> {
            self.lock()
                .tables
                .get(table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default()
        }

        /// One record of a remote table.
        pub fn get(&self, table: &str, id: &str) -> Option<WireRecord> {
            self.lock().tables.get(table).and_then(|rows| rows.get(id).cloned())
        }

        /// Makes every pull of `table` fail with `error`.
        pub fn fail_pull(&self, table: &str, error: &str) {
            self.lock().pull_failures.insert(table.into(), error.into());
        }

        /// Makes every push (batch or single) to `table` fail with `error`.
        pub fn fail_push(&self, table: &str, error: &str) {
            self.lock().push_failures.insert(table.into(), error.into());
        }

        /// Makes the `n`-th batch call (0-based, counted per table) fail.
        pub fn fail_nth_batch(&self, table: &str, n: usize) {
            self.lock().failing_batches.entry(table.into()).or_default().push(n);
        }

        /// Clears every injected failure.
        pub fn heal(&self) {
            let mut inner = self.lock();
            inner.pull_failures.clear();
            inner.push_failures.clear();
            inner.failing_batches.clear();
        }

        /// Sets the health-check result.
        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        /// Delays every pull, to keep a pass in flight.
        pub fn set_pull_delay(&self, delay: Option<Duration>) {
            self.lock().pull_delay = delay;
        }

        /// Tables pulled, in call order.
        pub fn pull_calls(&self) -> Vec<String> {
            self.lock().pull_calls.clone()
        }

        /// Sizes of every batch sent to `table`, in call order.
        pub fn batch_sizes(&self, table: &str) -> Vec<usize> {
            self.lock()
                .batch_calls
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, n)| *n)
                .collect()
        }

        /// Total batch calls across tables.
        pub fn batch_call_count(&self) -> usize {
            self.lock().batch_calls.len()
        }

        /// Tables that received single-record upserts, in call order.
        pub fn upsert_calls(&self) -> Vec<String> {
            self.lock().upsert_calls.clone()
        }

        fn store(inner: &mut Inner, table: &str, record: &WireRecord) {
            if let Some(id) = record.get("id").and_then(|v| v.as_str()) {
                inner
                    .tables
                    .entry(table.to_string())
                    .or_default()
                    .insert(id.to_string(), record.clone());
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for MemoryRemote {
        async fn pull(&self, table: &str) -> PullResponse {
            let delay = {
                let mut inner = self.lock();
                inner.pull_calls.push(table.to_string());
                inner.pull_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let inner = self.lock();
            if let Some(error) = inner.pull_failures.get(table) {
                return PullResponse::failed(error.clone());
            }
            let data = inner
                .tables
                .get(table)
                .map(|rows| {
                    rows.values()
                        .map(|r| match r.get("__raw") {
                            Some(raw) if r.len() == 1 => raw.clone(),
                            _ => serde_json::Value::Object(r.clone()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            PullResponse::ok(data)
        }

        async fn push_batch(&self, table: &str, records: &[WireRecord]) -> PushResponse {
            let mut inner = self.lock();
            let seq = inner.batch_calls.iter().filter(|(t, _)| t == table).count();
            inner.batch_calls.push((table.to_string(), records.len()));

            if let Some(error) = inner.push_failures.get(table) {
                return PushResponse::failed(error.clone());
            }
            if inner
                .failing_batches
                .get(table)
                .is_some_and(|seqs| seqs.contains(&seq))
            {
                return PushResponse::failed(format!("batch {seq} rejected"));
            }
            for record in records {
                Self::store(&mut inner, table, record);
            }
            PushResponse::ok()
        }

        async fn upsert_one(&self, table: &str, record: &WireRecord) -> PushResponse {
            let mut inner = self.lock();
            inner.upsert_calls.push(table.to_string());
            if let Some(error) = inner.push_failures.get(table) {
                return PushResponse::failed(error.clone());
            }
            Self::store(&mut inner, table, record);
            PushResponse::ok()
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                healthy: self.healthy.load(Ordering::SeqCst),
                provider: Some("memory".into()),
            }
        }
    }

}
