//! SQLite-backed local store.

use crate::audit_log::{AuditLogEntry, AUDIT_LOG_TABLE};
use crate::{MergeOutcome, Repository, StorageError, StorageResult};
use chartsync_types::{Fields, Record, RecordId, Timestamp};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// The embedded, always-available persistent store on the client.
///
/// A single connection is shared behind a mutex; every public method is one
/// short transaction, so callers on different threads interleave at method
/// granularity.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        debug!("Opened local store at {}", path.as_ref().display());
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Lock)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                table_name TEXT NOT NULL,
                id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (table_name, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_updated
                ON records (table_name, updated_at);
            ",
        )?;
        Ok(())
    }

    fn encode(record: &Record) -> StorageResult<String> {
        Ok(serde_json::to_string(&record.fields)?)
    }

    fn decode(id: String, updated_at: i64, data: &str) -> StorageResult<Record> {
        let fields: Fields = serde_json::from_str(data)?;
        Ok(Record {
            id: RecordId::parse(id)?,
            updated_at: Timestamp::from_millis(updated_at),
            fields,
        })
    }

    fn get_locked(conn: &Connection, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let row = conn
            .query_row(
                "SELECT id, updated_at, data FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        row.map(|(id, ts, data)| Self::decode(id, ts, &data))
            .transpose()
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, ts, data) = row?;
            match Self::decode(id.clone(), ts, &data) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {:?}: {}", id, e),
            }
        }
        Ok(records)
    }

    // ── Audit log ────────────────────────────────────────────────

    /// Appends an audit entry in its own transaction.
    pub fn append_audit_entry(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        self.create(AUDIT_LOG_TABLE, &entry.to_record())
    }

    /// Loads audit entries, newest first, with pagination.
    pub fn load_audit_log(&self, limit: usize, offset: usize) -> StorageResult<Vec<AuditLogEntry>> {
        let records = self.query_records(
            "SELECT id, updated_at, data FROM records WHERE table_name = ?1
             ORDER BY updated_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            params![AUDIT_LOG_TABLE, limit as i64, offset as i64],
        )?;
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            match AuditLogEntry::from_record(record) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable audit entry {}: {}", record.id, e),
            }
        }
        Ok(entries)
    }

    /// Total number of audit entries.
    pub fn audit_log_count(&self) -> StorageResult<usize> {
        self.count(AUDIT_LOG_TABLE)
    }

    /// Audit entries concerning one record, oldest first.
    pub fn audit_entries_for(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<AuditLogEntry>> {
        let mut entries = Vec::new();
        for record in self.list(AUDIT_LOG_TABLE)? {
            match AuditLogEntry::from_record(&record) {
                Ok(entry) if entry.entity_type == entity_type && entry.entity_id == entity_id => {
                    entries.push(entry);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable audit entry {}: {}", record.id, e),
            }
        }
        Ok(entries)
    }

    /// Deletes audit entries older than `before`. Returns how many were removed.
    pub fn purge_audit_before(&self, before: Timestamp) -> StorageResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE table_name = ?1 AND updated_at < ?2",
            params![AUDIT_LOG_TABLE, before.as_millis()],
        )?;
        debug!("Purged {} audit entries older than {}", removed, before);
        Ok(removed)
    }
}

impl Repository for LocalStore {
    fn create(&self, table: &str, record: &Record) -> StorageResult<()> {
        let data = Self::encode(record)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO records (table_name, id, updated_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![table, record.id.as_str(), record.updated_at.as_millis(), data],
        )?;
        if inserted == 0 {
            return Err(StorageError::AlreadyExists {
                table: table.to_string(),
                id: record.id.to_string(),
            });
        }
        Ok(())
    }

    fn update(&self, table: &str, record: &Record) -> StorageResult<Option<Record>> {
        let data = Self::encode(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let previous = Self::get_locked(&tx, table, &record.id)?;
        tx.execute(
            "INSERT INTO records (table_name, id, updated_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (table_name, id) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data",
            params![table, record.id.as_str(), record.updated_at.as_millis(), data],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn merge_newer(&self, table: &str, record: &Record) -> StorageResult<MergeOutcome> {
        let data = Self::encode(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let previous = Self::get_locked(&tx, table, &record.id)?;
        let written = tx.execute(
            "INSERT INTO records (table_name, id, updated_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (table_name, id) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data
             WHERE excluded.updated_at > records.updated_at",
            params![table, record.id.as_str(), record.updated_at.as_millis(), data],
        )?;
        tx.commit()?;
        Ok(match (written, previous) {
            (0, _) => MergeOutcome::Kept,
            (_, None) => MergeOutcome::Inserted,
            (_, Some(previous)) => MergeOutcome::Replaced(previous),
        })
    }

    fn delete(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let previous = Self::get_locked(&tx, table, id)?;
        if previous.is_some() {
            tx.execute(
                "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(previous)
    }

    fn get(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        let conn = self.lock()?;
        Self::get_locked(&conn, table, id)
    }

    fn list(&self, table: &str) -> StorageResult<Vec<Record>> {
        self.query_records(
            "SELECT id, updated_at, data FROM records WHERE table_name = ?1 ORDER BY updated_at, id",
            params![table],
        )
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn modified_since(&self, table: &str, since: Timestamp) -> StorageResult<Vec<Record>> {
        self.query_records(
            "SELECT id, updated_at, data FROM records WHERE table_name = ?1 AND updated_at > ?2
             ORDER BY updated_at, id",
            params![table, since.as_millis()],
        )
    }
}
