use crate::StorageResult;
use chartsync_types::{Record, RecordId, Timestamp};
use std::sync::Arc;

/// Result of [`Repository::merge_newer`].
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The record was absent and has been inserted.
    Inserted,
    /// The incoming copy was strictly newer; holds the replaced copy.
    Replaced(Record),
    /// The stored copy is as new or newer and was left untouched.
    Kept,
}

/// Mutation and query surface of a record store.
///
/// Every local write made by the application goes through this trait, which
/// lets the sync crate wrap a store with audit logging without touching the
/// store itself. Methods are blocking; async callers run them on
/// `spawn_blocking`.
pub trait Repository: Send + Sync {
    /// Inserts a new record. Fails if the id is already taken in `table`.
    fn create(&self, table: &str, record: &Record) -> StorageResult<()>;

    /// Replaces a record, inserting it if absent. Returns the previous copy.
    fn update(&self, table: &str, record: &Record) -> StorageResult<Option<Record>>;

    /// Writes `record` only if it is absent or its `updated_at` is strictly
    /// newer than the stored copy. The comparison and the write happen in
    /// one transaction.
    fn merge_newer(&self, table: &str, record: &Record) -> StorageResult<MergeOutcome>;

    /// Removes a record. Returns the removed copy, or `None` if it was absent.
    fn delete(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>>;

    /// Fetches a single record.
    fn get(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>>;

    /// Returns every record of a table, oldest modification first.
    fn list(&self, table: &str) -> StorageResult<Vec<Record>>;

    /// Number of records in a table.
    fn count(&self, table: &str) -> StorageResult<usize>;

    /// Records modified strictly after `since`.
    fn modified_since(&self, table: &str, since: Timestamp) -> StorageResult<Vec<Record>>;
}

impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn create(&self, table: &str, record: &Record) -> StorageResult<()> {
        (**self).create(table, record)
    }

    fn update(&self, table: &str, record: &Record) -> StorageResult<Option<Record>> {
        (**self).update(table, record)
    }

    fn merge_newer(&self, table: &str, record: &Record) -> StorageResult<MergeOutcome> {
        (**self).merge_newer(table, record)
    }

    fn delete(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        (**self).delete(table, id)
    }

    fn get(&self, table: &str, id: &RecordId) -> StorageResult<Option<Record>> {
        (**self).get(table, id)
    }

    fn list(&self, table: &str) -> StorageResult<Vec<Record>> {
        (**self).list(table)
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        (**self).count(table)
    }

    fn modified_since(&self, table: &str, since: Timestamp) -> StorageResult<Vec<Record>> {
        (**self).modified_since(table, since)
    }
}
