//! Persisted audit trail entries.

use crate::{StorageError, StorageResult};
use chartsync_types::{AuditAction, FieldValue, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Table holding audit entries. It is sync infrastructure and must be on the
/// audit skip-list, otherwise persisting an entry would audit itself.
pub const AUDIT_LOG_TABLE: &str = "audit_logs";

/// Identity recorded when no authenticated user can be resolved.
pub const SYSTEM_USER: &str = "system";

/// One immutable entry of the audit trail.
///
/// `old_value` and `new_value` hold bounded summaries of the record, never
/// the full payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: RecordId,
    pub user_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    pub timestamp: Timestamp,
}

impl AuditLogEntry {
    /// Converts the entry into a record of [`AUDIT_LOG_TABLE`].
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.clone(), self.timestamp)
            .with_field("userId", self.user_id.as_str())
            .with_field("action", self.action.as_str())
            .with_field("entityType", self.entity_type.as_str())
            .with_field("entityId", self.entity_id.as_str())
            .with_field("timestamp", self.timestamp.to_rfc3339());
        if let Some(old) = &self.old_value {
            record.set("oldValue", FieldValue::from_json(old.clone()));
        }
        if let Some(new) = &self.new_value {
            record.set("newValue", FieldValue::from_json(new.clone()));
        }
        record
    }

    /// Rebuilds an entry from a record of [`AUDIT_LOG_TABLE`].
    pub fn from_record(record: &Record) -> StorageResult<Self> {
        let text = |key: &str| -> StorageResult<String> {
            record
                .get(key)
                .and_then(FieldValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    StorageError::InvalidData(format!("audit entry {}: missing {key}", record.id))
                })
        };

        let action = text("action")?.parse::<AuditAction>()?;

        Ok(Self {
            id: record.id.clone(),
            user_id: text("userId")?,
            action,
            entity_type: text("entityType")?,
            entity_id: text("entityId")?,
            old_value: record.get("oldValue").map(FieldValue::to_json),
            new_value: record.get("newValue").map(FieldValue::to_json),
            timestamp: record.updated_at,
        })
    }
}
