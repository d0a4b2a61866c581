use crate::{Error, FieldValue, RecordId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field map of a record, ordered by key.
pub type Fields = BTreeMap<String, FieldValue>;

/// Wire key of the record identifier.
pub const ID_KEY: &str = "id";
/// Wire key of the last-modification timestamp.
pub const UPDATED_AT_KEY: &str = "updatedAt";

/// A persisted entity.
///
/// `id` and `updated_at` are owned by the writer. The sync engine compares
/// `updated_at` to resolve conflicts and never assigns either value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Creates an empty record with the given identity and timestamp.
    #[must_use]
    pub fn new(id: RecordId, updated_at: Timestamp) -> Self {
        Self {
            id,
            updated_at,
            fields: Fields::new(),
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets a field in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Stamps the record with the current time. Writers call this before
    /// every local mutation.
    pub fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }

    /// Parses a record from its wire form: a flat JSON object with `id`,
    /// `updatedAt` and arbitrary other keys.
    pub fn from_wire(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut map) = value else {
            return Err(Error::InvalidRecord("payload is not an object".into()));
        };

        let id = match map.remove(ID_KEY) {
            Some(serde_json::Value::String(s)) => RecordId::parse(s)?,
            Some(serde_json::Value::Number(n)) => RecordId::parse(n.to_string())?,
            Some(other) => {
                return Err(Error::InvalidRecord(format!("id has unsupported type: {other}")));
            }
            None => return Err(Error::InvalidRecord("missing id".into())),
        };

        let updated_at = match map.remove(UPDATED_AT_KEY) {
            Some(raw) => serde_json::from_value::<Timestamp>(raw).map_err(|e| {
                Error::InvalidRecord(format!("record {id}: bad {UPDATED_AT_KEY}: {e}"))
            })?,
            None => {
                return Err(Error::InvalidRecord(format!(
                    "record {id}: missing {UPDATED_AT_KEY}"
                )));
            }
        };

        let fields = map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from_json(v)))
            .collect();

        Ok(Self {
            id,
            updated_at,
            fields,
        })
    }
}
