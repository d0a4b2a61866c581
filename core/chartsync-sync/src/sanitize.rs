//! Wire normalization of record values.
//!
//! The local store keeps typed values (dates, sets, binary); the remote store
//! only understands plain JSON. [`sanitize`] lowers a value to the wire-safe
//! subset of [`FieldValue`], and [`sanitize_record`] produces the flat JSON
//! object that the transport sends.
//!
//! Both functions are total and idempotent: sanitizing an already sanitized
//! value returns it unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chartsync_types::{FieldValue, Record, ID_KEY, UPDATED_AT_KEY};
use chrono::SecondsFormat;

/// Lowers a value to its wire-safe form.
///
/// - date-times become RFC 3339 strings with millisecond precision
/// - dates become `YYYY-MM-DD`
/// - binary payloads become standard base64 text
/// - sets become lists with duplicates removed (first occurrence wins)
/// - maps and lists are sanitized recursively
/// - non-finite floats become null
/// - everything else is returned as is
#[must_use]
pub fn sanitize(value: &FieldValue) -> FieldValue {
    match value {
        FieldValue::Null
        | FieldValue::Bool(_)
        | FieldValue::Integer(_)
        | FieldValue::Text(_) => value.clone(),
        FieldValue::Float(f) if f.is_finite() => value.clone(),
        FieldValue::Float(_) => FieldValue::Null,
        FieldValue::DateTime(dt) => {
            FieldValue::Text(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        FieldValue::Date(d) => FieldValue::Text(d.format("%Y-%m-%d").to_string()),
        FieldValue::Bytes(bytes) => FieldValue::Text(STANDARD.encode(bytes)),
        FieldValue::List(items) => FieldValue::List(items.iter().map(sanitize).collect()),
        FieldValue::Set(items) => {
            let mut unique: Vec<FieldValue> = Vec::with_capacity(items.len());
            for item in items.iter().map(sanitize) {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            FieldValue::List(unique)
        }
        FieldValue::Map(map) => FieldValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        ),
    }
}

/// Sanitizes every field of a record.
#[must_use]
pub fn sanitize_fields(record: &Record) -> Record {
    Record {
        id: record.id.clone(),
        updated_at: record.updated_at,
        fields: record
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), sanitize(v)))
            .collect(),
    }
}

/// Produces the wire object for a record: `id`, `updatedAt` and every
/// sanitized field. Fields named like the reserved keys are overridden by the
/// record's own identity.
#[must_use]
pub fn sanitize_record(record: &Record) -> serde_json::Map<String, serde_json::Value> {
    let mut wire: serde_json::Map<String, serde_json::Value> = record
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), sanitize(v).to_json()))
        .collect();
    wire.insert(ID_KEY.into(), serde_json::Value::String(record.id.to_string()));
    wire.insert(
        UPDATED_AT_KEY.into(),
        serde_json::Value::String(record.updated_at.to_rfc3339()),
    );
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn datetime_is_canonical() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            sanitize(&FieldValue::DateTime(dt)),
            FieldValue::Text("2024-05-01T10:00:00.000Z".into())
        );
    }

    #[test]
    fn date_is_iso() {
        let d = NaiveDate::from_ymd_opt(1990, 3, 14).unwrap();
        assert_eq!(sanitize(&FieldValue::Date(d)), FieldValue::Text("1990-03-14".into()));
    }

    #[test]
    fn set_dedups_in_order() {
        let set = FieldValue::Set(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(
            sanitize(&set),
            FieldValue::List(vec!["b".into(), "a".into()])
        );
    }

    #[test]
    fn nan_becomes_null() {
        assert_eq!(sanitize(&FieldValue::Float(f64::NAN)), FieldValue::Null);
    }
}
