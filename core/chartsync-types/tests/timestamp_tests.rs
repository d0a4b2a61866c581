use chartsync_types::Timestamp;
use proptest::prelude::*;

// ── Construction ─────────────────────────────────────────────────

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now().as_millis() > 0);
}

#[test]
fn from_millis_roundtrips() {
    let ts = Timestamp::from_millis(1_714_557_600_123);
    assert_eq!(ts.as_millis(), 1_714_557_600_123);
}

// ── Text form ────────────────────────────────────────────────────

#[test]
fn canonical_string_has_millis_and_z() {
    let ts = Timestamp::from_millis(1_714_557_600_123);
    assert_eq!(ts.to_rfc3339(), "2024-05-01T10:00:00.123Z");
}

#[test]
fn parses_offset_strings() {
    let ts = Timestamp::parse_rfc3339("2024-05-01T12:00:00.123+02:00").unwrap();
    assert_eq!(ts.as_millis(), 1_714_557_600_123);
}

#[test]
fn parses_bare_dates_as_midnight() {
    let ts: Timestamp = "2024-05-01".parse().unwrap();
    assert_eq!(ts.to_rfc3339(), "2024-05-01T00:00:00.000Z");
}

#[test]
fn rejects_garbage() {
    assert!(Timestamp::parse_rfc3339("yesterday").is_err());
}

// ── Serde ────────────────────────────────────────────────────────

#[test]
fn serializes_as_string() {
    let json = serde_json::to_string(&Timestamp::from_millis(0)).unwrap();
    assert_eq!(json, "\"1970-01-01T00:00:00.000Z\"");
}

#[test]
fn deserializes_from_integer_millis() {
    let ts: Timestamp = serde_json::from_str("1714557600123").unwrap();
    assert_eq!(ts.as_millis(), 1_714_557_600_123);
}

#[test]
fn deserializes_from_string() {
    let ts: Timestamp = serde_json::from_str("\"2024-05-01T10:00:00.123Z\"").unwrap();
    assert_eq!(ts.as_millis(), 1_714_557_600_123);
}

#[test]
fn deserialize_rejects_out_of_range_millis() {
    assert!(serde_json::from_str::<Timestamp>("9223372036854775807").is_err());
    assert!(serde_json::from_str::<Timestamp>("-9223372036854775808").is_err());
    assert!(serde_json::from_str::<Timestamp>("18446744073709551615").is_err());
    assert!(serde_json::from_str::<Timestamp>("1e300").is_err());
    assert!(Timestamp::try_from_millis(i64::MAX).is_err());

    let ts: Timestamp = serde_json::from_str("1714557600123.0").unwrap();
    assert_eq!(ts.as_millis(), 1_714_557_600_123);
}

#[test]
fn deserialize_rejects_bool() {
    assert!(serde_json::from_str::<Timestamp>("true").is_err());
}

// ── Ordering ─────────────────────────────────────────────────────

#[test]
fn newer_is_strict() {
    let a = Timestamp::from_millis(100);
    let b = Timestamp::from_millis(200);
    assert!(b.is_newer_than(&a));
    assert!(!a.is_newer_than(&b));
    assert!(!a.is_newer_than(&a));
}

proptest! {
    #[test]
    fn text_form_preserves_order(a in 0i64..4_102_444_800_000, b in 0i64..4_102_444_800_000) {
        let ta = Timestamp::from_millis(a);
        let tb = Timestamp::from_millis(b);
        let pa = Timestamp::parse_rfc3339(&ta.to_rfc3339()).unwrap();
        let pb = Timestamp::parse_rfc3339(&tb.to_rfc3339()).unwrap();
        prop_assert_eq!(pa, ta);
        prop_assert_eq!(pa.cmp(&pb), ta.cmp(&tb));
    }
}
