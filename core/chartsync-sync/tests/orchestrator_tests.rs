mod common;

use chartsync_storage::{LocalStore, Repository, AUDIT_LOG_TABLE};
use chartsync_sync::{SyncOrchestrator, SyncScope, TableRegistry};
use chartsync_types::{FieldValue, Record, Timestamp};
use chrono::{TimeZone, Utc};
use common::{
    harness, harness_on, harness_with_registry, id, record, two_table_registry, wire,
};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Last-write-wins ──────────────────────────────────────────────

#[tokio::test]
async fn newer_local_record_survives_pull_and_is_pushed() {
    let h = harness(true);
    let local = record("p1", 2_000).with_field("name", "local edit");
    h.store().create("patients", &local).unwrap();
    h.remote.seed("patients", vec![wire("p1", 1_000, "stale remote")]);

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    let patients = report.table("patients").unwrap();
    assert_eq!(patients.unchanged, 1);
    assert_eq!(patients.updated, 0);
    assert_eq!(h.store().get("patients", &id("p1")).unwrap().unwrap(), local);

    let pushed = h.remote.get("patients", "p1").unwrap();
    assert_eq!(pushed["name"], "local edit");
    assert_eq!(pushed["updatedAt"], Timestamp::from_millis(2_000).to_rfc3339());
}

#[tokio::test]
async fn newer_remote_record_overwrites_local_without_audit() {
    let h = harness(true);
    h.store().create("patients", &record("p1", 1_000)).unwrap();
    h.remote.seed("patients", vec![wire("p1", 5_000, "remote edit")]);

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();
    h.flush_audit().await;

    assert_eq!(report.table("patients").unwrap().updated, 1);
    let stored = h.store().get("patients", &id("p1")).unwrap().unwrap();
    assert_eq!(stored.updated_at, Timestamp::from_millis(5_000));
    assert_eq!(stored.get("name").and_then(FieldValue::as_str), Some("remote edit"));

    assert_eq!(h.store().audit_log_count().unwrap(), 0);
    assert_eq!(h.ctx.status.pending_changes(), 0);
}

#[tokio::test]
async fn equal_timestamps_keep_local_copy() {
    let h = harness(true);
    let local = record("p1", 3_000).with_field("name", "local");
    h.store().create("patients", &local).unwrap();
    h.remote.seed("patients", vec![wire("p1", 3_000, "remote")]);

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    assert_eq!(report.table("patients").unwrap().unchanged, 1);
    assert_eq!(h.store().get("patients", &id("p1")).unwrap().unwrap(), local);
}

#[tokio::test]
async fn missing_local_records_are_inserted() {
    let h = harness(true);
    h.remote.seed(
        "patients",
        vec![wire("p1", 1, "one"), wire("p2", 2, "two")],
    );

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();
    h.flush_audit().await;

    assert_eq!(report.table("patients").unwrap().inserted, 2);
    assert_eq!(h.store().count("patients").unwrap(), 2);
    assert_eq!(h.store().audit_log_count().unwrap(), 0);
}

// ── Batching ─────────────────────────────────────────────────────

#[tokio::test]
async fn push_splits_into_batches_of_fifty() {
    let h = harness(true);
    for n in 0..120 {
        h.store().create("patients", &record(&format!("p{n:03}"), n)).unwrap();
    }

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    assert_eq!(h.remote.batch_sizes("patients"), vec![50, 50, 20]);
    assert_eq!(report.table("patients").unwrap().pushed, 120);
    assert_eq!(h.remote.records("patients").len(), 120);
}

#[tokio::test]
async fn empty_table_sends_no_batches() {
    let h = harness(true);
    h.engine.run_pass(SyncScope::Full).await.unwrap();
    assert!(h.remote.batch_sizes("patients").is_empty());
}

#[tokio::test]
async fn failed_batch_does_not_stop_remaining_batches() {
    let h = harness(true);
    for n in 0..120 {
        h.store().create("patients", &record(&format!("p{n:03}"), n)).unwrap();
    }
    h.remote.fail_nth_batch("patients", 1);

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    let patients = report.table("patients").unwrap();
    assert_eq!(h.remote.batch_sizes("patients"), vec![50, 50, 20]);
    assert_eq!(patients.pushed, 70);
    assert_eq!(patients.failed_batches, 1);
    assert_eq!(h.remote.records("patients").len(), 70);

    // Later tables still ran.
    assert!(h.remote.pull_calls().contains(&"user_settings".to_string()));
    let error = h.ctx.status.snapshot().error.unwrap();
    assert!(error.contains("patients"), "{error}");
}

#[tokio::test]
async fn unreadable_local_row_does_not_block_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let h = harness_on(LocalStore::open(&path).unwrap(), true);
    for n in 0..5 {
        h.store().create("patients", &record(&format!("p{n}"), n)).unwrap();
    }
    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "INSERT INTO records (table_name, id, updated_at, data) VALUES ('patients', ' ', 9, '{}')",
        [],
    )
    .unwrap();

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    assert_eq!(report.table("patients").unwrap().pushed, 5);
    assert_eq!(h.remote.records("patients").len(), 5);
    assert!(report.is_success(), "{:?}", report.last_error());
}

#[tokio::test]
async fn push_sends_sanitized_values() {
    let h = harness(true);
    let taken_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
    let vitals = Record::new(id("v1"), Timestamp::from_millis(10))
        .with_field("takenAt", taken_at)
        .with_field("ecg", vec![1u8, 2, 3])
        .with_field("tags", FieldValue::Set(vec!["a".into(), "a".into(), "b".into()]));
    h.store().create("vital_signs", &vitals).unwrap();

    h.engine.run_pass(SyncScope::Full).await.unwrap();

    let pushed = h.remote.get("vitals", "v1").unwrap();
    assert_eq!(pushed["takenAt"], "2024-03-01T08:30:00.000Z");
    assert_eq!(pushed["ecg"], "AQID");
    assert_eq!(pushed["tags"], json!(["a", "b"]));
}

// ── Failure isolation ────────────────────────────────────────────

#[tokio::test]
async fn malformed_records_are_skipped() {
    let h = harness(true);
    h.remote.seed(
        "patients",
        vec![
            wire("good", 1, "fine"),
            json!({"name": "no id"}),
            json!({"id": "bad-ts", "updatedAt": "not a date"}),
            json!({"id": "no-ts"}),
        ],
    );

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    let patients = report.table("patients").unwrap();
    assert_eq!(patients.pulled, 4);
    assert_eq!(patients.inserted, 1);
    assert_eq!(patients.failed_records, 3);
    assert_eq!(h.store().count("patients").unwrap(), 1);
    assert!(h.store().get("patients", &id("good")).unwrap().is_some());
}

#[tokio::test]
async fn pull_failure_on_one_table_does_not_stop_the_next() {
    let h = harness_with_registry(two_table_registry(), true);
    h.remote.fail_pull("remote_x", "connection reset");
    h.remote.seed("remote_y", vec![wire("y1", 1, "why")]);
    h.store().create("x", &record("x1", 1)).unwrap();

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    assert_eq!(h.remote.pull_calls(), vec!["remote_x", "remote_y"]);
    assert!(h.store().get("y", &id("y1")).unwrap().is_some());
    // The failed table is still pushed.
    assert!(h.remote.get("remote_x", "x1").is_some());

    let state = h.ctx.status.snapshot();
    assert!(state.last_sync_at.is_some());
    let error = state.error.unwrap();
    assert!(error.contains("remote_x"), "{error}");
    assert!(!report.is_success());
}

#[tokio::test]
async fn unhealthy_remote_aborts_before_any_table() {
    let h = harness(true);
    h.remote.set_healthy(false);

    let report = h.engine.run_pass(SyncScope::Full).await.unwrap();

    assert!(report.aborted.is_some());
    assert!(report.tables.is_empty());
    assert!(h.remote.pull_calls().is_empty());

    let state = h.ctx.status.snapshot();
    assert!(!state.is_syncing);
    assert_eq!(state.last_sync_at, None);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn clean_pass_clears_previous_error() {
    let h = harness_with_registry(two_table_registry(), true);
    h.remote.fail_pull("remote_y", "boom");
    h.engine.run_pass(SyncScope::Full).await.unwrap();
    assert!(h.ctx.status.snapshot().error.is_some());

    h.remote.heal();
    h.engine.run_pass(SyncScope::Full).await.unwrap();
    assert_eq!(h.ctx.status.snapshot().error, None);
}

// ── Ordering & scope ─────────────────────────────────────────────

#[tokio::test]
async fn full_pass_follows_registry_order() {
    let h = harness(true);
    h.engine.run_pass(SyncScope::Full).await.unwrap();

    let expected: Vec<String> = TableRegistry::builtin()
        .sync_order()
        .iter()
        .map(|m| m.remote.to_string())
        .collect();
    assert_eq!(h.remote.pull_calls(), expected);
}

#[tokio::test]
async fn critical_pass_only_touches_critical_tables() {
    let h = harness(true);
    h.store().create("patients", &record("p1", 1)).unwrap();
    h.store().create("vital_signs", &record("v1", 1)).unwrap();

    let report = h.engine.run_pass(SyncScope::Critical).await.unwrap();

    assert_eq!(
        h.remote.pull_calls(),
        vec!["vitals", "assessments", "med_administrations"]
    );
    assert!(report.table("patients").is_none());
    assert!(h.remote.get("vitals", "v1").is_some());
    assert!(h.remote.get("patients", "p1").is_none());
}

// ── Idempotence ──────────────────────────────────────────────────

#[tokio::test]
async fn second_pass_changes_nothing() {
    let h = harness(true);
    h.remote.seed("patients", vec![wire("p1", 10, "remote")]);
    h.ctx
        .repository
        .create("encounters", &record("e1", 20))
        .unwrap();
    h.flush_audit().await;

    h.engine.run_pass(SyncScope::Full).await.unwrap();
    h.flush_audit().await;
    let audit_after_first = h.store().audit_log_count().unwrap();
    let patients_after_first = h.store().list("patients").unwrap();

    let second = h.engine.run_pass(SyncScope::Full).await.unwrap();
    h.flush_audit().await;

    assert_eq!(h.store().audit_log_count().unwrap(), audit_after_first);
    assert_eq!(h.store().list("patients").unwrap(), patients_after_first);
    for table in &second.tables {
        assert_eq!(table.inserted + table.updated, 0, "{} changed", table.table);
    }
}

// ── Audit entries travel like any other table ────────────────────

#[tokio::test]
async fn audit_entries_are_pushed() {
    let h = harness(true);
    h.ctx
        .repository
        .create("patients", &record("p1", 1))
        .unwrap();
    h.flush_audit().await;

    h.engine.run_pass(SyncScope::Full).await.unwrap();

    let entries = h.remote.records(AUDIT_LOG_TABLE);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["entityId"], "p1");
    assert_eq!(entries[0]["action"], "create");
}

// ── Immediate upsert ─────────────────────────────────────────────

#[tokio::test]
async fn immediate_upsert_reaches_remote() {
    let h = harness(true);
    let note = record("n1", 42).with_field("body", "pain 3/10");

    assert!(h.engine.upsert_record_immediate("clinical_notes", &note).await);

    assert_eq!(h.remote.upsert_calls(), vec!["notes"]);
    assert_eq!(h.remote.get("notes", "n1").unwrap()["body"], "pain 3/10");
}

#[tokio::test]
async fn immediate_upsert_rejects_unknown_table() {
    let h = harness(true);
    assert!(!h.engine.upsert_record_immediate("nope", &record("r", 1)).await);
    assert!(h.remote.upsert_calls().is_empty());
}

#[tokio::test]
async fn immediate_upsert_reports_failure() {
    let h = harness(true);
    h.remote.fail_push("patients", "503");
    assert!(!h.engine.upsert_record_immediate("patients", &record("p", 1)).await);
}

#[tokio::test]
async fn immediate_upsert_is_skipped_offline() {
    let h = harness(false);
    assert!(!h.engine.upsert_record_immediate("patients", &record("p", 1)).await);
    assert!(h.remote.upsert_calls().is_empty());
}

// ── Orchestrator used directly ───────────────────────────────────

#[tokio::test]
async fn apply_remote_reports_outcome() {
    use chartsync_sync::PullOutcome;

    let h = harness(true);
    let orchestrator = SyncOrchestrator::new(h.ctx.clone());

    let first = orchestrator
        .apply_remote("patients", wire("p1", 10, "a"))
        .await
        .unwrap();
    let older = orchestrator
        .apply_remote("patients", wire("p1", 5, "b"))
        .await
        .unwrap();
    let newer = orchestrator
        .apply_remote("patients", wire("p1", 20, "c"))
        .await
        .unwrap();

    assert_eq!(first, PullOutcome::Inserted);
    assert_eq!(older, PullOutcome::Unchanged);
    assert_eq!(newer, PullOutcome::Updated);
    let stored = h.store().get("patients", &id("p1")).unwrap().unwrap();
    assert_eq!(stored.get("name").and_then(FieldValue::as_str), Some("c"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_write_during_pull_is_never_overwritten_by_older_copy() {
    let h = harness(true);
    let orchestrator = SyncOrchestrator::new(h.ctx.clone());

    for n in 0..50 {
        let key = format!("p{n}");
        h.store().create("patients", &record(&key, 1_000)).unwrap();

        let repository = h.ctx.repository.clone();
        let local = record(&key, 3_000).with_field("name", "local edit");
        let write = tokio::task::spawn_blocking(move || repository.update("patients", &local));
        let pull = orchestrator.apply_remote("patients", wire(&key, 2_000, "remote"));
        let (write, pull) = tokio::join!(write, pull);
        write.unwrap().unwrap();
        pull.unwrap();

        let stored = h.store().get("patients", &id(&key)).unwrap().unwrap();
        assert_eq!(stored.updated_at, Timestamp::from_millis(3_000), "{key}");
        assert_eq!(stored.get("name").and_then(FieldValue::as_str), Some("local edit"));
    }
}

#[tokio::test]
async fn suppression_is_released_after_pull() {
    let h = harness(true);
    h.remote.seed("patients", vec![wire("p1", 1, "a")]);

    h.engine.run_pass(SyncScope::Full).await.unwrap();
    assert!(!h.ctx.audit.is_suppressed());

    h.ctx
        .repository
        .create("patients", &record("p2", 2))
        .unwrap();
    h.flush_audit().await;
    assert_eq!(h.store().audit_log_count().unwrap(), 1);
}
