// tests/store_file.rs
use std::time::Duration;

use feed_curator::ledger::HistoryLedger;
use feed_curator::store::{self, keys, FileStore, StateStore, StoreError};
use serde_json::json;

#[test]
fn missing_document_loads_as_none_and_default() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    assert!(s.load("nothing").unwrap().is_none());
    let (ledger, v) = store::load_or_default::<HistoryLedger>(&s, keys::LEDGER);
    assert!(ledger.is_empty());
    assert_eq!(v, 0);
}

#[test]
fn stale_version_is_rejected_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    assert_eq!(s.commit("doc", 0, &json!({"n": 1})).unwrap(), 1);
    assert_eq!(s.commit("doc", 1, &json!({"n": 2})).unwrap(), 2);

    let err = s.commit("doc", 1, &json!({"n": 3})).unwrap_err();
    assert!(matches!(err, StoreError::Conflict { expected: 1, found: 2, .. }));
    assert_eq!(s.load("doc").unwrap().unwrap().data, json!({"n": 2}));
}

#[test]
fn corrupt_document_recovers_to_default_and_can_be_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    std::fs::write(s.document_path(keys::PROFILE), b"{ not json").unwrap();

    assert!(matches!(s.load(keys::PROFILE), Err(StoreError::Corrupt { .. })));
    let (doc, v) = store::load_or_default::<serde_json::Value>(&s, keys::PROFILE);
    assert_eq!((doc, v), (serde_json::Value::Null, 0));

    assert_eq!(s.commit(keys::PROFILE, 0, &json!({"sources": {}})).unwrap(), 1);
    assert_eq!(s.load(keys::PROFILE).unwrap().unwrap().version, 1);
}

#[test]
fn update_reapplies_after_external_write() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    let mut first_try = true;
    let n = store::update::<Vec<u32>, usize, _>(&s, "list", |v| {
        if first_try {
            first_try = false;
            // Someone else commits between our read and our write.
            s.commit("list", 0, &json!([7])).unwrap();
        }
        v.push(1);
        (true, v.len())
    })
    .unwrap();
    assert_eq!(n, 2);
    assert_eq!(s.load("list").unwrap().unwrap().data, json!([7, 1]));
}

#[test]
fn append_only_log_skips_garbage_lines() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    s.append_line("events", &json!({"a": 1})).unwrap();
    s.append_line("events", &json!({"a": 2})).unwrap();
    let mut raw = std::fs::read_to_string(s.log_path("events")).unwrap();
    raw.push_str("garbage\n");
    std::fs::write(s.log_path("events"), raw).unwrap();

    let lines = s.read_lines("events").unwrap();
    assert_eq!(lines, vec![json!({"a": 1}), json!({"a": 2})]);
}

#[test]
fn held_lock_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path()).with_lock_timeout(Duration::from_millis(50));
    std::fs::write(s.document_path("busy").with_extension("lock"), b"").unwrap();
    let err = s.commit("busy", 0, &json!(1)).unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
}

#[test]
fn archive_keys_nest_under_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    let key = keys::archive(chrono::NaiveDate::from_ymd_opt(2026, 7, 4).unwrap());
    assert_eq!(key, "archive/2026-07-04");
    s.commit(&key, 0, &json!({"articles": []})).unwrap();
    assert!(dir.path().join("archive").join("2026-07-04.json").exists());
}

#[test]
fn abandoned_lock_is_broken_once() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path()).with_lock_timeout(Duration::from_millis(200));
    let lock = s.document_path("doc").with_extension("lock");
    let f = std::fs::File::create(&lock).unwrap();
    f.set_modified(std::time::SystemTime::now() - Duration::from_secs(120))
        .unwrap();
    drop(f);

    assert_eq!(s.commit("doc", 0, &json!({"n": 1})).unwrap(), 1);
    assert!(!lock.exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().contains("stale"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn remove_checks_the_version() {
    let dir = tempfile::tempdir().unwrap();
    let s = FileStore::new(dir.path());
    s.commit("doc", 0, &json!(1)).unwrap();
    s.commit("doc", 1, &json!(2)).unwrap();

    assert!(matches!(s.remove("doc", 1), Err(StoreError::Conflict { found: 2, .. })));
    s.remove("doc", 2).unwrap();
    assert!(s.load("doc").unwrap().is_none());
    s.remove("doc", 0).unwrap();
}
