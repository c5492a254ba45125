// tests/ledger_history.rs
use chrono::NaiveDate;
use feed_curator::ingest::normalize_item;
use feed_curator::ingest::types::{Article, RawItem};
use feed_curator::ledger::{HistoryLedger, UpsertOutcome};

fn article(url: &str, title: &str) -> Article {
    let mut a = normalize_item(RawItem {
        title: title.into(),
        url: url.into(),
        source: "Alpha".into(),
        summary: None,
        published_at: None,
    })
    .unwrap();
    a.final_score = 6.5;
    a
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn appearances_accumulate_across_days() {
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "Gold climbs");
    assert_eq!(l.upsert(&a, 3, d("2026-02-01")), UpsertOutcome::Created);
    assert_eq!(l.upsert(&a, 1, d("2026-02-02")), UpsertOutcome::Updated);

    let e = l.get(&a.hash_id).unwrap();
    assert_eq!(e.first_seen, d("2026-02-01"));
    assert_eq!(e.appearances.len(), 2);
    assert_eq!(e.last_rank, Some(1));
}

#[test]
fn same_day_upsert_is_idempotent() {
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "Gold climbs");
    l.upsert(&a, 4, d("2026-02-01"));
    l.upsert(&a, 2, d("2026-02-01"));
    let e = l.get(&a.hash_id).unwrap();
    assert_eq!(e.appearances.len(), 1);
    assert_eq!(e.appearances[0].rank, 2);
}

#[test]
fn collision_never_overwrites_stored_entry() {
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "Original");
    l.upsert(&a, 1, d("2026-02-01"));

    // Force a different URL onto the same id.
    let mut b = article("https://b.test/other", "Impostor");
    b.hash_id = a.hash_id.clone();
    assert_eq!(l.upsert(&b, 1, d("2026-02-02")), UpsertOutcome::Collision);

    let e = l.get(&a.hash_id).unwrap();
    assert_eq!(e.title, "Original");
    assert_eq!(e.canonical_url, a.canonical_url);
    assert_eq!(e.collisions, vec![b.canonical_url.clone()]);
    assert_eq!(e.appearances.len(), 1);
}

#[test]
fn references_resolve_to_live_entries_only() {
    let today = d("2026-02-10");
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "One");
    let b = article("https://a.test/2", "Two");
    l.upsert(&a, 1, d("2026-02-09"));
    l.upsert(&b, 2, d("2026-02-09"));

    assert_eq!(l.resolve_reference("yesterday-2", today), Some(b.hash_id.clone()));
    assert_eq!(l.resolve_reference("2026-02-09-1", today), Some(a.hash_id.clone()));
    assert_eq!(l.resolve_reference(&a.hash_id, today), Some(a.hash_id.clone()));
    assert_eq!(l.resolve_reference("yesterday-7", today), None);

    l.soft_delete(&b.hash_id);
    assert_eq!(l.resolve_reference("yesterday-2", today), None);
    assert!(l.get(&b.hash_id).is_some());
}

#[test]
fn purge_is_the_only_hard_removal() {
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "One");
    l.upsert(&a, 1, d("2026-02-01"));
    l.soft_delete(&a.hash_id);
    assert_eq!(l.len(), 1);
    assert!(l.purge(&a.hash_id).is_some());
    assert!(l.is_empty());
}

#[test]
fn appearances_on_orders_by_rank() {
    let day = d("2026-02-01");
    let mut l = HistoryLedger::default();
    let a = article("https://a.test/1", "One");
    let b = article("https://a.test/2", "Two");
    l.upsert(&a, 2, day);
    l.upsert(&b, 1, day);
    let ranks: Vec<_> = l.appearances_on(day).into_iter().map(|(r, e)| (r, e.title.clone())).collect();
    assert_eq!(ranks, vec![(1, "Two".to_string()), (2, "One".to_string())]);
}
