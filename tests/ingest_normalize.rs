// tests/ingest_normalize.rs
use feed_curator::ingest::types::RawItem;
use feed_curator::ingest::{canonical_url, hash_id, normalize_batch, normalize_item, normalize_text};

fn raw(title: &str, url: &str, source: &str) -> RawItem {
    RawItem {
        title: title.into(),
        url: url.into(),
        source: source.into(),
        summary: None,
        published_at: None,
    }
}

#[test]
fn empty_is_ok() {
    assert_eq!(normalize_text(""), "");
}

#[test]
fn strips_html_and_unescapes() {
    let s = "<p>Hello&nbsp;<b>world</b> &ldquo;ok&rdquo;</p>";
    assert_eq!(normalize_text(s), r#"Hello world "ok""#);
}

#[test]
fn folds_whitespace_and_nbsp() {
    assert_eq!(normalize_text("A\u{00A0}\n\tB   C"), "A B C");
}

#[test]
fn tracking_params_do_not_change_identity() {
    let a = "https://www.example.com/markets/gold?utm_source=tw&utm_medium=social";
    let b = "https://www.example.com/markets/gold/#comments";
    let c = "https://WWW.EXAMPLE.COM/markets/gold?fbclid=xyz";
    assert_eq!(canonical_url(a), "https://www.example.com/markets/gold");
    assert_eq!(hash_id(a), hash_id(b));
    assert_eq!(hash_id(a), hash_id(c));
}

#[test]
fn meaningful_query_changes_identity() {
    assert_ne!(
        hash_id("https://example.com/story?id=1"),
        hash_id("https://example.com/story?id=2")
    );
}

#[test]
fn hash_id_is_stable_across_calls() {
    let u = "https://example.com/a";
    assert_eq!(hash_id(u), hash_id(u));
    assert_eq!(hash_id(u).len(), 8);
}

#[test]
fn summary_is_capped() {
    let mut item = raw("Long read", "https://example.com/long", "Blog");
    item.summary = Some("word ".repeat(1_000));
    let a = normalize_item(item).unwrap();
    assert_eq!(a.summary.chars().count(), 1_500);
}

#[test]
fn batch_filters_empty_and_dedups_same_story() {
    let items = vec![
        raw("Gold climbs", "https://a.test/gold?utm_campaign=x", "Alpha"),
        raw("Gold climbs (syndicated)", "https://a.test/gold", "Beta"),
        raw("   ", "https://a.test/blank", "Alpha"),
        raw("No link", "  ", "Alpha"),
        raw("Oil slips", "https://a.test/oil", "Alpha"),
    ];
    let batch = normalize_batch(items);
    assert_eq!(batch.articles.len(), 2);
    assert_eq!(batch.filtered, 2);
    assert_eq!(batch.duplicates, 1);
    // First occurrence wins.
    assert_eq!(batch.articles[0].source, "Alpha");
    assert_eq!(batch.articles[1].title, "Oil slips");
}

#[test]
fn article_host_drops_www() {
    let a = normalize_item(raw("T", "https://www.GPF.com/x", "GPF")).unwrap();
    assert_eq!(a.host().as_deref(), Some("gpf.com"));
}
