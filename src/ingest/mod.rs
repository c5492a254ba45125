// src/ingest/mod.rs
pub mod providers;
pub mod types;

use crate::ingest::types::{Article, ContentSource, RawItem};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{info, warn};

/// Length of the hex prefix used as `hash_id`.
pub const HASH_ID_LEN: usize = 8;

const SUMMARY_MAX_CHARS: usize = 1500;

/// Query parameters that never change what a URL points to.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref", "ref_src"];

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Raw items received from sources.");
        describe_counter!("ingest_kept_total", "Items kept after normalization.");
        describe_counter!(
            "ingest_filtered_total",
            "Items dropped for an empty title or URL."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Items dropped as same-batch duplicates of an earlier hash_id."
        );
        describe_counter!("ingest_source_errors_total", "Content source fetch errors.");
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when candidates were last normalized."
        );
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    out
}

/// Canonical form of a URL used for identity.
///
/// Lowercases scheme and host, drops fragment, default port, tracking
/// parameters (`utm_*` and friends) and a trailing slash on non-root paths,
/// and sorts the remaining query pairs. Unparsable input is only trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut u) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    u.set_fragment(None);

    let mut pairs: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = u.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        u.set_path(path.trim_end_matches('/'));
    }

    // `Url` already lowercases scheme/host and elides default ports.
    u.to_string()
}

/// Stable id: first [`HASH_ID_LEN`] hex chars of SHA-256 over the canonical URL.
pub fn hash_id(url: &str) -> String {
    let canon = canonical_url(url);
    let digest = Sha256::digest(canon.as_bytes());
    let mut hex = String::with_capacity(HASH_ID_LEN);
    for b in digest.iter().take(HASH_ID_LEN / 2) {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

/// Turn a raw item into an unscored article. `None` when title or URL is empty.
pub fn normalize_item(raw: RawItem) -> Option<Article> {
    let title = normalize_text(&raw.title);
    let url = raw.url.trim().to_string();
    if title.is_empty() || url.is_empty() {
        return None;
    }
    let canonical = canonical_url(&url);
    let mut summary = normalize_text(raw.summary.as_deref().unwrap_or_default());
    if summary.chars().count() > SUMMARY_MAX_CHARS {
        summary = summary.chars().take(SUMMARY_MAX_CHARS).collect();
    }
    Some(Article {
        hash_id: hash_id(&canonical),
        title,
        source: raw.source.trim().to_string(),
        url,
        canonical_url: canonical,
        summary,
        published_at: raw.published_at,
        category: None,
        raw_score: 0.0,
        final_score: 0.0,
        scored_by: None,
        rationale: None,
        serendipity: false,
    })
}

/// Result of normalizing one batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub articles: Vec<Article>,
    pub filtered: usize,
    pub duplicates: usize,
}

/// Normalize, filter and dedup a batch. The first occurrence of a hash_id wins.
pub fn normalize_batch(raw_items: Vec<RawItem>) -> NormalizedBatch {
    ensure_metrics_described();
    let total = raw_items.len();

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = NormalizedBatch::default();
    for raw in raw_items {
        let Some(article) = normalize_item(raw) else {
            out.filtered += 1;
            continue;
        };
        if !seen.insert(article.hash_id.clone()) {
            out.duplicates += 1;
            continue;
        }
        out.articles.push(article);
    }

    counter!("ingest_items_total").increment(total as u64);
    counter!("ingest_kept_total").increment(out.articles.len() as u64);
    counter!("ingest_filtered_total").increment(out.filtered as u64);
    counter!("ingest_dedup_total").increment(out.duplicates as u64);
    gauge!("ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

    out
}

/// Fetch from every source; a failing source is logged and skipped.
pub async fn collect(sources: &[Box<dyn ContentSource>]) -> Vec<RawItem> {
    ensure_metrics_described();
    let mut all = Vec::new();
    for src in sources {
        match src.fetch().await {
            Ok(items) => {
                info!(source = src.name(), count = items.len(), "fetched candidates");
                all.extend(items);
            }
            Err(e) => {
                counter!("ingest_source_errors_total").increment(1);
                warn!(source = src.name(), error = %e, "content source failed; skipping");
            }
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_and_strips() {
        let s = "  <p>Fed&nbsp;holds   <b>rates</b></p> \u{201C}steady\u{201D} ";
        assert_eq!(normalize_text(s), "Fed holds rates \"steady\"");
    }

    #[test]
    fn canonical_url_keeps_meaningful_query() {
        let c = canonical_url("https://Example.com:443/a/b/?utm_source=x&b=2&a=1#frag");
        assert_eq!(c, "https://example.com/a/b?a=1&b=2");
    }

    #[test]
    fn hash_id_is_eight_hex_chars() {
        let h = hash_id("https://example.com/story");
        assert_eq!(h.len(), HASH_ID_LEN);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
