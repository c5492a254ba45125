//! Ranking Assembler: diversity filters, serendipity split, final ranks and
//! ledger metadata.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CurationSettings;
use crate::ingest::types::Article;
use crate::ledger::HistoryLedger;
use crate::ranking::serendipity;

/// One slot of the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArticle {
    pub rank: usize,
    pub hash_id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub category: Option<String>,
    pub score: f64,
    #[serde(rename = "serendipity_flag")]
    pub serendipity: bool,
    pub scored_by: Option<String>,
    pub rationale: Option<String>,
    /// Ledger metadata from before this run.
    pub first_seen: Option<NaiveDate>,
    pub previous_appearances: usize,
    pub last_rank: Option<usize>,
    #[serde(skip)]
    pub article: Option<Article>,
}

fn title_key(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Apply per-source cap and near-duplicate suppression, keeping score order.
/// If fewer than `n` survive, dropped items are re-admitted in score order.
fn diversity_filter(candidates: Vec<Article>, settings: &CurationSettings, n: usize) -> Vec<Article> {
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut kept_titles: Vec<String> = Vec::new();
    let mut keep = vec![false; candidates.len()];
    let mut kept = 0usize;

    for (i, a) in candidates.iter().enumerate() {
        let count = per_source.entry(a.source.to_lowercase()).or_insert(0);
        if *count >= settings.max_per_source {
            continue;
        }
        let key = title_key(&a.title);
        if kept_titles
            .iter()
            .any(|t| strsim::normalized_levenshtein(t, &key) >= settings.near_duplicate_threshold)
        {
            debug!(hash_id = %a.hash_id, "suppressing near-duplicate title");
            continue;
        }
        *count += 1;
        kept_titles.push(key);
        keep[i] = true;
        kept += 1;
    }

    if kept < n {
        for flag in keep.iter_mut().filter(|k| !**k) {
            if kept >= n {
                break;
            }
            *flag = true;
            kept += 1;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(a, k)| k.then_some(a))
        .collect()
}

/// Build the ordered output from dispatcher-ordered candidates.
///
/// Soft-deleted and repeated ids are dropped, diversity filters applied, the
/// serendipity split taken, then ranks 1..=N assigned: top in score order
/// followed by serendipity picks in score order.
pub fn assemble<R: Rng + ?Sized>(
    scored: Vec<Article>,
    ledger: &HistoryLedger,
    settings: &CurationSettings,
    rng: &mut R,
) -> Vec<RankedArticle> {
    let n = settings.output_size;

    let mut seen = HashSet::new();
    let eligible: Vec<Article> = scored
        .into_iter()
        .filter(|a| !ledger.is_deleted(&a.hash_id))
        .filter(|a| seen.insert(a.hash_id.clone()))
        .collect();

    let filtered = diversity_filter(eligible, settings, n);
    let split = serendipity::select(filtered, settings.serendipity_reserve, n, rng);

    split
        .top
        .into_iter()
        .chain(split.picks)
        .enumerate()
        .map(|(i, a)| {
            let prior = ledger.get(&a.hash_id);
            RankedArticle {
                rank: i + 1,
                hash_id: a.hash_id.clone(),
                title: a.title.clone(),
                url: a.url.clone(),
                source: a.source.clone(),
                category: a.category.clone(),
                score: a.final_score,
                serendipity: a.serendipity,
                scored_by: a.scored_by.clone(),
                rationale: a.rationale.clone(),
                first_seen: prior.map(|e| e.first_seen),
                previous_appearances: prior.map(|e| e.appearances.len()).unwrap_or(0),
                last_rank: prior.and_then(|e| e.last_rank),
                article: Some(a),
            }
        })
        .collect()
}
