//! ledger.rs: cross-run identity and appearance history, keyed by `hash_id`.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ingest::types::Article;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub date: NaiveDate,
    pub rank: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub hash_id: String,
    pub canonical_url: String,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub category: Option<String>,
    pub first_seen: NaiveDate,
    #[serde(default)]
    pub appearances: Vec<Appearance>,
    #[serde(default)]
    pub last_rank: Option<usize>,
    #[serde(default)]
    pub deleted: bool,
    /// Other canonical URLs that hashed to this id.
    #[serde(default)]
    pub collisions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// The id is held by a different URL; the entry was left untouched.
    Collision,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryLedger {
    #[serde(default)]
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl HistoryLedger {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(hash_id)
    }

    /// Entry that is present and not soft-deleted.
    pub fn live(&self, hash_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(hash_id).filter(|e| !e.deleted)
    }

    pub fn is_deleted(&self, hash_id: &str) -> bool {
        self.entries.get(hash_id).is_some_and(|e| e.deleted)
    }

    /// Record that `article` appeared at `rank` on `date`.
    ///
    /// A second sighting on the same date overwrites that date's appearance.
    pub fn upsert(&mut self, article: &Article, rank: usize, date: NaiveDate) -> UpsertOutcome {
        let appearance = Appearance {
            date,
            rank,
            score: article.final_score,
        };

        let Some(entry) = self.entries.get_mut(&article.hash_id) else {
            self.entries.insert(
                article.hash_id.clone(),
                LedgerEntry {
                    hash_id: article.hash_id.clone(),
                    canonical_url: article.canonical_url.clone(),
                    title: article.title.clone(),
                    source: article.source.clone(),
                    category: article.category.clone(),
                    first_seen: date,
                    appearances: vec![appearance],
                    last_rank: Some(rank),
                    deleted: false,
                    collisions: Vec::new(),
                },
            );
            return UpsertOutcome::Created;
        };

        if entry.canonical_url != article.canonical_url {
            if !entry.collisions.contains(&article.canonical_url) {
                entry.collisions.push(article.canonical_url.clone());
            }
            counter!("curator_ledger_collisions_total").increment(1);
            warn!(
                hash_id = %article.hash_id,
                stored = %entry.canonical_url,
                incoming = %article.canonical_url,
                "hash_id collision; keeping stored entry"
            );
            return UpsertOutcome::Collision;
        }

        match entry.appearances.iter_mut().find(|a| a.date == date) {
            Some(existing) => *existing = appearance,
            None => entry.appearances.push(appearance),
        }
        entry.last_rank = Some(rank);
        entry.title = article.title.clone();
        if article.category.is_some() {
            entry.category = article.category.clone();
        }
        UpsertOutcome::Updated
    }

    /// Hide an entry from runs and feedback. Returns false when unknown.
    pub fn soft_delete(&mut self, hash_id: &str) -> bool {
        self.set_deleted(hash_id, true)
    }

    pub fn restore(&mut self, hash_id: &str) -> bool {
        self.set_deleted(hash_id, false)
    }

    fn set_deleted(&mut self, hash_id: &str, deleted: bool) -> bool {
        match self.entries.get_mut(hash_id) {
            Some(e) if e.deleted != deleted => {
                e.deleted = deleted;
                true
            }
            _ => false,
        }
    }

    /// The only hard removal.
    pub fn purge(&mut self, hash_id: &str) -> Option<LedgerEntry> {
        self.entries.remove(hash_id)
    }

    /// Resolve a hash id, `YYYY-MM-DD-N`, `today-N` or `yesterday-N` to a live hash id.
    pub fn resolve_reference(&self, reference: &str, today: NaiveDate) -> Option<String> {
        let r = reference.trim();
        if let Some(e) = self.live(r) {
            return Some(e.hash_id.clone());
        }

        let (date, rank) = parse_positional(r, today)?;
        self.entries
            .values()
            .filter(|e| !e.deleted)
            .find(|e| e.appearances.iter().any(|a| a.date == date && a.rank == rank))
            .map(|e| e.hash_id.clone())
    }

    /// Entries that appeared on `date`, ordered by rank.
    pub fn appearances_on(&self, date: NaiveDate) -> Vec<(usize, &LedgerEntry)> {
        let mut out: Vec<(usize, &LedgerEntry)> = self
            .entries
            .values()
            .filter_map(|e| {
                e.appearances
                    .iter()
                    .find(|a| a.date == date)
                    .map(|a| (a.rank, e))
            })
            .collect();
        out.sort_by_key(|(rank, _)| *rank);
        out
    }
}

fn parse_positional(r: &str, today: NaiveDate) -> Option<(NaiveDate, usize)> {
    static RE_DATED: OnceCell<Regex> = OnceCell::new();
    let re = RE_DATED.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})-(\d+)$").unwrap());

    let lower = r.to_ascii_lowercase();
    if let Some(n) = lower.strip_prefix("yesterday-") {
        let rank = n.parse().ok()?;
        return Some((today - Duration::days(1), rank));
    }
    if let Some(n) = lower.strip_prefix("today-") {
        let rank = n.parse().ok()?;
        return Some((today, rank));
    }
    let caps = re.captures(&lower)?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let rank = caps[2].parse().ok()?;
    Some((date, rank))
}
