//! Explicit 1–4 star ratings of deep analyses.
//!
//! One record per rated item; re-rating replaces the earlier record. Ratings
//! feed the injector as boosts (3–4 stars) or suppressions (1–2 stars).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};
use crate::ledger::LedgerEntry;
use crate::scoring::source_weights::matching_categories;

pub const MIN_STARS: u8 = 1;
pub const MAX_STARS: u8 = 4;
/// Ratings at or above this count as positive guidance.
pub const HIGH_STARS: u8 = 3;

const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub hash_id: String,
    pub stars: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub derived_themes: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub rated_at: DateTime<Utc>,
}

impl RatingRecord {
    /// Signed strength: 4★ → +2, 3★ → +1, 2★ → −1, 1★ → −2.
    pub fn signal(&self) -> f64 {
        match self.stars {
            s if s >= HIGH_STARS => f64::from(s - HIGH_STARS + 1),
            s => -f64::from(HIGH_STARS - s),
        }
    }
}

/// Payload accepted at the rating boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRating {
    pub hash_id: String,
    pub stars: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingBook {
    #[serde(default)]
    pub records: BTreeMap<String, RatingRecord>,
}

impl RatingBook {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace. Returns true when an earlier rating was replaced.
    pub fn upsert(&mut self, record: RatingRecord) -> bool {
        self.records.insert(record.hash_id.clone(), record).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RatingRecord> {
        self.records.values()
    }
}

pub fn validate_stars(stars: u8) -> Result<u8> {
    if (MIN_STARS..=MAX_STARS).contains(&stars) {
        Ok(stars)
    } else {
        Err(CuratorError::invalid(format!(
            "stars must be between {MIN_STARS} and {MAX_STARS}, got {stars}"
        )))
    }
}

/// Build a record for a ledger entry, deriving themes from its category,
/// its title and the comment.
pub fn build_record(raw: RawRating, entry: &LedgerEntry, now: DateTime<Utc>) -> Result<RatingRecord> {
    let stars = validate_stars(raw.stars)?;
    let comment = raw
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if comment
        .as_ref()
        .is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS)
    {
        return Err(CuratorError::invalid("comment is too long"));
    }

    let text = format!(
        "{} {}",
        entry.title,
        comment.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    let mut themes: Vec<String> = entry.category.iter().cloned().collect();
    for c in matching_categories(&text) {
        if !themes.iter().any(|t| t == c) {
            themes.push(c.to_string());
        }
    }

    Ok(RatingRecord {
        hash_id: entry.hash_id.clone(),
        stars,
        comment,
        derived_themes: themes,
        source: Some(entry.source.clone()),
        rated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stars_outside_range_are_rejected() {
        assert!(validate_stars(0).is_err());
        assert!(validate_stars(5).is_err());
        assert_eq!(validate_stars(4).unwrap(), 4);
    }

    #[test]
    fn signal_is_symmetric_around_three() {
        let mk = |stars| RatingRecord {
            hash_id: "x".into(),
            stars,
            comment: None,
            derived_themes: vec![],
            source: None,
            rated_at: Utc::now(),
        };
        assert_eq!(mk(4).signal(), 2.0);
        assert_eq!(mk(3).signal(), 1.0);
        assert_eq!(mk(2).signal(), -1.0);
        assert_eq!(mk(1).signal(), -2.0);
    }
}
