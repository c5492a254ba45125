use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};
use crate::ledger::LedgerEntry;
use crate::scoring::source_weights::categorize;

/// An explicit, optionally expiring boost (or penalty) for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestFlag {
    pub category: String,
    pub modifier: f64,
    #[serde(default)]
    pub expires: Option<NaiveDate>,
    #[serde(default)]
    pub note: Option<String>,
}

impl InterestFlag {
    /// Active through the expiry date itself.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.expires.map_or(true, |exp| today <= exp)
    }
}

/// How strongly a flagged article's category should be pushed, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterestPriority {
    DeepDive,
    ThisWeek,
    Backlog,
    Mute,
}

impl InterestPriority {
    pub fn modifier(self) -> f64 {
        match self {
            InterestPriority::DeepDive => 5.0,
            InterestPriority::ThisWeek => 3.0,
            InterestPriority::Backlog => 1.0,
            InterestPriority::Mute => -2.0,
        }
    }

    /// `None` never expires.
    pub fn lifetime_days(self) -> Option<i64> {
        match self {
            InterestPriority::DeepDive => Some(3),
            InterestPriority::ThisWeek | InterestPriority::Mute => Some(7),
            InterestPriority::Backlog => None,
        }
    }
}

impl std::str::FromStr for InterestPriority {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "deep-dive" | "deepdive" => Ok(Self::DeepDive),
            "this-week" | "thisweek" => Ok(Self::ThisWeek),
            "backlog" => Ok(Self::Backlog),
            "mute" => Ok(Self::Mute),
            other => Err(CuratorError::invalid(format!("unknown priority '{other}'"))),
        }
    }
}

/// A flag raised on one article at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedArticle {
    pub hash_id: String,
    pub title: String,
    pub priority: InterestPriority,
    pub flag: InterestFlag,
    pub flagged_at: DateTime<Utc>,
}

impl FlaggedArticle {
    /// Derive the flag from the article's category; uncategorized entries
    /// fall back to the keyword rules on the title.
    pub fn new(
        entry: &LedgerEntry,
        priority: InterestPriority,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let category = entry
            .category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| categorize(&entry.title.to_lowercase()).to_string());
        let expires = priority
            .lifetime_days()
            .map(|d| now.date_naive() + Duration::days(d));
        Self {
            hash_id: entry.hash_id.clone(),
            title: entry.title.clone(),
            priority,
            flag: InterestFlag {
                category,
                modifier: priority.modifier(),
                expires,
                note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            },
            flagged_at: now,
        }
    }
}

/// Runtime flags, one per article; re-flagging replaces the earlier flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestBook {
    #[serde(default)]
    pub flagged: BTreeMap<String, FlaggedArticle>,
}

impl InterestBook {
    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Returns true when an earlier flag was replaced.
    pub fn upsert(&mut self, flagged: FlaggedArticle) -> bool {
        self.flagged.insert(flagged.hash_id.clone(), flagged).is_some()
    }

    /// Drop expired flags. Returns true if any were removed.
    pub fn prune(&mut self, today: NaiveDate) -> bool {
        let before = self.flagged.len();
        self.flagged.retain(|_, f| f.flag.is_active(today));
        self.flagged.len() != before
    }

    pub fn flags(&self) -> impl Iterator<Item = &InterestFlag> {
        self.flagged.values().map(|f| &f.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(category: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            hash_id: "1a2b3c4d".into(),
            canonical_url: "https://fx.test/yen".into(),
            title: "Central bank holds rates as inflation cools".into(),
            source: "FX Desk".into(),
            category: category.map(str::to_string),
            first_seen: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            appearances: Vec::new(),
            last_rank: Some(3),
            deleted: false,
            collisions: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn priorities_parse_loosely() {
        assert_eq!("DEEP-DIVE".parse::<InterestPriority>().unwrap(), InterestPriority::DeepDive);
        assert_eq!("this_week".parse::<InterestPriority>().unwrap(), InterestPriority::ThisWeek);
        assert!("urgent".parse::<InterestPriority>().is_err());
    }

    #[test]
    fn presets_set_modifier_and_expiry() {
        let f = FlaggedArticle::new(&entry(Some("Monetary")), InterestPriority::DeepDive, None, now());
        assert_eq!(f.flag.category, "monetary");
        assert_eq!(f.flag.modifier, 5.0);
        assert_eq!(f.flag.expires, NaiveDate::from_ymd_opt(2026, 3, 13));

        let mute = FlaggedArticle::new(&entry(Some("monetary")), InterestPriority::Mute, None, now());
        assert_eq!(mute.flag.modifier, -2.0);
        assert_eq!(mute.flag.expires, NaiveDate::from_ymd_opt(2026, 3, 17));

        let backlog = FlaggedArticle::new(&entry(Some("monetary")), InterestPriority::Backlog, None, now());
        assert_eq!(backlog.flag.expires, None);
    }

    #[test]
    fn prune_drops_only_expired_flags() {
        let mut book = InterestBook::default();
        book.upsert(FlaggedArticle::new(&entry(Some("monetary")), InterestPriority::DeepDive, None, now()));
        assert!(!book.prune(NaiveDate::from_ymd_opt(2026, 3, 13).unwrap()));
        assert!(book.prune(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()));
        assert!(book.is_empty());
    }
}
