//! # Profile Injector
//!
//! Turns the stored profile, ratings and interest flags into a
//! [`ScoringContext`]: a backend-agnostic description of what this reader
//! prefers. Building a context is pure; [`load_context`] wraps it with store
//! reads and never fails.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CurationSettings;
use crate::ingest::types::Article;
use crate::profile::interests::{InterestBook, InterestFlag};
use crate::profile::ratings::RatingBook;
use crate::profile::LearnedProfile;
use crate::scoring::source_weights::contains_term;
use crate::store::{keys, StateStore, StoreError};

const SOURCE_AFFINITY_PER_WEIGHT: f64 = 0.1;
const SOURCE_AFFINITY_CAP: f64 = 2.0;
const HOST_AFFINITY_PER_WEIGHT: f64 = 0.05;
const HOST_AFFINITY_CAP: f64 = 1.0;
const THEME_AFFINITY_PER_WEIGHT: f64 = 0.05;
const THEME_AFFINITY_CAP: f64 = 2.0;
const CONTENT_TYPE_AFFINITY_CAP: f64 = 0.5;
const AVOID_PENALTY_PER_COUNT: f64 = 0.5;
const AVOID_PENALTY_CAP: f64 = 3.0;
const RATING_STEP: f64 = 0.5;
const RATING_CAP: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Weighted {
    pub key: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringContext {
    pub domain: String,
    pub sample_size: u32,
    pub preferred_sources: Vec<Weighted>,
    pub preferred_themes: Vec<Weighted>,
    pub preferred_content_types: Vec<Weighted>,
    pub avoid: Vec<Weighted>,
    pub trusted_hosts: Vec<Weighted>,
    pub rating_boosts: Vec<Weighted>,
    pub rating_suppressions: Vec<Weighted>,
    pub interest_modifiers: BTreeMap<String, f64>,
}

fn weighted(pairs: Vec<(String, f64)>) -> Vec<Weighted> {
    pairs
        .into_iter()
        .map(|(key, weight)| Weighted { key, weight })
        .collect()
}

/// Build the context for one run.
pub fn build_context(
    profile: Option<&LearnedProfile>,
    ratings: &RatingBook,
    interests: &[InterestFlag],
    settings: &CurationSettings,
    now: DateTime<Utc>,
) -> ScoringContext {
    let mut ctx = ScoringContext {
        domain: settings.active_domain.clone(),
        ..ScoringContext::default()
    };

    if let Some(p) = profile {
        let view = p.view(settings, now);
        ctx.sample_size = view.sample_size;
        ctx.preferred_sources = weighted(view.sources);
        ctx.preferred_themes = weighted(view.themes);
        ctx.preferred_content_types = weighted(view.content_types);
        ctx.avoid = weighted(view.avoid);
        ctx.trusted_hosts = weighted(view.trusted_hosts);
    }

    if ratings.len() >= settings.min_ratings {
        let mut net: BTreeMap<String, f64> = BTreeMap::new();
        for r in ratings.iter() {
            let signal = r.signal();
            for theme in &r.derived_themes {
                *net.entry(theme.to_lowercase()).or_insert(0.0) += signal;
            }
            if let Some(src) = &r.source {
                *net.entry(src.clone()).or_insert(0.0) += signal;
            }
        }
        for (key, weight) in net {
            if weight > 0.0 {
                ctx.rating_boosts.push(Weighted { key, weight });
            } else if weight < 0.0 {
                ctx.rating_suppressions.push(Weighted {
                    key,
                    weight: -weight,
                });
            }
        }
        ctx.rating_boosts.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        ctx.rating_suppressions
            .sort_by(|a, b| b.weight.total_cmp(&a.weight));
    }

    let today = now.date_naive();
    for flag in interests.iter().filter(|f| f.is_active(today)) {
        *ctx.interest_modifiers
            .entry(flag.category.to_lowercase())
            .or_insert(0.0) += flag.modifier;
    }

    ctx
}

/// Read profile, ratings and runtime interest flags from the store and build
/// the context. Runtime flags stack with the configured `[[interests]]`.
///
/// Missing or corrupt state degrades to an empty context.
pub fn load_context(
    store: &dyn StateStore,
    settings: &CurationSettings,
    now: DateTime<Utc>,
) -> ScoringContext {
    let profile = read_or_warn::<LearnedProfile>(store, keys::PROFILE);
    let ratings = read_or_warn::<RatingBook>(store, keys::RATINGS).unwrap_or_default();
    let flagged = read_or_warn::<InterestBook>(store, keys::INTERESTS).unwrap_or_default();
    let mut interests = settings.interests.clone();
    interests.extend(flagged.flags().cloned());
    let ctx = build_context(profile.as_ref(), &ratings, &interests, settings, now);
    debug!(
        domain = %ctx.domain,
        sources = ctx.preferred_sources.len(),
        themes = ctx.preferred_themes.len(),
        boosts = ctx.rating_boosts.len(),
        "scoring context built"
    );
    ctx
}

fn read_or_warn<T: serde::de::DeserializeOwned>(store: &dyn StateStore, key: &str) -> Option<T> {
    match store.load(key) {
        Ok(Some(v)) => match serde_json::from_value(v.data) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(key, error = %e, "unreadable document; continuing without it");
                None
            }
        },
        Ok(None) => None,
        Err(StoreError::Corrupt { reason, .. }) => {
            warn!(key, reason = %reason, "corrupt document; continuing without it");
            None
        }
        Err(e) => {
            warn!(key, error = %e, "failed to read document; continuing without it");
            None
        }
    }
}

impl ScoringContext {
    pub fn is_empty(&self) -> bool {
        self.preferred_sources.is_empty()
            && self.preferred_themes.is_empty()
            && self.preferred_content_types.is_empty()
            && self.avoid.is_empty()
            && self.trusted_hosts.is_empty()
            && self.rating_boosts.is_empty()
            && self.rating_suppressions.is_empty()
            && self.interest_modifiers.is_empty()
    }

    /// Personalization adjustment for one article. Zero for an empty context.
    pub fn affinity(&self, article: &Article) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let text = article.text_lower();
        let category = article.category.as_deref().unwrap_or_default().to_lowercase();
        let matches = |key: &str| {
            let k = key.to_lowercase();
            k == category || contains_term(&text, &k)
        };
        let mut total = 0.0;

        if let Some(w) = self
            .preferred_sources
            .iter()
            .find(|w| w.key.eq_ignore_ascii_case(&article.source))
        {
            total += (w.weight * SOURCE_AFFINITY_PER_WEIGHT).min(SOURCE_AFFINITY_CAP);
        }

        if let Some(host) = article.host() {
            if let Some(w) = self.trusted_hosts.iter().find(|w| w.key == host) {
                total += (w.weight * HOST_AFFINITY_PER_WEIGHT).min(HOST_AFFINITY_CAP);
            }
        }

        let theme_bonus: f64 = self
            .preferred_themes
            .iter()
            .filter(|w| matches(&w.key))
            .map(|w| w.weight * THEME_AFFINITY_PER_WEIGHT)
            .sum();
        total += theme_bonus.min(THEME_AFFINITY_CAP);

        let type_bonus: f64 = self
            .preferred_content_types
            .iter()
            .filter(|w| contains_term(&text, &w.key.to_lowercase()))
            .map(|w| w.weight * THEME_AFFINITY_PER_WEIGHT)
            .sum();
        total += type_bonus.min(CONTENT_TYPE_AFFINITY_CAP);

        let avoid_penalty: f64 = self
            .avoid
            .iter()
            .filter(|w| contains_term(&text, &w.key.to_lowercase()))
            .map(|w| w.weight * AVOID_PENALTY_PER_COUNT)
            .sum();
        total -= avoid_penalty.min(AVOID_PENALTY_CAP);

        let rating_match = |w: &&Weighted| w.key.eq_ignore_ascii_case(&article.source) || matches(&w.key);
        let boosts = self.rating_boosts.iter().filter(rating_match).count() as f64;
        let suppressions = self.rating_suppressions.iter().filter(rating_match).count() as f64;
        total += (boosts * RATING_STEP).min(RATING_CAP);
        total -= (suppressions * RATING_STEP).min(RATING_CAP);

        if let Some(m) = self.interest_modifiers.get(&category) {
            total += m;
        }

        total
    }

    /// Text rendering of the context for model-backed scorers.
    pub fn prompt_block(&self) -> String {
        fn line(label: &str, items: &[Weighted]) -> Option<String> {
            if items.is_empty() {
                return None;
            }
            let body = items
                .iter()
                .map(|w| format!("{} ({:.1})", w.key, w.weight))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("{label}: {body}"))
        }

        if self.is_empty() {
            return String::new();
        }
        let mut lines = vec![format!("Reader domain: {}", self.domain)];
        lines.extend(
            [
                line("Preferred sources", &self.preferred_sources),
                line("Preferred themes", &self.preferred_themes),
                line("Preferred content types", &self.preferred_content_types),
                line("Trusted hosts", &self.trusted_hosts),
                line("Avoid", &self.avoid),
                line("Highly rated", &self.rating_boosts),
                line("Poorly rated", &self.rating_suppressions),
            ]
            .into_iter()
            .flatten(),
        );
        if !self.interest_modifiers.is_empty() {
            let body = self
                .interest_modifiers
                .iter()
                .map(|(k, v)| format!("{k} ({v:+.1})"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Current interests: {body}"));
        }
        lines.join("\n")
    }
}
