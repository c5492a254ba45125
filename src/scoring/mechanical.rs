//! Rule-based scorer: recency, keyword hits and a source multiplier,
//! normalized to 0–10, plus the context's personalization affinity.
//!
//! Needs no network and cannot fail, so it terminates every fallback chain
//! and fills gaps left by partial backend responses.

use chrono::{DateTime, Utc};

use crate::ingest::types::Article;
use crate::profile::injector::ScoringContext;
use crate::scoring::source_weights::{categorize, keyword_hits, SourceMultipliers};
use crate::scoring::{BackendError, BackendKind, BackendScore, ScoringBackend};

/// Points for a brand-new article; loses `RECENCY_DECAY_PER_DAY` per day.
const RECENCY_MAX: f64 = 100.0;
const RECENCY_DECAY_PER_DAY: f64 = 10.0;
const KEYWORD_POINTS: f64 = 5.0;
/// Raw score that maps to 10.
const RAW_SCALE: f64 = 200.0;

pub struct MechanicalScorer {
    multipliers: SourceMultipliers,
    now: DateTime<Utc>,
}

impl MechanicalScorer {
    pub fn new(multipliers: SourceMultipliers, now: DateTime<Utc>) -> Self {
        Self { multipliers, now }
    }

    /// Base score in 0–10 before personalization.
    pub fn base_score(&self, article: &Article) -> f64 {
        let mut raw = 0.0;
        if let Some(published) = article.published_at {
            let age_days = (self.now - published).num_seconds().max(0) as f64 / 86_400.0;
            raw += (RECENCY_MAX - age_days * RECENCY_DECAY_PER_DAY).max(0.0);
        }
        raw += keyword_hits(&article.text_lower()) as f64 * KEYWORD_POINTS;
        raw *= self.multipliers.multiplier_for(&article.source);
        (raw / RAW_SCALE * 10.0).clamp(0.0, 10.0)
    }

    pub fn category(&self, article: &Article) -> String {
        categorize(&article.text_lower()).to_string()
    }

    /// Score one article; `index` is its position in the caller's batch.
    pub fn score_one(&self, index: usize, article: &Article, ctx: &ScoringContext) -> BackendScore {
        let mut categorized = article.clone();
        let category = article
            .category
            .clone()
            .unwrap_or_else(|| self.category(article));
        categorized.category = Some(category.clone());
        BackendScore {
            index,
            score: self.base_score(article) + ctx.affinity(&categorized),
            category: Some(category),
            rationale: None,
            dimensions: None,
        }
    }

    pub fn score_all(&self, batch: &[Article], ctx: &ScoringContext) -> Vec<BackendScore> {
        batch
            .iter()
            .enumerate()
            .map(|(i, a)| self.score_one(i, a, ctx))
            .collect()
    }
}

#[async_trait::async_trait]
impl ScoringBackend for MechanicalScorer {
    fn kind(&self) -> BackendKind {
        BackendKind::Mechanical
    }

    fn name(&self) -> &str {
        "mechanical"
    }

    async fn score(
        &self,
        batch: &[Article],
        ctx: &ScoringContext,
    ) -> Result<Vec<BackendScore>, BackendError> {
        Ok(self.score_all(batch, ctx))
    }
}
