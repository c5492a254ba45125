//! # Scorer Dispatcher
//!
//! Drives an ordered chain of [`ScoringBackend`]s that always ends with the
//! mechanical scorer. Every backend receives the same [`ScoringContext`].
//!
//! - A backend that fails (after retries) hands over to the next one.
//! - Articles a backend leaves unscored are filled in mechanically.
//! - With a refinement backend configured, the top `shortlist_size`
//!   candidates are re-scored and blended as `w1·s1 + w2·s2`; if that pass
//!   fails the stage-1 scores stand. Shortlisted candidates come first in the
//!   output, the rest follow, each group sorted by score.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CredentialProvider, CurationSettings, ScoringMode};
use crate::error::{CuratorError, Result};
use crate::ingest::types::Article;
use crate::profile::injector::ScoringContext;
use crate::scoring::http::HttpScoringBackend;
use crate::scoring::mechanical::MechanicalScorer;
use crate::scoring::retry::{call_with_retry, CallPolicy};
use crate::scoring::source_weights::SourceMultipliers;
use crate::scoring::{BackendKind, BackendScore, ScoringBackend};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "curator_backend_failures_total",
            "Scoring backend calls that failed after retries."
        );
        describe_counter!(
            "curator_backend_fallbacks_total",
            "Times the dispatcher moved past a failed backend."
        );
        describe_counter!(
            "curator_gap_filled_total",
            "Articles scored mechanically because a backend skipped them."
        );
    });
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FallbackRecord {
    pub backend: String,
    pub kind: BackendKind,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefinementReport {
    pub backend: String,
    pub shortlisted: usize,
    pub rescored: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DispatchReport {
    /// Backend that produced the stage-1 scores.
    pub served_by: String,
    pub fallbacks: Vec<FallbackRecord>,
    pub gap_filled: usize,
    pub refinement: Option<RefinementReport>,
}

struct Refinement {
    backend: Arc<dyn ScoringBackend>,
    shortlist_size: usize,
    stage1_weight: f64,
    stage2_weight: f64,
}

#[derive(Clone)]
struct Scored {
    score: BackendScore,
    by: String,
}

pub struct ScoreDispatcher {
    chain: Vec<Arc<dyn ScoringBackend>>,
    refinement: Option<Refinement>,
    mechanical: Arc<MechanicalScorer>,
    policy: CallPolicy,
}

impl ScoreDispatcher {
    /// Build a dispatcher over `chain`; the mechanical scorer is appended
    /// unless the chain already ends with a mechanical backend.
    pub fn new(
        chain: Vec<Arc<dyn ScoringBackend>>,
        mechanical: Arc<MechanicalScorer>,
        policy: CallPolicy,
    ) -> Self {
        let mut chain = chain;
        if chain.last().map(|b| b.kind()) != Some(BackendKind::Mechanical) {
            chain.push(mechanical.clone());
        }
        Self {
            chain,
            refinement: None,
            mechanical,
            policy,
        }
    }

    pub fn with_refinement(
        mut self,
        backend: Arc<dyn ScoringBackend>,
        shortlist_size: usize,
        stage1_weight: f64,
        stage2_weight: f64,
    ) -> Self {
        self.refinement = Some(Refinement {
            backend,
            shortlist_size: shortlist_size.max(1),
            stage1_weight,
            stage2_weight,
        });
        self
    }

    /// Wire backends for the configured mode.
    pub fn from_settings(
        settings: &CurationSettings,
        credentials: &dyn CredentialProvider,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let multipliers = settings
            .source_weights_path
            .as_ref()
            .map(SourceMultipliers::load_from_file)
            .unwrap_or_default();
        let mechanical = Arc::new(MechanicalScorer::new(multipliers, now));
        let policy = CallPolicy::from_settings(settings);
        let s = &settings.scoring;

        let http = |kind: BackendKind| -> Result<Arc<dyn ScoringBackend>> {
            let endpoint = match kind {
                BackendKind::SecondaryAi => settings.backend.secondary.as_ref(),
                _ => settings.backend.primary.as_ref(),
            }
            .ok_or_else(|| {
                CuratorError::config(format!("no endpoint configured for {}", kind.as_str()))
            })?;
            Ok(Arc::new(HttpScoringBackend::from_settings(
                kind,
                endpoint,
                credentials,
                s.batch_size,
                s.concurrency,
            )?))
        };

        let dispatcher = match s.mode {
            ScoringMode::Mechanical => Self::new(Vec::new(), mechanical, policy),
            ScoringMode::Single => Self::new(vec![http(BackendKind::PrimaryAi)?], mechanical, policy),
            ScoringMode::TwoStage => {
                Self::new(vec![http(BackendKind::PrimaryAi)?], mechanical, policy).with_refinement(
                    http(BackendKind::SecondaryAi)?,
                    s.shortlist_size,
                    s.stage1_weight,
                    s.stage2_weight,
                )
            }
        };
        Ok(dispatcher)
    }

    /// Names of the stage-1 chain, in order.
    pub fn chain_names(&self) -> Vec<String> {
        self.chain.iter().map(|b| b.name().to_string()).collect()
    }

    /// Score every article. Always returns all of them.
    pub async fn score(
        &self,
        articles: Vec<Article>,
        ctx: &ScoringContext,
    ) -> (Vec<Article>, DispatchReport) {
        ensure_metrics_described();
        let mut report = DispatchReport::default();

        let stage1 = self.run_chain(&articles, ctx, &mut report).await;
        let mut scored: Vec<Article> = articles
            .into_iter()
            .zip(stage1)
            .map(|(mut a, s)| {
                let category = s
                    .score
                    .category
                    .or_else(|| a.category.take())
                    .unwrap_or_else(|| self.mechanical.category(&a));
                a.category = Some(category);
                a.raw_score = s.score.score;
                a.final_score = s.score.score;
                a.rationale = s.score.rationale;
                a.scored_by = Some(s.by);
                a
            })
            .collect();
        sort_desc(&mut scored);

        let Some(r) = &self.refinement else {
            return (scored, report);
        };

        let rest = scored.split_off(r.shortlist_size.min(scored.len()));
        let mut shortlist = scored;
        let refinement = self.refine(r, &mut shortlist, ctx).await;
        report.refinement = Some(refinement);
        sort_desc(&mut shortlist);
        shortlist.extend(rest);
        (shortlist, report)
    }

    async fn run_chain(
        &self,
        articles: &[Article],
        ctx: &ScoringContext,
        report: &mut DispatchReport,
    ) -> Vec<Scored> {
        for backend in &self.chain {
            let b: &dyn ScoringBackend = backend.as_ref();

            let (attempts, res) = if b.kind() == BackendKind::Mechanical {
                (1, b.score(articles, ctx).await)
            } else {
                call_with_retry(&self.policy, b.name(), move || b.score(articles, ctx)).await
            };

            match res {
                Ok(scores) => {
                    report.served_by = b.name().to_string();
                    if !report.fallbacks.is_empty() {
                        info!(served_by = b.name(), fallbacks = report.fallbacks.len(), "scored by fallback backend");
                    }
                    return self.fill_gaps(articles, ctx, scores, b.name(), report);
                }
                Err(e) => {
                    counter!("curator_backend_failures_total", "backend" => b.kind().as_str(), "reason" => e.label())
                        .increment(1);
                    counter!("curator_backend_fallbacks_total", "from" => b.kind().as_str()).increment(1);
                    warn!(backend = b.name(), attempts, error = %e, "scoring backend failed; falling back");
                    report.fallbacks.push(FallbackRecord {
                        backend: b.name().to_string(),
                        kind: b.kind(),
                        error: e.to_string(),
                        attempts,
                    });
                }
            }
        }

        // The chain ends with the mechanical scorer, which does not fail.
        report.served_by = self.mechanical.name().to_string();
        self.fill_gaps(articles, ctx, Vec::new(), self.mechanical.name(), report)
    }

    fn fill_gaps(
        &self,
        articles: &[Article],
        ctx: &ScoringContext,
        scores: Vec<BackendScore>,
        by: &str,
        report: &mut DispatchReport,
    ) -> Vec<Scored> {
        let mut slots: Vec<Option<Scored>> = vec![None; articles.len()];
        for s in scores {
            if s.index < slots.len() && slots[s.index].is_none() && s.score.is_finite() {
                let idx = s.index;
                slots[idx] = Some(Scored {
                    score: s,
                    by: by.to_string(),
                });
            }
        }

        let mut filled = 0usize;
        let out: Vec<Scored> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    filled += 1;
                    Scored {
                        score: self.mechanical.score_one(i, &articles[i], ctx),
                        by: self.mechanical.name().to_string(),
                    }
                })
            })
            .collect();

        if filled > 0 && by != self.mechanical.name() {
            counter!("curator_gap_filled_total").increment(filled as u64);
            warn!(backend = by, filled, "backend skipped articles; filled mechanically");
            report.gap_filled += filled;
        }
        out
    }

    async fn refine(
        &self,
        r: &Refinement,
        shortlist: &mut [Article],
        ctx: &ScoringContext,
    ) -> RefinementReport {
        let b: &dyn ScoringBackend = r.backend.as_ref();
        let batch: &[Article] = shortlist;
        let (attempts, res) =
            call_with_retry(&self.policy, b.name(), move || b.score(batch, ctx)).await;

        let mut report = RefinementReport {
            backend: b.name().to_string(),
            shortlisted: shortlist.len(),
            rescored: 0,
            error: None,
        };

        match res {
            Ok(scores) => {
                for s in scores {
                    let Some(a) = shortlist.get_mut(s.index) else {
                        continue;
                    };
                    if !s.score.is_finite() {
                        continue;
                    }
                    a.final_score = r.stage1_weight * a.raw_score + r.stage2_weight * s.score;
                    a.scored_by = Some(format!(
                        "{}+{}",
                        a.scored_by.as_deref().unwrap_or_default(),
                        b.name()
                    ));
                    if s.rationale.is_some() {
                        a.rationale = s.rationale;
                    }
                    report.rescored += 1;
                }
            }
            Err(e) => {
                counter!("curator_backend_failures_total", "backend" => b.kind().as_str(), "reason" => e.label())
                    .increment(1);
                warn!(backend = b.name(), attempts, error = %e, "refinement failed; keeping stage-1 scores");
                report.error = Some(e.to_string());
            }
        }
        report
    }
}

fn sort_desc(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
}
