//! # Curation Run
//!
//! One batch run: normalize → context → score → assemble → commit.
//!
//! State is read fresh at the start and nothing is written until the ranked
//! output exists. A live run then writes the dated archive and commits the
//! ledger last (re-applying its upserts on a version conflict). If the ledger
//! commit fails the archive is put back as it was, so a failed run leaves no
//! trace. A dry run writes only a preview file under `preview_dir` and leaves
//! the store untouched.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::CurationSettings;
use crate::error::Result;
use crate::ingest::{normalize_batch, types::RawItem};
use crate::ledger::{HistoryLedger, UpsertOutcome};
use crate::profile::injector::load_context;
use crate::ranking::{assemble, RankedArticle};
use crate::scoring::{DispatchReport, ScoreDispatcher};
use crate::store::{self, keys, StateStore, StoreError, Versioned};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("curator_runs_total", "Completed curation runs by kind.");
        describe_gauge!("curator_run_last_ts", "Unix ts of the last completed run.");
        describe_gauge!("curator_run_candidates", "Candidates in the last run.");
    });
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub now: DateTime<Utc>,
    /// Overrides the configured seed.
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            now: Utc::now(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub candidates: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub ledger_created: usize,
    pub ledger_updated: usize,
    pub collisions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub domain: String,
    pub seed: u64,
    pub dry_run: bool,
    pub articles: Vec<RankedArticle>,
    pub report: DispatchReport,
    pub stats: RunStats,
    /// Where the dry-run preview was written.
    pub preview_path: Option<PathBuf>,
}

pub struct CurationRun {
    store: Arc<dyn StateStore>,
    settings: Arc<CurationSettings>,
    dispatcher: ScoreDispatcher,
}

impl CurationRun {
    pub fn new(
        store: Arc<dyn StateStore>,
        settings: Arc<CurationSettings>,
        dispatcher: ScoreDispatcher,
    ) -> Self {
        Self {
            store,
            settings,
            dispatcher,
        }
    }

    pub async fn execute(&self, raw: Vec<RawItem>, opts: RunOptions) -> Result<RunOutput> {
        ensure_metrics_described();
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = opts.now;
        let today = now.date_naive();

        let batch = normalize_batch(raw);
        let mut stats = RunStats {
            candidates: batch.articles.len(),
            filtered: batch.filtered,
            duplicates: batch.duplicates,
            ..RunStats::default()
        };
        gauge!("curator_run_candidates").set(stats.candidates as f64);

        let (mut ledger, _) = store::load_or_default::<HistoryLedger>(self.store.as_ref(), keys::LEDGER);
        let ctx = load_context(self.store.as_ref(), &self.settings, now);

        let (scored, report) = self.dispatcher.score(batch.articles, &ctx).await;

        let seed = match opts.seed.or(self.settings.seed) {
            Some(s) => s,
            None => {
                let s = rand::random::<u64>();
                info!(seed = s, "no serendipity seed configured; drew one");
                s
            }
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let articles = assemble(scored, &ledger, &self.settings, &mut rng);

        let mut output = RunOutput {
            run_id,
            generated_at: now,
            domain: self.settings.active_domain.clone(),
            seed,
            dry_run: opts.dry_run,
            articles,
            report,
            stats: RunStats::default(),
            preview_path: None,
        };

        if opts.dry_run {
            output.stats = stats;
            let path = self.write_preview(&output)?;
            output.preview_path = Some(path);
            counter!("curator_runs_total", "kind" => "dry").increment(1);
            info!(run_id = %output.run_id, items = output.articles.len(), "dry run complete; state untouched");
            return Ok(output);
        }

        // Counts against the ledger as read; the committed tally is checked below.
        let (created, updated, collisions) = record_appearances(&mut ledger, &output.articles, today);
        stats.ledger_created = created;
        stats.ledger_updated = updated;
        stats.collisions = collisions;
        output.stats = stats;

        let state = self.store.as_ref();
        let archive_key = keys::archive(today);
        let prior = match state.load(&archive_key) {
            Ok(prior) => prior,
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(key = %archive_key, reason = %reason, "replacing corrupt archive");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let prior_version = prior.as_ref().map_or(0, |p| p.version);
        let archived = store::commit_typed(state, &archive_key, prior_version, &output)?;

        let committed = store::update::<HistoryLedger, _, _>(state, keys::LEDGER, |ledger| {
            (true, record_appearances(ledger, &output.articles, today))
        });
        let (created, updated, collisions) = match committed {
            Ok(tally) => tally,
            Err(e) => {
                self.roll_back_archive(&archive_key, archived, prior);
                return Err(e.into());
            }
        };
        if (created, updated, collisions)
            != (output.stats.ledger_created, output.stats.ledger_updated, output.stats.collisions)
        {
            // Another writer touched the ledger in between; refresh the archived counts.
            output.stats.ledger_created = created;
            output.stats.ledger_updated = updated;
            output.stats.collisions = collisions;
            if let Err(e) = store::commit_typed(state, &archive_key, archived, &output) {
                warn!(key = %archive_key, error = %e, "archived ledger counts are stale");
            }
        }

        counter!("curator_runs_total", "kind" => "live").increment(1);
        gauge!("curator_run_last_ts").set(now.timestamp() as f64);
        info!(
            run_id = %output.run_id,
            items = output.articles.len(),
            served_by = %output.report.served_by,
            fallbacks = output.report.fallbacks.len(),
            created,
            updated,
            collisions,
            "run committed"
        );
        Ok(output)
    }

    fn roll_back_archive(&self, key: &str, written: u64, prior: Option<Versioned>) {
        let restored = match prior {
            Some(p) => self.store.commit(key, written, &p.data).map(|_| ()),
            None => self.store.remove(key, written),
        };
        match restored {
            Ok(()) => warn!(key, "ledger commit failed; archive rolled back"),
            Err(e) => error!(key, error = %e, "ledger commit failed and the archive could not be rolled back"),
        }
    }

    fn write_preview(&self, output: &RunOutput) -> Result<PathBuf> {
        let dir = &self.settings.preview_dir;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "preview-{}-{}.json",
            output.generated_at.format("%Y%m%dT%H%M%S"),
            &output.run_id[..8]
        ));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(output)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Upsert every ranked article; returns `(created, updated, collisions)`.
fn record_appearances(
    ledger: &mut HistoryLedger,
    articles: &[RankedArticle],
    today: chrono::NaiveDate,
) -> (usize, usize, usize) {
    let mut tally = (0usize, 0usize, 0usize);
    for r in articles {
        let Some(a) = r.article.as_ref() else {
            continue;
        };
        match ledger.upsert(a, r.rank, today) {
            UpsertOutcome::Created => tally.0 += 1,
            UpsertOutcome::Updated => tally.1 += 1,
            UpsertOutcome::Collision => tally.2 += 1,
        }
    }
    tally
}
