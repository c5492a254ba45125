// tests/run_e2e.rs
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use feed_curator::config::CurationSettings;
use feed_curator::ingest::types::{Article, RawItem};
use feed_curator::ledger::HistoryLedger;
use feed_curator::profile::injector::{load_context, ScoringContext};
use feed_curator::profile::LearnedProfile;
use feed_curator::run::{CurationRun, RunOptions};
use feed_curator::scoring::retry::CallPolicy;
use feed_curator::scoring::source_weights::SourceMultipliers;
use feed_curator::scoring::{
    BackendError, BackendKind, BackendScore, MechanicalScorer, ScoreDispatcher, ScoringBackend,
};
use feed_curator::store::{self, keys, FileStore, MemoryStore, StateStore, StoreError, Versioned};
use serde_json::Value;

const WORDS: [&str; 20] = [
    "amber", "birch", "cactus", "dune", "ferry", "granite", "harbor", "iris", "jasmine", "kelp",
    "lagoon", "maple", "nimbus", "opal", "pebble", "quill", "reef", "saffron", "thistle", "walnut",
];

const SLOW_DESK: &str = "Desk 7";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap()
}

/// 400 candidates over 40 desks. Every pair of titles differs in at least two
/// words. `Desk 7` publishes two days late; everyone else is fresh.
fn candidates() -> Vec<RawItem> {
    (0..400usize)
        .map(|i| {
            let (a, b) = (i % 20, (i / 20) % 20);
            let source = format!("Desk {}", i % 40);
            let published = if source == SLOW_DESK {
                now() - Duration::days(2)
            } else {
                now() - Duration::hours((i % 5) as i64)
            };
            RawItem {
                title: format!("{} {} {} notes", WORDS[a], WORDS[b], WORDS[(a + b) % 20]),
                url: format!("https://desk{}.test/items/{i}?utm_source=feed", i % 40),
                source,
                summary: Some(format!("<p>Item {i}</p>")),
                published_at: Some(published),
            }
        })
        .collect()
}

fn settings(root: &Path) -> CurationSettings {
    CurationSettings {
        state_dir: root.join("state"),
        preview_dir: root.join("preview"),
        seed: Some(11),
        ..CurationSettings::default()
    }
}

fn curation(store: Arc<dyn StateStore>, settings: &CurationSettings) -> CurationRun {
    let creds: HashMap<String, String> = HashMap::new();
    let dispatcher = ScoreDispatcher::from_settings(settings, &creds, now()).unwrap();
    CurationRun::new(store, Arc::new(settings.clone()), dispatcher)
}

fn opts(dry_run: bool) -> RunOptions {
    RunOptions {
        dry_run,
        now: now(),
        seed: None,
    }
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for e in entries.flatten() {
        let p = e.path();
        if p.is_dir() {
            out.extend(snapshot(&p));
        } else {
            out.insert(p.clone(), std::fs::read(&p).unwrap());
        }
    }
    out
}

#[tokio::test]
async fn live_run_ranks_twenty_and_commits_ledger_and_archive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let fs = Arc::new(FileStore::new(&cfg.state_dir));
    let run = curation(fs.clone(), &cfg);

    let out = run.execute(candidates(), opts(false)).await.unwrap();
    assert_eq!(out.articles.len(), 20);
    assert_eq!(out.articles.iter().filter(|a| a.serendipity).count(), 4);
    assert_eq!(out.stats.candidates, 400);
    assert_eq!(out.stats.ledger_created, 20);
    assert_eq!(out.report.served_by, "mechanical");
    assert_eq!(out.seed, 11);

    let (ledger, version) = store::load_or_default::<HistoryLedger>(fs.as_ref(), keys::LEDGER);
    assert_eq!(version, 1);
    assert_eq!(ledger.len(), 20);
    for r in &out.articles {
        let e = ledger.get(&r.hash_id).unwrap();
        assert_eq!(e.last_rank, Some(r.rank));
    }
    assert!(fs.document_path(&keys::archive(now().date_naive())).exists());
}

#[tokio::test]
async fn rerun_on_same_day_does_not_duplicate_appearances() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let fs = Arc::new(FileStore::new(&cfg.state_dir));
    let run = curation(fs.clone(), &cfg);

    let first = run.execute(candidates(), opts(false)).await.unwrap();
    let second = run.execute(candidates(), opts(false)).await.unwrap();
    assert_eq!(
        first.articles.iter().map(|a| &a.hash_id).collect::<Vec<_>>(),
        second.articles.iter().map(|a| &a.hash_id).collect::<Vec<_>>()
    );
    assert_eq!(second.articles[0].previous_appearances, 1);

    let (ledger, _) = store::load_or_default::<HistoryLedger>(fs.as_ref(), keys::LEDGER);
    assert!(ledger.entries.values().all(|e| e.appearances.len() == 1));
}

#[tokio::test]
async fn dry_run_leaves_state_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let fs = Arc::new(FileStore::new(&cfg.state_dir));
    let run = curation(fs.clone(), &cfg);

    run.execute(candidates(), opts(false)).await.unwrap();
    let before = snapshot(&cfg.state_dir);
    assert!(!before.is_empty());

    let out = run.execute(candidates(), opts(true)).await.unwrap();
    assert!(out.dry_run);
    assert_eq!(out.articles.len(), 20);
    assert_eq!(snapshot(&cfg.state_dir), before);

    let preview = out.preview_path.unwrap();
    assert!(preview.starts_with(&cfg.preview_dir));
    let body: serde_json::Value = serde_json::from_slice(&std::fs::read(&preview).unwrap()).unwrap();
    let listed = body["articles"].as_array().unwrap();
    assert_eq!(listed.len(), 20);
    assert_eq!(listed.iter().filter(|a| a["serendipity_flag"] == true).count(), 4);
}

#[tokio::test]
async fn reported_seed_reproduces_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CurationSettings {
        seed: None,
        ..settings(dir.path())
    };
    let fs = Arc::new(FileStore::new(&cfg.state_dir));
    let run = curation(fs.clone(), &cfg);

    let a = run.execute(candidates(), opts(true)).await.unwrap();
    let b = run
        .execute(
            candidates(),
            RunOptions {
                seed: Some(a.seed),
                ..opts(true)
            },
        )
        .await
        .unwrap();
    assert_eq!(a.articles, b.articles);
}

#[tokio::test]
async fn learned_source_preference_lifts_its_articles() {
    let top_from = |out: &feed_curator::run::RunOutput| {
        out.articles
            .iter()
            .filter(|a| !a.serendipity && a.source == SLOW_DESK)
            .count()
    };

    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let fs = Arc::new(FileStore::new(&cfg.state_dir));
    let baseline = curation(fs.clone(), &cfg).execute(candidates(), opts(true)).await.unwrap();
    assert_eq!(top_from(&baseline), 0);

    let mut profile = LearnedProfile::default();
    profile.sources.insert(SLOW_DESK.into(), 14.0);
    profile.sample_size = 7;
    profile.last_updated = Some(now());
    store::commit_typed(fs.as_ref(), keys::PROFILE, 0, &profile).unwrap();

    let personalized = curation(fs.clone(), &cfg).execute(candidates(), opts(true)).await.unwrap();
    assert_eq!(top_from(&personalized), cfg.max_per_source);
}

/// Fails every commit to keys starting with `prefix`.
struct FailingCommits {
    inner: Arc<MemoryStore>,
    prefix: &'static str,
}

impl StateStore for FailingCommits {
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        self.inner.load(key)
    }

    fn commit(&self, key: &str, expected: u64, data: &Value) -> Result<u64, StoreError> {
        if key.starts_with(self.prefix) {
            return Err(StoreError::LockTimeout { key: key.to_string() });
        }
        self.inner.commit(key, expected, data)
    }

    fn remove(&self, key: &str, expected: u64) -> Result<(), StoreError> {
        self.inner.remove(key, expected)
    }

    fn append_line(&self, key: &str, line: &Value) -> Result<(), StoreError> {
        self.inner.append_line(key, line)
    }

    fn read_lines(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        self.inner.read_lines(key)
    }
}

#[tokio::test]
async fn failed_archive_write_leaves_the_ledger_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let inner = Arc::new(MemoryStore::new());
    let failing = Arc::new(FailingCommits {
        inner: inner.clone(),
        prefix: "archive/",
    });

    let res = curation(failing, &cfg).execute(candidates(), opts(false)).await;
    assert!(res.is_err());
    assert!(inner.load(keys::LEDGER).unwrap().is_none());
}

#[tokio::test]
async fn failed_ledger_commit_removes_a_new_archive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let inner = Arc::new(MemoryStore::new());
    let failing = Arc::new(FailingCommits {
        inner: inner.clone(),
        prefix: keys::LEDGER,
    });

    let res = curation(failing, &cfg).execute(candidates(), opts(false)).await;
    assert!(res.is_err());
    assert!(inner.load(&keys::archive(now().date_naive())).unwrap().is_none());
    assert!(inner.load(keys::LEDGER).unwrap().is_none());
}

#[tokio::test]
async fn failed_ledger_commit_restores_the_earlier_archive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let inner = Arc::new(MemoryStore::new());
    curation(inner.clone(), &cfg).execute(candidates(), opts(false)).await.unwrap();

    let archive_key = keys::archive(now().date_naive());
    let archive_before = inner.load(&archive_key).unwrap().unwrap();
    let ledger_before = inner.load(keys::LEDGER).unwrap().unwrap();

    let failing = Arc::new(FailingCommits {
        inner: inner.clone(),
        prefix: keys::LEDGER,
    });
    let rerun = RunOptions {
        seed: Some(99),
        ..opts(false)
    };
    assert!(curation(failing, &cfg).execute(candidates(), rerun).await.is_err());

    assert_eq!(inner.load(&archive_key).unwrap().unwrap().data, archive_before.data);
    assert_eq!(inner.load(keys::LEDGER).unwrap().unwrap(), ledger_before);
}

/// A primary scorer that never answers in time.
struct Stalled {
    seen: Mutex<Vec<ScoringContext>>,
}

#[async_trait::async_trait]
impl ScoringBackend for Stalled {
    fn kind(&self) -> BackendKind {
        BackendKind::PrimaryAi
    }

    fn name(&self) -> &str {
        "stalled_primary"
    }

    async fn score(
        &self,
        _batch: &[Article],
        ctx: &ScoringContext,
    ) -> Result<Vec<BackendScore>, BackendError> {
        self.seen.lock().unwrap().push(ctx.clone());
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn primary_timeout_still_ranks_a_full_briefing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = settings(dir.path());
    let fs = Arc::new(FileStore::new(&cfg.state_dir));

    let mut profile = LearnedProfile::default();
    profile.sources.insert(SLOW_DESK.into(), 14.0);
    profile.sample_size = 7;
    profile.last_updated = Some(now());
    store::commit_typed(fs.as_ref(), keys::PROFILE, 0, &profile).unwrap();

    let stalled = Arc::new(Stalled {
        seen: Mutex::new(Vec::new()),
    });
    let primary: Arc<dyn ScoringBackend> = stalled.clone();
    let dispatcher = ScoreDispatcher::new(
        vec![primary],
        Arc::new(MechanicalScorer::new(SourceMultipliers::default(), now())),
        CallPolicy {
            timeout: StdDuration::from_millis(50),
            max_retries: 1,
            backoff_base_ms: 1,
        },
    );
    let run = CurationRun::new(fs.clone(), Arc::new(cfg.clone()), dispatcher);

    let out = run.execute(candidates(), opts(false)).await.unwrap();
    assert_eq!(out.articles.len(), 20);
    assert_eq!(
        out.articles.iter().map(|a| a.rank).collect::<Vec<_>>(),
        (1..=20).collect::<Vec<_>>()
    );
    assert_eq!(out.articles.iter().filter(|a| a.serendipity).count(), 4);
    assert_eq!(out.report.served_by, "mechanical");
    assert!(!out.report.fallbacks.is_empty());

    let expected = load_context(fs.as_ref(), &cfg, now());
    assert!(!expected.is_empty());
    let seen = stalled.seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|ctx| *ctx == expected));
}
