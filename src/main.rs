//! feed-curator: binary entrypoint
//! Runs one curation batch, records feedback, ratings and interest flags
//! from the command line, or serves the feedback API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_curator::api::{self, AppState};
use feed_curator::config::{CurationSettings, EnvCredentials, ScoringMode};
use feed_curator::feedback::{FeedbackEvent, FeedbackRecorder, FlagOutcome, RawFeedback};
use feed_curator::ingest::{self, providers::JsonFileSource, types::ContentSource};
use feed_curator::ledger::HistoryLedger;
use feed_curator::metrics::Metrics;
use feed_curator::profile::interests::InterestPriority;
use feed_curator::profile::ratings::RawRating;
use feed_curator::profile::LearnedProfile;
use feed_curator::run::{CurationRun, RunOptions};
use feed_curator::scoring::ScoreDispatcher;
use feed_curator::store::{self, keys, FileStore, StateStore};

#[derive(Parser, Debug)]
#[command(name = "feed-curator", version, about = "Personalized briefing curator")]
struct Cli {
    /// Settings file (overrides CURATION_CONFIG_PATH).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Knowledge domain to run under.
    #[arg(long, global = true)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score and rank candidates from one or more JSON dumps.
    Run {
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        mode: Option<ScoringMode>,
        /// Compute everything, commit nothing; write a preview file.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        seed: Option<u64>,
        /// Also write the ranked output here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Record a like/save/dislike for an article.
    Feedback {
        /// Hash id, YYYY-MM-DD-N or yesterday-N.
        reference: String,
        #[arg(long)]
        action: String,
        #[arg(long = "theme")]
        themes: Vec<String>,
        #[arg(long = "content-type")]
        content_types: Vec<String>,
        #[arg(long = "avoid")]
        avoid: Vec<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        event_id: Option<String>,
    },
    /// Rate a deep analysis 1–4 stars.
    Rate {
        reference: String,
        #[arg(long)]
        stars: u8,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Flag an article's category as a temporary interest.
    Flag {
        reference: String,
        /// deep-dive, this-week, backlog or mute.
        #[arg(long)]
        priority: InterestPriority,
        #[arg(long)]
        note: Option<String>,
    },
    /// Print the gated, decayed profile view.
    Profile,
    /// Resolve a reference to a hash id.
    Resolve { reference: String },
    /// Soft-delete an article (or restore / purge it).
    Forget {
        reference: String,
        #[arg(long, conflicts_with = "purge")]
        restore: bool,
        #[arg(long)]
        purge: bool,
    },
    /// Serve the feedback API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

/// JSON logs when CURATOR_LOG_FORMAT=json, compact otherwise. Always on stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_curator=info,warn"));
    let json = std::env::var("CURATOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn load_settings(cli: &Cli) -> Result<CurationSettings> {
    let mut settings = match &cli.config {
        Some(p) => {
            let mut s = CurationSettings::load_from(p)?;
            s.apply_env_overrides();
            s
        }
        None => CurationSettings::load()?,
    };
    if let Some(d) = &cli.domain {
        settings.active_domain = d.clone();
    }
    Ok(settings)
}

fn resolve(state: &dyn StateStore, reference: &str) -> Result<String> {
    let (ledger, _) = store::load_or_default::<HistoryLedger>(state, keys::LEDGER);
    ledger
        .resolve_reference(reference, Utc::now().date_naive())
        .with_context(|| format!("no live article matches '{reference}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli)?;
    if let Command::Run { mode: Some(m), .. } = &cli.command {
        settings.scoring.mode = *m;
    }
    settings.validate()?;

    let settings = Arc::new(settings);
    let state: Arc<dyn StateStore> = Arc::new(FileStore::new(&settings.state_dir));

    match cli.command {
        Command::Run {
            inputs,
            dry_run,
            seed,
            output,
            ..
        } => {
            let now = Utc::now();
            let dispatcher = ScoreDispatcher::from_settings(&settings, &EnvCredentials, now)?;
            info!(chain = ?dispatcher.chain_names(), mode = ?settings.scoring.mode, dry_run, "starting run");

            let sources: Vec<Box<dyn ContentSource>> = inputs
                .into_iter()
                .map(|p| Box::new(JsonFileSource::new(p)) as Box<dyn ContentSource>)
                .collect();
            let raw = ingest::collect(&sources).await;
            if raw.is_empty() {
                bail!("no candidates loaded from the given inputs");
            }

            let run = CurationRun::new(state.clone(), settings.clone(), dispatcher);
            let out = run.execute(raw, RunOptions { dry_run, now, seed }).await?;

            let rendered = serde_json::to_string_pretty(&out)?;
            if let Some(path) = output {
                std::fs::write(&path, &rendered)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            println!("{rendered}");
        }
        Command::Feedback {
            reference,
            action,
            themes,
            content_types,
            avoid,
            comment,
            event_id,
        } => {
            let hash_id = resolve(state.as_ref(), &reference)?;
            let event = FeedbackEvent::try_from(RawFeedback {
                event_id: event_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                hash_id,
                action,
                themes,
                content_types,
                avoid,
                comment,
                timestamp: None,
                channel: Some("cli".to_string()),
            })?;
            let recorder = FeedbackRecorder::new(state.clone(), settings.clone());
            let outcome = recorder.record(&event, Utc::now())?;
            println!("{}", outcome.as_str());
        }
        Command::Rate {
            reference,
            stars,
            comment,
        } => {
            let hash_id = resolve(state.as_ref(), &reference)?;
            let recorder = FeedbackRecorder::new(state.clone(), settings.clone());
            let outcome = recorder.record_rating(
                RawRating {
                    hash_id,
                    stars,
                    comment,
                },
                Utc::now(),
            )?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Command::Flag {
            reference,
            priority,
            note,
        } => {
            let recorder = FeedbackRecorder::new(state.clone(), settings.clone());
            match recorder.flag_interest(&reference, priority, note, Utc::now())? {
                FlagOutcome::NotFound => bail!("no live article matches '{reference}'"),
                outcome => {
                    println!("{}", outcome.as_str());
                    if let Some(f) = outcome.flagged() {
                        println!("{}", serde_json::to_string_pretty(&f.flag)?);
                    }
                }
            }
        }
        Command::Profile => {
            let (profile, _) = store::load_or_default::<LearnedProfile>(state.as_ref(), keys::PROFILE);
            let view = profile.view(&settings, Utc::now());
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Resolve { reference } => {
            println!("{}", resolve(state.as_ref(), &reference)?);
        }
        Command::Forget {
            reference,
            restore,
            purge,
        } => {
            let (ledger, _) = store::load_or_default::<HistoryLedger>(state.as_ref(), keys::LEDGER);
            // Deleted entries do not resolve positionally, so accept a raw id too.
            let hash_id = ledger
                .resolve_reference(&reference, Utc::now().date_naive())
                .or_else(|| ledger.get(reference.trim()).map(|e| e.hash_id.clone()))
                .with_context(|| format!("no article matches '{reference}'"))?;
            let changed = store::update::<HistoryLedger, bool, _>(state.as_ref(), keys::LEDGER, |l| {
                let changed = if purge {
                    l.purge(&hash_id).is_some()
                } else if restore {
                    l.restore(&hash_id)
                } else {
                    l.soft_delete(&hash_id)
                };
                (changed, changed)
            })?;
            println!("{hash_id}: {}", if changed { "updated" } else { "unchanged" });
        }
        Command::Serve { addr } => {
            let metrics = Metrics::init(settings.output_size, settings.serendipity_reserve)?;
            let app = api::router(AppState::new(state.clone(), settings.clone())).merge(metrics.router());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(%addr, "feedback API listening");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
