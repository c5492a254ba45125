//! # Feedback Recorder
//!
//! Parses reactions once at the boundary into a tagged [`Reaction`] and
//! applies them to the learned profile exactly once per `event_id`.
//!
//! Order of operations for [`FeedbackRecorder::record`]:
//! 1. resolve `hash_id` in the ledger (unknown or soft-deleted → `NotFound`)
//! 2. check-and-insert `event_id` into the processed set (seen → `Duplicate`)
//! 3. apply the weight delta to the profile
//! 4. append an audit line to the feedback history
//!
//! Once step 3 has committed the event is `Accepted`. A history append that
//! fails at step 4 parks the row in a backlog document, and parked rows are
//! appended ahead of the next accepted event's row.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::CurationSettings;
use crate::error::{CuratorError, Result};
use crate::ledger::{HistoryLedger, LedgerEntry};
use crate::profile::interests::{FlaggedArticle, InterestBook, InterestPriority};
use crate::profile::ratings::{build_record, RatingBook, RawRating};
use crate::profile::{normalize_key, LearnedProfile, WeightDelta};
use crate::store::{self, keys, StateStore};

const MAX_COMMENT_CHARS: usize = 2000;
const MAX_TAGS: usize = 16;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("curator_feedback_total", "Feedback events by outcome.");
        describe_counter!("curator_ratings_total", "Ratings by outcome.");
        describe_counter!("curator_interest_flags_total", "Interest flags by outcome.");
        describe_counter!(
            "curator_feedback_history_parked_total",
            "History rows parked after a failed append."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Save,
    Dislike,
}

impl ReactionKind {
    /// Weight added to every key the reaction touches.
    pub fn weight(self) -> f64 {
        match self {
            ReactionKind::Like => 2.0,
            ReactionKind::Save => 1.0,
            ReactionKind::Dislike => -1.0,
        }
    }
}

impl std::str::FromStr for ReactionKind {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" | "👍" => Ok(Self::Like),
            "save" | "bookmark" | "🔖" => Ok(Self::Save),
            "dislike" | "👎" => Ok(Self::Dislike),
            other => Err(CuratorError::invalid(format!("unknown action '{other}'"))),
        }
    }
}

/// Validated extra signals attached to a reaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Signals {
    pub themes: Vec<String>,
    pub content_types: Vec<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Like(Signals),
    Save(Signals),
    Dislike { signals: Signals, avoid: Vec<String> },
}

impl Reaction {
    pub fn kind(&self) -> ReactionKind {
        match self {
            Reaction::Like(_) => ReactionKind::Like,
            Reaction::Save(_) => ReactionKind::Save,
            Reaction::Dislike { .. } => ReactionKind::Dislike,
        }
    }

    pub fn signals(&self) -> &Signals {
        match self {
            Reaction::Like(s) | Reaction::Save(s) => s,
            Reaction::Dislike { signals, .. } => signals,
        }
    }

    pub fn avoid(&self) -> &[String] {
        match self {
            Reaction::Dislike { avoid, .. } => avoid,
            _ => &[],
        }
    }
}

/// Payload as received at the interaction boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeedback {
    pub event_id: String,
    pub hash_id: String,
    pub action: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub avoid: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub event_id: String,
    pub hash_id: String,
    pub reaction: Reaction,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
}

fn clean_tags(tags: Vec<String>, what: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for t in tags {
        let k = normalize_key(&t);
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    if out.len() > MAX_TAGS {
        return Err(CuratorError::invalid(format!(
            "too many {what} (max {MAX_TAGS})"
        )));
    }
    Ok(out)
}

impl TryFrom<RawFeedback> for FeedbackEvent {
    type Error = CuratorError;

    fn try_from(raw: RawFeedback) -> Result<Self> {
        let event_id = raw.event_id.trim().to_string();
        if event_id.is_empty() {
            return Err(CuratorError::invalid("event_id is required"));
        }
        let hash_id = raw.hash_id.trim().to_ascii_lowercase();
        if hash_id.is_empty() {
            return Err(CuratorError::invalid("hash_id is required"));
        }
        let kind: ReactionKind = raw.action.parse()?;

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
        let signals = Signals {
            themes: clean_tags(raw.themes, "themes")?,
            content_types: clean_tags(raw.content_types, "content types")?,
            comment,
        };
        let avoid = clean_tags(raw.avoid, "avoid tags")?;
        if !avoid.is_empty() && kind != ReactionKind::Dislike {
            return Err(CuratorError::invalid("avoid tags are only valid on a dislike"));
        }

        let reaction = match kind {
            ReactionKind::Like => Reaction::Like(signals),
            ReactionKind::Save => Reaction::Save(signals),
            ReactionKind::Dislike => Reaction::Dislike { signals, avoid },
        };

        Ok(FeedbackEvent {
            event_id,
            hash_id,
            reaction,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            channel: raw
                .channel
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Accepted,
    Duplicate,
    NotFound,
}

impl FeedbackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackOutcome::Accepted => "accepted",
            FeedbackOutcome::Duplicate => "duplicate",
            FeedbackOutcome::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingOutcome {
    Recorded,
    Replaced,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome {
    Flagged(FlaggedArticle),
    /// The article already carried a flag; this one replaced it.
    Replaced(FlaggedArticle),
    NotFound,
}

impl FlagOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagOutcome::Flagged(_) => "flagged",
            FlagOutcome::Replaced(_) => "replaced",
            FlagOutcome::NotFound => "not_found",
        }
    }

    pub fn flagged(&self) -> Option<&FlaggedArticle> {
        match self {
            FlagOutcome::Flagged(f) | FlagOutcome::Replaced(f) => Some(f),
            FlagOutcome::NotFound => None,
        }
    }
}

/// Processed event ids with the time they were first seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedEvents {
    #[serde(default)]
    pub ids: BTreeMap<String, DateTime<Utc>>,
}

impl ProcessedEvents {
    /// Drop ids older than the retention window. Returns true if any were removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: i64) -> bool {
        let cutoff = now - Duration::days(retention_days);
        let before = self.ids.len();
        self.ids.retain(|_, seen| *seen >= cutoff);
        self.ids.len() != before
    }
}

/// One audit row in the append-only feedback history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackHistoryEntry {
    pub event_id: String,
    pub hash_id: String,
    pub action: ReactionKind,
    pub channel: String,
    pub source: String,
    pub themes: Vec<String>,
    pub content_types: Vec<String>,
    pub avoid: Vec<String>,
    pub delta: f64,
    pub domain: String,
    pub event_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

pub struct FeedbackRecorder {
    store: Arc<dyn StateStore>,
    settings: Arc<CurationSettings>,
}

impl FeedbackRecorder {
    pub fn new(store: Arc<dyn StateStore>, settings: Arc<CurationSettings>) -> Self {
        Self { store, settings }
    }

    fn resolve(&self, hash_id: &str) -> Option<LedgerEntry> {
        let (ledger, _) = store::load_or_default::<HistoryLedger>(self.store.as_ref(), keys::LEDGER);
        ledger.live(hash_id).cloned()
    }

    /// Apply one feedback event. Store failures are the only errors.
    pub fn record(&self, event: &FeedbackEvent, now: DateTime<Utc>) -> Result<FeedbackOutcome> {
        ensure_metrics_described();
        let state = self.store.as_ref();

        let Some(entry) = self.resolve(&event.hash_id) else {
            counter!("curator_feedback_total", "outcome" => "not_found").increment(1);
            warn!(hash_id = %event.hash_id, event_id = %event.event_id, "feedback for unknown article");
            return Ok(FeedbackOutcome::NotFound);
        };

        let retention = self.settings.processed_retention_days;
        let inserted = store::update::<ProcessedEvents, bool, _>(state, keys::PROCESSED_EVENTS, |set| {
            let pruned = set.prune(now, retention);
            if set.ids.contains_key(&event.event_id) {
                (pruned, false)
            } else {
                set.ids.insert(event.event_id.clone(), now);
                (true, true)
            }
        })?;
        if !inserted {
            counter!("curator_feedback_total", "outcome" => "duplicate").increment(1);
            info!(event_id = %event.event_id, "duplicate feedback ignored");
            return Ok(FeedbackOutcome::Duplicate);
        }

        let signals = event.reaction.signals();
        let kind = event.reaction.kind();
        let mut themes = signals.themes.clone();
        if let Some(cat) = &entry.category {
            let cat = normalize_key(cat);
            if !themes.contains(&cat) {
                themes.push(cat);
            }
        }
        let delta = WeightDelta {
            amount: kind.weight(),
            source: Some(entry.source.clone()),
            host: url::Url::parse(&entry.canonical_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string())),
            themes: themes.clone(),
            content_types: signals.content_types.clone(),
            avoid: event.reaction.avoid().to_vec(),
        };
        let domain = self.settings.active_domain.clone();
        store::update::<LearnedProfile, (), _>(state, keys::PROFILE, |p| {
            p.apply(&delta, &domain, now);
            (true, ())
        })?;

        let row = FeedbackHistoryEntry {
            event_id: event.event_id.clone(),
            hash_id: event.hash_id.clone(),
            action: kind,
            channel: event.channel.clone(),
            source: entry.source.clone(),
            themes,
            content_types: signals.content_types.clone(),
            avoid: event.reaction.avoid().to_vec(),
            delta: kind.weight(),
            domain,
            event_at: event.timestamp,
            recorded_at: now,
        };
        self.append_history(&event.event_id, serde_json::to_value(&row)?);

        counter!("curator_feedback_total", "outcome" => "accepted").increment(1);
        info!(
            event_id = %event.event_id,
            hash_id = %event.hash_id,
            action = ?kind,
            channel = %event.channel,
            "feedback recorded"
        );
        Ok(FeedbackOutcome::Accepted)
    }

    fn append_history(&self, event_id: &str, line: Value) {
        let state = self.store.as_ref();
        self.flush_history_backlog();
        let Err(e) = state.append_line(keys::FEEDBACK_HISTORY, &line) else {
            return;
        };
        counter!("curator_feedback_history_parked_total").increment(1);
        warn!(event_id, error = %e, "history append failed; parking row");
        let parked = store::update::<Vec<Value>, (), _>(state, keys::HISTORY_BACKLOG, |rows| {
            rows.push(line.clone());
            (true, ())
        });
        if let Err(e) = parked {
            error!(event_id, error = %e, row = %line, "history row could not be parked");
        }
    }

    /// Re-append parked history rows in their original order. Returns how
    /// many made it into the log; the rest stay parked.
    pub fn flush_history_backlog(&self) -> usize {
        let state = self.store.as_ref();
        let drained = store::update::<Vec<Value>, Vec<Value>, _>(state, keys::HISTORY_BACKLOG, |rows| {
            let taken = std::mem::take(rows);
            (!taken.is_empty(), taken)
        });
        let rows = match drained {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "cannot read history backlog");
                return 0;
            }
        };

        for (n, line) in rows.iter().enumerate() {
            if let Err(e) = state.append_line(keys::FEEDBACK_HISTORY, line) {
                warn!(error = %e, pending = rows.len() - n, "history still unavailable; re-parking rows");
                let pending = &rows[n..];
                let requeued = store::update::<Vec<Value>, (), _>(state, keys::HISTORY_BACKLOG, |parked| {
                    parked.splice(0..0, pending.iter().cloned());
                    (true, ())
                });
                if let Err(e) = requeued {
                    error!(error = %e, rows = pending.len(), "parked history rows lost");
                }
                return n;
            }
        }
        if !rows.is_empty() {
            info!(rows = rows.len(), "parked history rows appended");
        }
        rows.len()
    }

    /// Validate and store a 1–4 star rating; re-rating replaces the earlier one.
    pub fn record_rating(&self, raw: RawRating, now: DateTime<Utc>) -> Result<RatingOutcome> {
        ensure_metrics_described();
        crate::profile::ratings::validate_stars(raw.stars)?;
        let hash_id = raw.hash_id.trim().to_ascii_lowercase();
        let Some(entry) = self.resolve(&hash_id) else {
            counter!("curator_ratings_total", "outcome" => "not_found").increment(1);
            return Ok(RatingOutcome::NotFound);
        };
        let record = build_record(raw, &entry, now)?;
        let stars = record.stars;

        let replaced = store::update::<RatingBook, bool, _>(self.store.as_ref(), keys::RATINGS, |book| {
            (true, book.upsert(record.clone()))
        })?;

        let outcome = if replaced {
            RatingOutcome::Replaced
        } else {
            RatingOutcome::Recorded
        };
        counter!("curator_ratings_total", "outcome" => if replaced { "replaced" } else { "recorded" })
            .increment(1);
        info!(hash_id = %entry.hash_id, stars, replaced, "rating recorded");
        Ok(outcome)
    }

    /// Flag the category of a referenced article (hash id, `today-N`,
    /// `yesterday-N` or `YYYY-MM-DD-N`) with a preset boost or mute.
    pub fn flag_interest(
        &self,
        reference: &str,
        priority: InterestPriority,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FlagOutcome> {
        ensure_metrics_described();
        if note
            .as_ref()
            .is_some_and(|n| n.chars().count() > MAX_COMMENT_CHARS)
        {
            return Err(CuratorError::invalid("note is too long"));
        }
        let today = now.date_naive();
        let (ledger, _) = store::load_or_default::<HistoryLedger>(self.store.as_ref(), keys::LEDGER);
        let Some(entry) = ledger
            .resolve_reference(reference, today)
            .and_then(|id| ledger.live(&id).cloned())
        else {
            counter!("curator_interest_flags_total", "outcome" => "not_found").increment(1);
            return Ok(FlagOutcome::NotFound);
        };

        let flagged = FlaggedArticle::new(&entry, priority, note, now);
        let replaced = store::update::<InterestBook, bool, _>(self.store.as_ref(), keys::INTERESTS, |book| {
            book.prune(today);
            (true, book.upsert(flagged.clone()))
        })?;

        info!(
            hash_id = %entry.hash_id,
            category = %flagged.flag.category,
            modifier = flagged.flag.modifier,
            expires = ?flagged.flag.expires,
            replaced,
            "interest flagged"
        );
        let outcome = if replaced {
            FlagOutcome::Replaced(flagged)
        } else {
            FlagOutcome::Flagged(flagged)
        };
        counter!("curator_interest_flags_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    /// Audit rows, oldest first.
    pub fn history(&self) -> Result<Vec<FeedbackHistoryEntry>> {
        Ok(store::read_typed_lines(self.store.as_ref(), keys::FEEDBACK_HISTORY)?)
    }
}
