//! # Learned Profile
//!
//! Weighted preferences accumulated from feedback. Stored weights are raw;
//! decay is applied lazily when a view is taken, so repeated reads never
//! compound it.
//!
//! - Only the feedback recorder mutates a profile ([`LearnedProfile::apply`]).
//! - Readers go through [`LearnedProfile::view`], which applies the sample-size
//!   gate, the per-key `min_weight` gate and time decay.
//! - Host signals are partitioned per knowledge domain in `domain_signals`.

pub mod injector;
pub mod interests;
pub mod ratings;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CurationSettings;

const SECS_PER_WEEK: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnedProfile {
    #[serde(default)]
    pub sources: BTreeMap<String, f64>,
    #[serde(default)]
    pub themes: BTreeMap<String, f64>,
    #[serde(default)]
    pub content_types: BTreeMap<String, f64>,
    #[serde(default)]
    pub avoid_patterns: BTreeMap<String, f64>,
    /// domain → content host → weight
    #[serde(default)]
    pub domain_signals: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub sample_size: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// The keys touched by one feedback event and the signed amount to add.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightDelta {
    pub amount: f64,
    pub source: Option<String>,
    pub host: Option<String>,
    pub themes: Vec<String>,
    pub content_types: Vec<String>,
    /// Avoid tags; each increments its counter by one.
    pub avoid: Vec<String>,
}

/// Gated and decayed read view of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileView {
    pub active: bool,
    pub sample_size: u32,
    pub decay_factor: f64,
    pub sources: Vec<(String, f64)>,
    pub themes: Vec<(String, f64)>,
    pub content_types: Vec<(String, f64)>,
    pub avoid: Vec<(String, f64)>,
    pub trusted_hosts: Vec<(String, f64)>,
}

pub fn normalize_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn bump(map: &mut BTreeMap<String, f64>, key: &str, amount: f64) {
    if key.trim().is_empty() {
        return;
    }
    *map.entry(key.to_string()).or_insert(0.0) += amount;
}

impl LearnedProfile {
    /// Fold one event's delta into the profile.
    pub fn apply(&mut self, delta: &WeightDelta, domain: &str, now: DateTime<Utc>) {
        if let Some(src) = delta.source.as_deref() {
            bump(&mut self.sources, src.trim(), delta.amount);
        }
        for t in &delta.themes {
            bump(&mut self.themes, &normalize_key(t), delta.amount);
        }
        for c in &delta.content_types {
            bump(&mut self.content_types, &normalize_key(c), delta.amount);
        }
        for a in &delta.avoid {
            bump(&mut self.avoid_patterns, &normalize_key(a), 1.0);
        }
        if let Some(host) = delta.host.as_deref() {
            let hosts = self.domain_signals.entry(domain.to_string()).or_default();
            bump(hosts, &host.to_ascii_lowercase(), delta.amount);
        }
        self.sample_size += 1;
        self.last_updated = Some(now);
    }

    /// Multiplier applied to every stored weight at `now`.
    ///
    /// `decay_per_week ^ weeks_since_last_update`, or `1.0` while the profile
    /// has fewer than `decay_activation_threshold` samples.
    pub fn decay_factor(&self, settings: &CurationSettings, now: DateTime<Utc>) -> f64 {
        if self.sample_size < settings.decay_activation_threshold {
            return 1.0;
        }
        let Some(last) = self.last_updated else {
            return 1.0;
        };
        let weeks = ((now - last).num_seconds() as f64 / SECS_PER_WEEK).max(0.0);
        settings.decay_per_week.powf(weeks)
    }

    pub fn view(&self, settings: &CurationSettings, now: DateTime<Utc>) -> ProfileView {
        let factor = self.decay_factor(settings, now);
        let mut view = ProfileView {
            active: self.sample_size >= settings.min_sample_size,
            sample_size: self.sample_size,
            decay_factor: factor,
            ..ProfileView::default()
        };
        if !view.active {
            return view;
        }

        let gate = |map: &BTreeMap<String, f64>| -> Vec<(String, f64)> {
            let mut v: Vec<(String, f64)> = map
                .iter()
                .map(|(k, w)| (k.clone(), w * factor))
                .filter(|(_, w)| *w >= settings.min_weight)
                .collect();
            v.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            v
        };

        view.sources = gate(&self.sources);
        view.themes = gate(&self.themes);
        view.content_types = gate(&self.content_types);
        view.avoid = gate(&self.avoid_patterns);
        if let Some(hosts) = self.domain_signals.get(&settings.active_domain) {
            view.trusted_hosts = gate(hosts);
        }
        view
    }
}
