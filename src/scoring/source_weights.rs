//! # Source Multipliers & Keyword Rules
//!
//! Rule tables for the mechanical scorer.
//!
//! - Source multipliers scale the raw mechanical score per source
//!   (e.g. "Geopolitical Futures" → 1.4). Loaded from JSON with aliases,
//!   falling back to `default_seed()`.
//! - Lookup order: aliases → exact match → substring match → default.
//! - [`KEYWORDS`] drive the keyword component of the score.
//! - [`CATEGORY_RULES`] assign one category per article, highest priority first.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tracing::warn;

/// Multipliers per source, loaded from JSON or defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceMultipliers {
    /// Multiplier if no match is found.
    #[serde(default = "default_multiplier")]
    pub default_multiplier: f64,
    /// Multipliers for canonical source names.
    #[serde(default)]
    pub multipliers: HashMap<String, f64>,
    /// Aliases mapping non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_multiplier() -> f64 {
    1.0
}

const MIN_MULTIPLIER: f64 = 0.1;
const MAX_MULTIPLIER: f64 = 3.0;

impl Default for SourceMultipliers {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourceMultipliers {
    /// Load from a JSON file. Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<Self>(&s) {
                Ok(mut cfg) => {
                    cfg.multipliers = cfg
                        .multipliers
                        .into_iter()
                        .map(|(k, v)| (normalize(&k), v))
                        .collect();
                    cfg.aliases = cfg
                        .aliases
                        .into_iter()
                        .map(|(k, v)| (normalize(&k), normalize(&v)))
                        .collect();
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid source multipliers; using defaults");
                    Self::default_seed()
                }
            },
            Err(_) => Self::default_seed(),
        }
    }

    /// Multiplier for a source name.
    pub fn multiplier_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        // 1) Alias resolution.
        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.multipliers.get(&normalize(canon)) {
                return clamp(w);
            }
        }

        // 2) Exact match.
        if let Some(&w) = self.multipliers.get(&s) {
            return clamp(w);
        }

        // 3) Substring fallback (e.g. "ZeroHedge Markets" → "zerohedge").
        let mut best: Option<(&str, f64)> = None;
        for (k, &w) in &self.multipliers {
            if s.contains(k.as_str()) && best.map_or(true, |(bk, _)| k.len() > bk.len()) {
                best = Some((k.as_str(), w));
            }
        }
        if let Some((_, w)) = best {
            return clamp(w);
        }

        // 4) Default.
        clamp(self.default_multiplier)
    }

    /// Built-in seed for the default briefing sources.
    pub(crate) fn default_seed() -> Self {
        let mut multipliers = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("geopolitical futures", 1.4),
            ("the big picture", 1.2),
            ("zerohedge", 1.1),
            ("fed on the economy", 1.2),
            ("treasury mspd", 1.3),
        ] {
            multipliers.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("gpf", "geopolitical futures"),
            ("geopoliticalfutures com", "geopolitical futures"),
            ("ritholtz", "the big picture"),
            ("zero hedge", "zerohedge"),
            ("st louis fed", "fed on the economy"),
            ("monthly statement of the public debt", "treasury mspd"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_multiplier: 1.0,
            multipliers,
            aliases,
        }
    }
}

/// Terms that add to the keyword component of the mechanical score.
pub const KEYWORDS: &[&str] = &[
    "gold",
    "sanctions",
    "debt",
    "fiscal",
    "geopolitical",
    "trade war",
    "central bank",
    "inflation",
    "russia",
    "ukraine",
    "china",
    "treasury",
    "fed",
    "powell",
    "rates",
    "recession",
    "currency",
    "dollar",
    "euro",
    "oil",
    "energy",
    "conflict",
    "policy",
    "tariff",
    "deficit",
    "bonds",
];

pub struct CategoryRule {
    pub id: &'static str,
    pub keywords: &'static [&'static str],
}

pub const FALLBACK_CATEGORY: &str = "other";

/// Ordered by priority: the first matching rule wins.
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        id: "geo_major",
        keywords: &[
            "china", "beijing", "xi jinping", "russia", "putin", "moscow", "europe", "eu",
            "european union", "japan", "tokyo", "korea", "seoul", "united states", "washington",
            "us policy", "ukraine", "war", "conflict", "military operation", "invasion", "strike",
            "attack",
        ],
    },
    CategoryRule {
        id: "geo_other",
        keywords: &[
            "middle east", "iran", "israel", "saudi", "africa", "latin america", "brazil",
            "mexico", "india", "pakistan", "southeast asia", "vietnam", "indonesia", "turkey",
            "terrorism", "insurgency", "civil war",
        ],
    },
    CategoryRule {
        id: "monetary",
        keywords: &[
            "gold", "silver", "bitcoin", "crypto", "currency", "dollar", "euro", "yuan", "yen",
            "precious metal", "commodity", "bullion", "forex", "exchange rate", "devaluation",
        ],
    },
    CategoryRule {
        id: "fiscal",
        keywords: &[
            "debt", "deficit", "treasury", "bonds", "fiscal", "spending", "budget",
            "government spending", "national debt", "sovereign debt", "fiscal policy",
            "austerity",
        ],
    },
    CategoryRule {
        id: "technology",
        keywords: &[
            "ai development", "ai research", "artificial intelligence", "machine learning",
            "robotics", "autonomous systems", "defense industry", "weapons development",
            "military tech", "anduril", "palantir", "manufacturing capacity",
            "dual-use technology", "hypersonic", "quantum computing", "semiconductor", "5g", "6g",
        ],
    },
];

/// True when `term` occurs in `text` on word boundaries. `text` must be lowercase.
pub fn contains_term(text: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Number of distinct [`KEYWORDS`] present in lowercase `text`.
pub fn keyword_hits(text: &str) -> usize {
    KEYWORDS.iter().filter(|kw| contains_term(text, kw)).count()
}

/// Highest-priority category whose keywords occur in lowercase `text`.
pub fn categorize(text: &str) -> &'static str {
    CATEGORY_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|kw| contains_term(text, kw)))
        .map(|rule| rule.id)
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Every category whose keywords occur in lowercase `text`, in priority order.
pub fn matching_categories(text: &str) -> Vec<&'static str> {
    CATEGORY_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|kw| contains_term(text, kw)))
        .map(|rule| rule.id)
        .collect()
}

/// Lowercase, replace punctuation/dashes with spaces, collapse whitespace.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();

    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\''], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp(x: f64) -> f64 {
    x.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
}
