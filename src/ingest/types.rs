// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One item as delivered by an external content source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub title: String,
    #[serde(alias = "link")]
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, alias = "published")]
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawItem>>;
    fn name(&self) -> &str;
}

/// A normalized candidate flowing through one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub hash_id: String,
    pub title: String,
    pub source: String,
    pub url: String,
    pub canonical_url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// Stage 1 score (0–10 plus profile affinity for rule-based scoring).
    pub raw_score: f64,
    /// Score used for ordering after all stages.
    pub final_score: f64,
    /// Name of the backend that produced `final_score`.
    pub scored_by: Option<String>,
    pub rationale: Option<String>,
    pub serendipity: bool,
}

impl Article {
    /// Lowercased host of the canonical URL, without a leading `www.`.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.canonical_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
    }

    /// Title and summary, lowercased, for keyword matching.
    pub fn text_lower(&self) -> String {
        format!("{} {}", self.title, self.summary).to_lowercase()
    }
}
