use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use std::path::PathBuf;
use std::time::Instant;

use crate::ingest::types::{ContentSource, RawItem};

/// Reads a JSON array of items dumped by the external fetcher.
///
/// Accepts either a bare array or `{ "items": [...] }`.
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Dump {
    Bare(Vec<RawItem>),
    Wrapped { items: Vec<RawItem> },
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("json")
            .to_string();
        Self { name, path }
    }

    pub fn parse(s: &str) -> Result<Vec<RawItem>> {
        let dump: Dump = serde_json::from_str(s).context("parsing candidate dump")?;
        Ok(match dump {
            Dump::Bare(items) | Dump::Wrapped { items } => items,
        })
    }
}

#[async_trait]
impl ContentSource for JsonFileSource {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let t0 = Instant::now();
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let items = Self::parse(&body)?;
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
        counter!("ingest_source_items_total", "source" => self.name.clone())
            .increment(items.len() as u64);
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
