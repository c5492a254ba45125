// src/scoring/http.rs
//! JSON-over-HTTP scoring backend.
//!
//! Request (POST):
//! `{ model, tier, context, context_prompt, articles: [{ index, title, source, summary, url }] }`
//!
//! Response:
//! `{ scores: [{ index, score?, category?, rationale?, quality?, challenge?, contrarian? }] }`
//!
//! Large batches are split into chunks of `batch_size` and sent with at most
//! `concurrency` requests in flight. If some chunks fail the scores from the
//! others are still returned; the dispatcher fills the rest.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CredentialProvider, EndpointSettings, Secret};
use crate::error::{CuratorError, Result as CuratorResult};
use crate::ingest::types::Article;
use crate::profile::injector::ScoringContext;
use crate::scoring::{BackendError, BackendKind, BackendScore, QualityDimensions, ScoringBackend};

const SUMMARY_CHARS_IN_REQUEST: usize = 500;

pub struct HttpScoringBackend {
    kind: BackendKind,
    name: String,
    endpoint: String,
    model: String,
    api_key: Secret,
    batch_size: usize,
    concurrency: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WireArticle<'a> {
    index: usize,
    title: &'a str,
    source: &'a str,
    summary: String,
    url: &'a str,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    model: &'a str,
    tier: &'static str,
    context: &'a ScoringContext,
    context_prompt: String,
    articles: Vec<WireArticle<'a>>,
}

#[derive(Deserialize)]
struct ScoreResponse {
    scores: Vec<WireScore>,
}

#[derive(Deserialize)]
struct WireScore {
    index: usize,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    quality: Option<f64>,
    #[serde(default)]
    challenge: Option<f64>,
    #[serde(default)]
    contrarian: Option<f64>,
}

impl HttpScoringBackend {
    pub fn new(
        kind: BackendKind,
        endpoint: &EndpointSettings,
        api_key: Secret,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            kind,
            name: format!("{}:{}", kind.as_str(), endpoint.model),
            endpoint: endpoint.url.clone(),
            model: endpoint.model.clone(),
            api_key,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the endpoint's credential; a missing key is a configuration error.
    pub fn from_settings(
        kind: BackendKind,
        endpoint: &EndpointSettings,
        credentials: &dyn CredentialProvider,
        batch_size: usize,
        concurrency: usize,
    ) -> CuratorResult<Self> {
        let key = credentials.resolve(&endpoint.api_key_env).ok_or_else(|| {
            CuratorError::config(format!(
                "missing credential '{}' for {} backend",
                endpoint.api_key_env,
                kind.as_str()
            ))
        })?;
        Ok(Self::new(kind, endpoint, key, batch_size, concurrency))
    }

    fn tier(&self) -> &'static str {
        match self.kind {
            BackendKind::SecondaryAi => "secondary",
            _ => "primary",
        }
    }

    async fn score_chunk(
        &self,
        offset: usize,
        chunk: &[Article],
        ctx: &ScoringContext,
    ) -> Result<Vec<BackendScore>, BackendError> {
        let body = ScoreRequest {
            model: &self.model,
            tier: self.tier(),
            context: ctx,
            context_prompt: ctx.prompt_block(),
            articles: chunk
                .iter()
                .enumerate()
                .map(|(i, a)| WireArticle {
                    index: i,
                    title: &a.title,
                    source: &a.source,
                    summary: a.summary.chars().take(SUMMARY_CHARS_IN_REQUEST).collect(),
                    url: &a.url,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Auth(status.to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited);
        }
        if status.is_server_error() {
            return Err(BackendError::Unavailable(status.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Malformed(format!("unexpected status {status}")));
        }

        let parsed: ScoreResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        let mut out = Vec::with_capacity(parsed.scores.len());
        for s in parsed.scores {
            if s.index >= chunk.len() {
                debug!(backend = %self.name, index = s.index, "ignoring out-of-range index");
                continue;
            }
            let dimensions = match (s.quality, s.challenge, s.contrarian) {
                (Some(quality), Some(challenge), Some(contrarian)) => Some(QualityDimensions {
                    quality,
                    challenge,
                    contrarian,
                }),
                _ => None,
            };
            // The secondary tier's score is the weighted mean of its dimensions.
            let declared = match self.kind {
                BackendKind::SecondaryAi => dimensions.map(|d| d.weighted()).or(s.score),
                _ => s.score.or_else(|| dimensions.map(|d| d.weighted())),
            };
            let Some(score) = declared else {
                debug!(backend = %self.name, index = s.index, "entry without a score");
                continue;
            };
            if !score.is_finite() {
                continue;
            }
            out.push(BackendScore {
                index: offset + s.index,
                score: score.clamp(0.0, 10.0),
                category: s.category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty()),
                rationale: s.rationale,
                dimensions,
            });
        }
        Ok(out)
    }
}

fn map_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Unavailable(format!("request timed out: {e}"))
    } else if e.is_decode() {
        BackendError::Malformed(e.to_string())
    } else {
        BackendError::Unavailable(e.to_string())
    }
}

#[async_trait::async_trait]
impl ScoringBackend for HttpScoringBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn score(
        &self,
        batch: &[Article],
        ctx: &ScoringContext,
    ) -> Result<Vec<BackendScore>, BackendError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let calls: Vec<_> = batch
            .chunks(self.batch_size)
            .enumerate()
            .map(|(n, chunk)| self.score_chunk(n * self.batch_size, chunk, ctx))
            .collect();
        let results: Vec<Result<Vec<BackendScore>, BackendError>> = stream::iter(calls)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut scores = Vec::new();
        let mut first_err = None;
        let mut failed = 0usize;
        for r in results {
            match r {
                Ok(s) => scores.extend(s),
                Err(e) => {
                    failed += 1;
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) if scores.is_empty() => Err(e),
            Some(e) => {
                warn!(backend = %self.name, failed_chunks = failed, error = %e, "partial scoring response");
                Ok(scores)
            }
            None => Ok(scores),
        }
    }
}
