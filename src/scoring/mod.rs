// src/scoring/mod.rs
//! Scoring backends and the dispatcher that chains them.

pub mod dispatcher;
pub mod http;
pub mod mechanical;
pub mod retry;
pub mod source_weights;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::types::Article;
use crate::profile::injector::ScoringContext;

pub use dispatcher::{DispatchReport, ScoreDispatcher};
pub use mechanical::MechanicalScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Mechanical,
    PrimaryAi,
    SecondaryAi,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Mechanical => "mechanical",
            BackendKind::PrimaryAi => "primary_ai",
            BackendKind::SecondaryAi => "secondary_ai",
        }
    }
}

/// Quality dimensions returned by the secondary scorer (each 0–10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityDimensions {
    pub quality: f64,
    pub challenge: f64,
    pub contrarian: f64,
}

impl QualityDimensions {
    pub const QUALITY_WEIGHT: f64 = 0.5;
    pub const CHALLENGE_WEIGHT: f64 = 0.3;
    pub const CONTRARIAN_WEIGHT: f64 = 0.2;

    pub fn weighted(&self) -> f64 {
        self.quality * Self::QUALITY_WEIGHT
            + self.challenge * Self::CHALLENGE_WEIGHT
            + self.contrarian * Self::CONTRARIAN_WEIGHT
    }
}

/// One article's score, addressed by its index in the submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendScore {
    pub index: usize,
    pub score: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub dimensions: Option<QualityDimensions>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited")]
    RateLimited,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Transient failures worth another attempt. Auth and malformed
    /// responses fall through to the next backend immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout(_) | BackendError::RateLimited | BackendError::Unavailable(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendError::Timeout(_) => "timeout",
            BackendError::Auth(_) => "auth",
            BackendError::RateLimited => "rate_limited",
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Malformed(_) => "malformed",
        }
    }
}

#[async_trait::async_trait]
pub trait ScoringBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &str;

    /// Score `batch` under `ctx`. Scores may cover a subset of the batch;
    /// uncovered articles are filled in by the dispatcher.
    async fn score(
        &self,
        batch: &[Article],
        ctx: &ScoringContext,
    ) -> Result<Vec<BackendScore>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_malformed_are_not_retried() {
        assert!(!BackendError::Auth("401".into()).is_retriable());
        assert!(!BackendError::Malformed("x".into()).is_retriable());
        assert!(BackendError::RateLimited.is_retriable());
        assert!(BackendError::Timeout(Duration::from_millis(5)).is_retriable());
    }

    #[test]
    fn dimensions_weights_sum_to_one() {
        let d = QualityDimensions {
            quality: 10.0,
            challenge: 10.0,
            contrarian: 10.0,
        };
        assert!((d.weighted() - 10.0).abs() < 1e-9);
    }
}
