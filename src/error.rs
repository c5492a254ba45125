// src/error.rs
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the curation core.
///
/// Backend failures never show up here: they are absorbed by the scoring
/// fallback chain. Corrupt state is recovered at load time and only reaches
/// callers through `Store` when a commit itself fails.
#[derive(Debug, Error)]
pub enum CuratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown or deleted article: {0}")]
    NotFound(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CuratorError>;

impl CuratorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }
}
