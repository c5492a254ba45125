// src/config/mod.rs
//! Run settings, loaded once per run from TOML and passed explicitly.
//!
//! Lookup order:
//! 1) `$CURATION_CONFIG_PATH` (must exist)
//! 2) `config/curation.toml`
//! 3) built-in defaults
//!
//! `CURATOR_ACTIVE_DOMAIN` and `CURATOR_STATE_DIR` override the file.

pub mod backend;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CuratorError, Result};
use crate::profile::interests::InterestFlag;
pub use backend::{BackendSettings, CredentialProvider, EndpointSettings, EnvCredentials, Secret};

pub const DEFAULT_CONFIG_PATH: &str = "config/curation.toml";
pub const ENV_CONFIG_PATH: &str = "CURATION_CONFIG_PATH";
pub const ENV_ACTIVE_DOMAIN: &str = "CURATOR_ACTIVE_DOMAIN";
pub const ENV_STATE_DIR: &str = "CURATOR_STATE_DIR";

pub const DEFAULT_DOMAIN: &str = "Finance and Geopolitics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMode {
    /// Keyword/recency rules only.
    #[default]
    Mechanical,
    /// Primary AI scorer with mechanical fallback.
    Single,
    /// Primary shortlist, secondary quality pass on the shortlist.
    TwoStage,
}

impl std::str::FromStr for ScoringMode {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mechanical" => Ok(Self::Mechanical),
            "single" | "ai" => Ok(Self::Single),
            "two-stage" | "two_stage" | "ai-two-stage" => Ok(Self::TwoStage),
            other => Err(CuratorError::config(format!("unknown scoring mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringSettings {
    pub mode: ScoringMode,
    pub shortlist_size: usize,
    pub stage1_weight: f64,
    pub stage2_weight: f64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            mode: ScoringMode::Mechanical,
            shortlist_size: 50,
            stage1_weight: 0.3,
            stage2_weight: 0.7,
            max_retries: 2,
            backoff_base_ms: 500,
            timeout_ms: 30_000,
            batch_size: 50,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CurationSettings {
    pub active_domain: String,
    pub domains: Vec<String>,
    pub output_size: usize,
    pub serendipity_reserve: f64,
    /// Fixed seed for serendipity sampling; drawn and logged when absent.
    pub seed: Option<u64>,
    pub max_per_source: usize,
    pub near_duplicate_threshold: f64,
    pub min_weight: f64,
    pub min_sample_size: u32,
    pub decay_per_week: f64,
    pub decay_activation_threshold: u32,
    pub min_ratings: usize,
    pub processed_retention_days: i64,
    pub state_dir: PathBuf,
    pub preview_dir: PathBuf,
    pub source_weights_path: Option<PathBuf>,
    pub interests: Vec<InterestFlag>,
    pub scoring: ScoringSettings,
    pub backend: BackendSettings,
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self {
            active_domain: DEFAULT_DOMAIN.to_string(),
            domains: vec![
                DEFAULT_DOMAIN.to_string(),
                "Technology".to_string(),
                "Science".to_string(),
            ],
            output_size: 20,
            serendipity_reserve: 0.20,
            seed: None,
            max_per_source: 5,
            near_duplicate_threshold: 0.90,
            min_weight: 2.0,
            min_sample_size: 3,
            decay_per_week: 0.95,
            decay_activation_threshold: 20,
            min_ratings: 2,
            processed_retention_days: 90,
            state_dir: PathBuf::from("data"),
            preview_dir: PathBuf::from("preview"),
            source_weights_path: None,
            interests: Vec::new(),
            scoring: ScoringSettings::default(),
            backend: BackendSettings::default(),
        }
    }
}

impl CurationSettings {
    /// Parse and validate settings from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: CurationSettings = toml::from_str(s)
            .map_err(|e| CuratorError::config(format!("invalid settings TOML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CuratorError::config(format!("reading settings from {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Env path, then `config/curation.toml`, then defaults; env overrides applied last.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(CuratorError::config(format!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                )));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            info!("no settings file found; using defaults");
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(d) = std::env::var(ENV_ACTIVE_DOMAIN) {
            if !d.trim().is_empty() {
                self.active_domain = d.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
            if !dir.trim().is_empty() {
                self.state_dir = PathBuf::from(dir.trim());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.active_domain.trim().is_empty() {
            return Err(CuratorError::config("active_domain must not be empty"));
        }
        if !self.domains.is_empty() && !self.domains.iter().any(|d| d == &self.active_domain) {
            return Err(CuratorError::config(format!(
                "active_domain '{}' is not one of the configured domains",
                self.active_domain
            )));
        }
        if self.output_size == 0 {
            return Err(CuratorError::config("output_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.serendipity_reserve) {
            return Err(CuratorError::config(format!(
                "serendipity_reserve must be in [0, 1), got {}",
                self.serendipity_reserve
            )));
        }
        if !(self.decay_per_week > 0.0 && self.decay_per_week <= 1.0) {
            return Err(CuratorError::config(format!(
                "decay_per_week must be in (0, 1], got {}",
                self.decay_per_week
            )));
        }
        if self.max_per_source == 0 {
            return Err(CuratorError::config("max_per_source must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.near_duplicate_threshold) {
            return Err(CuratorError::config(
                "near_duplicate_threshold must be in [0, 1]",
            ));
        }
        let s = &self.scoring;
        if s.stage1_weight < 0.0 || s.stage2_weight < 0.0 || s.stage1_weight + s.stage2_weight <= 0.0
        {
            return Err(CuratorError::config(
                "stage weights must be non-negative and not both zero",
            ));
        }
        if s.batch_size == 0 || s.concurrency == 0 || s.shortlist_size == 0 {
            return Err(CuratorError::config(
                "batch_size, concurrency and shortlist_size must be at least 1",
            ));
        }
        match s.mode {
            ScoringMode::Mechanical => {}
            ScoringMode::Single => {
                if self.backend.primary.is_none() {
                    return Err(CuratorError::config(
                        "scoring mode 'single' requires [backend.primary]",
                    ));
                }
            }
            ScoringMode::TwoStage => {
                if self.backend.primary.is_none() || self.backend.secondary.is_none() {
                    return Err(CuratorError::config(
                        "scoring mode 'two-stage' requires [backend.primary] and [backend.secondary]",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scoring.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CurationSettings::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = CurationSettings::from_toml_str(
            r#"
output_size = 10
serendipity_reserve = 0.3

[scoring]
shortlist_size = 25
"#,
        )
        .unwrap();
        assert_eq!(cfg.output_size, 10);
        assert_eq!(cfg.scoring.shortlist_size, 25);
        assert_eq!(cfg.scoring.stage2_weight, 0.7);
        assert_eq!(cfg.active_domain, DEFAULT_DOMAIN);
    }

    #[test]
    fn reserve_of_one_is_rejected() {
        let err = CurationSettings::from_toml_str("serendipity_reserve = 1.0").unwrap_err();
        assert!(matches!(err, CuratorError::Config(_)));
    }

    #[test]
    fn ai_mode_without_endpoint_is_rejected() {
        let err = CurationSettings::from_toml_str("[scoring]\nmode = \"single\"").unwrap_err();
        assert!(err.to_string().contains("backend.primary"));
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("ai".parse::<ScoringMode>().unwrap(), ScoringMode::Single);
        assert_eq!(
            "two-stage".parse::<ScoringMode>().unwrap(),
            ScoringMode::TwoStage
        );
        assert!("fast".parse::<ScoringMode>().is_err());
    }
}
