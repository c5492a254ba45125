// src/config/backend.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

fn default_api_key_env() -> String {
    "CURATOR_API_KEY".to_string()
}

/// Scoring backend endpoints. Absent endpoints simply shorten the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub primary: Option<EndpointSettings>,
    pub secondary: Option<EndpointSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSettings {
    pub url: String,
    pub model: String,
    /// Name of the credential to resolve (an env var for [`EnvCredentials`]).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// A credential that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Resolves named credentials for scoring backends.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Secret>;
}

/// Reads credentials from the process environment (`.env` is loaded by the binary).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn resolve(&self, name: &str) -> Option<Secret> {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => {
                let secret = Secret::new(v.trim());
                info!(credential = name, key_len = secret.len(), "credential resolved");
                Some(secret)
            }
            _ => {
                warn!(credential = name, "credential missing");
                None
            }
        }
    }
}

impl CredentialProvider for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<Secret> {
        self.get(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| Secret::new(v.trim()))
    }
}
