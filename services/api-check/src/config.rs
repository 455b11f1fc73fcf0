//! Check configuration
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens come from API_ACCESS_TOKEN / API_REFRESH_TOKEN or the credentials
//! file, never from the TOML itself.

use common::Secret;
use resilient_client::{ClientConfig, RetryConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct CheckConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// JSON credential store; omitted means an in-memory session.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

impl CheckConfig {
    /// Load configuration from a TOML file, then overlay token env vars.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: CheckConfig = toml::from_str(&contents)?;
        config.client.validate()?;

        if let Some(token) = non_empty_env("API_ACCESS_TOKEN") {
            config.session.access_token = Some(Secret::new(token));
        }
        if let Some(token) = non_empty_env("API_REFRESH_TOKEN") {
            config.session.refresh_token = Some(Secret::new(token));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-check.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
