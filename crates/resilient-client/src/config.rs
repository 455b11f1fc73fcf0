//! Client configuration
//!
//! Deserialised from TOML and validated before any client is built. Tokens
//! never appear here; they come from the session store.

use std::time::Duration;

use serde::Deserialize;
use session_auth::AuthMode;
use transport::HttpTransport;

use crate::error::ApiError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL every request path is joined onto.
    pub api_root: String,
    /// HTTP-only cookies plus CSRF header instead of bearer tokens.
    #[serde(default)]
    pub use_cookie_auth: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Backoff settings for transient failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_exponential")]
    pub exponential: bool,
}

fn default_timeout_ms() -> u64 {
    session_auth::DEFAULT_TIMEOUT_MS
}

fn default_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_exponential() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            exponential: default_exponential(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.api_root.starts_with("http://") && !self.api_root.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "api_root must start with http:// or https://, got: {}",
                self.api_root
            )));
        }
        if self.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.use_cookie_auth {
            AuthMode::Cookie
        } else {
            AuthMode::Bearer
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// reqwest transport for this configuration; the cookie jar is enabled
    /// only in cookie mode.
    pub fn transport(&self) -> transport::Result<HttpTransport> {
        HttpTransport::new(&self.api_root, self.timeout(), self.use_cookie_auth)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy<ApiError> {
        RetryPolicy::new()
            .with_retries(self.retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_exponential(self.exponential)
    }
}
