//! Connection settings for the hosted record store.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

pub const STORE_URL_VAR: &str = "SUPABASE_URL";
pub const STORE_ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";
pub const STORE_TIMEOUT_VAR: &str = "SUPABASE_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not defined. Add it to your .env before starting.")]
    Missing(&'static str),
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{0} must be an http or https URL")]
    UnsupportedScheme(&'static str),
    #[error("{0} must be a positive number of seconds")]
    InvalidTimeout(&'static str),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: Url,
    pub anon_key: SecretString,
    pub request_timeout: Duration,
}

impl StoreConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: Url, anon_key: impl Into<String>) -> Self {
        Self {
            url,
            anon_key: SecretString::from(anon_key.into()),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Load from the process environment, reading a local `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env loaded: {}", e);
        }
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let raw_url = required(STORE_URL_VAR)?;
        let url = Url::parse(&raw_url).map_err(|source| ConfigError::InvalidUrl {
            var: STORE_URL_VAR,
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(STORE_URL_VAR));
        }

        let anon_key = required(STORE_ANON_KEY_VAR)?;

        let request_timeout = match lookup(STORE_TIMEOUT_VAR) {
            Some(raw) => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::InvalidTimeout(STORE_TIMEOUT_VAR))?;
                Duration::from_secs(secs)
            }
            None => Self::DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self::new(url, anon_key).with_request_timeout(request_timeout))
    }
}
