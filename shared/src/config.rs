use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::http::ValidatedUrl;
use crate::capabilities::kv::{KeyNamespace, KvKey};
use crate::error::Locale;
use crate::offline_store::DEFAULT_STORAGE_KEY;
use crate::outbox::DEFAULT_MAX_RETRIES;

pub const PRODUCTION_BASE_URL: &str = "https://bombus.onrender.com";
pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:8080";
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Chooses the API root from the host the app was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEndpoint {
    Development,
    Production,
}

impl ApiEndpoint {
    pub fn for_hostname(hostname: &str) -> Self {
        match hostname.trim() {
            "" | "localhost" | "127.0.0.1" => Self::Development,
            _ => Self::Production,
        }
    }

    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Development => DEVELOPMENT_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    pub status_poll_interval_ms: u64,
    pub storage_key: String,
    pub locale: Locale,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: PRODUCTION_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_ms: 30_000,
            status_poll_interval_ms: 2_000,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            locale: Locale::PtBr,
        }
    }
}

impl ServiceConfig {
    pub fn for_hostname(hostname: &str) -> Self {
        Self {
            base_url: ApiEndpoint::for_hostname(hostname).base_url().to_string(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.base_url.as_str())
            .map_err(|e| ConfigError::Validation(format!("base_url: {e}")))?;
        if self.max_retries == 0 {
            return Err(ConfigError::Validation("max_retries must be > 0".into()));
        }
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&self.request_timeout_ms) {
            return Err(ConfigError::Validation(format!(
                "request_timeout_ms must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }
        if self.status_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "status_poll_interval_ms must be > 0".into(),
            ));
        }
        KvKey::new(KeyNamespace::Outbox, self.storage_key.as_str())
            .map_err(|e| ConfigError::Validation(format!("storage_key: {e}")))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}
