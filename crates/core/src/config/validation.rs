//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

pub(crate) fn parse_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid { field: field.into(), reason: format!("'{value}': {e}") })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid { field: field.into(), reason: format!("unsupported scheme: {scheme}") }),
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `generation_name`, `user_agent` or `static_manifest` is empty
    /// - an origin or the remote store URL is not an http(s) URL
    /// - `max_retries` is outside 1..=100
    /// - backoff bounds are zero or inverted
    /// - `network_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - the periodic timer is faster than 1s or than the reconcile throttle
    /// - the applied-id retention is shorter than the longest backoff
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "generation_name".into(), reason: "must not be empty".into() });
        }
        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }
        if self.static_manifest.is_empty() {
            return Err(ConfigError::Invalid { field: "static_manifest".into(), reason: "must list at least one asset".into() });
        }

        self.app_origin_url()?;
        self.remote_api_origin_urls()?;
        self.manifest_urls()?;
        parse_http_url("remote_store_url", &self.remote_store_url)?;

        if self.max_retries == 0 || self.max_retries > 100 {
            return Err(ConfigError::Invalid { field: "max_retries".into(), reason: "must be between 1 and 100".into() });
        }

        if self.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid { field: "backoff_base_ms".into(), reason: "must be greater than 0".into() });
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid {
                field: "backoff_max_ms".into(),
                reason: "must not be less than backoff_base_ms".into(),
            });
        }

        if self.network_timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "network_timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.network_timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "network_timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.periodic_sync_interval_ms < 1_000 {
            return Err(ConfigError::Invalid {
                field: "periodic_sync_interval_ms".into(),
                reason: "must be at least 1000ms".into(),
            });
        }
        if self.min_reconcile_interval_ms > self.periodic_sync_interval_ms {
            return Err(ConfigError::Invalid {
                field: "min_reconcile_interval_ms".into(),
                reason: "must not exceed periodic_sync_interval_ms".into(),
            });
        }

        if self.applied_retention_ms < self.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "applied_retention_ms".into(),
                reason: "must not be less than backoff_max_ms".into(),
            });
        }

        if self.remote_api_origins.iter().any(|o| o == &self.app_origin) {
            tracing::warn!(
                app_origin = %self.app_origin,
                "app_origin is also listed in remote_api_origins; \
                 its requests will be classified as remote-API calls"
            );
        }

        Ok(())
    }
}
