//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OFFSYNC_*)
//! 2. TOML config file (if OFFSYNC_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Configuration is read once at startup; nothing reconfigures it at runtime.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OFFSYNC_*)
/// 2. TOML config file (if OFFSYNC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding cache generations and the queue.
    ///
    /// Set via OFFSYNC_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Name of the cache generation this deploy installs and serves from.
    ///
    /// Set via OFFSYNC_GENERATION_NAME environment variable.
    #[serde(default = "default_generation_name")]
    pub generation_name: String,

    /// Critical assets pre-cached at install, relative to `app_origin`.
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,

    /// Origin of the host application; same-origin assets are static.
    #[serde(default = "default_app_origin")]
    pub app_origin: String,

    /// Origins whose requests are classified as remote-API calls.
    #[serde(default)]
    pub remote_api_origins: Vec<String>,

    /// Base URL of the remote store that accepts mutations.
    ///
    /// Set via OFFSYNC_REMOTE_STORE_URL environment variable.
    #[serde(default = "default_remote_store_url")]
    pub remote_store_url: String,

    /// User-Agent string for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Transient failures tolerated before a mutation is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single retry delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Bound on every network call in milliseconds.
    ///
    /// Set via OFFSYNC_NETWORK_TIMEOUT_MS environment variable.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Minimum spacing between automatic reconciliation runs.
    #[serde(default = "default_min_reconcile_interval_ms")]
    pub min_reconcile_interval_ms: u64,

    /// Period of the background reconciliation timer.
    #[serde(default = "default_periodic_sync_interval_ms")]
    pub periodic_sync_interval_ms: u64,

    /// How long acknowledged mutation ids stay in the applied ledger.
    #[serde(default = "default_applied_retention_ms")]
    pub applied_retention_ms: u64,

    /// Optional HTML file served as the offline document.
    #[serde(default)]
    pub offline_document_path: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offsync.sqlite")
}

fn default_generation_name() -> String {
    "offsync-v1".into()
}

fn default_static_manifest() -> Vec<String> {
    vec!["/".into(), "/index.html".into()]
}

fn default_app_origin() -> String {
    "http://localhost:8080".into()
}

fn default_remote_store_url() -> String {
    "http://localhost:8080/api".into()
}

fn default_user_agent() -> String {
    "offsync/0.1".into()
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_network_timeout_ms() -> u64 {
    8_000
}

fn default_min_reconcile_interval_ms() -> u64 {
    5_000
}

fn default_periodic_sync_interval_ms() -> u64 {
    60_000
}

fn default_applied_retention_ms() -> u64 {
    30 * 24 * 60 * 60 * 1_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            generation_name: default_generation_name(),
            static_manifest: default_static_manifest(),
            app_origin: default_app_origin(),
            remote_api_origins: Vec::new(),
            remote_store_url: default_remote_store_url(),
            user_agent: default_user_agent(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            min_reconcile_interval_ms: default_min_reconcile_interval_ms(),
            periodic_sync_interval_ms: default_periodic_sync_interval_ms(),
            applied_retention_ms: default_applied_retention_ms(),
            offline_document_path: None,
        }
    }
}

impl AppConfig {
    /// Network timeout as Duration for use with reqwest/tokio.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn min_reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconcile_interval_ms)
    }

    pub fn periodic_sync_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_sync_interval_ms)
    }

    pub fn applied_retention(&self) -> Duration {
        Duration::from_millis(self.applied_retention_ms)
    }

    /// Parsed application origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `app_origin` is not an http(s) URL.
    pub fn app_origin_url(&self) -> Result<Url, ConfigError> {
        validation::parse_http_url("app_origin", &self.app_origin)
    }

    /// Parsed remote-API origins.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any entry is not an http(s) URL.
    pub fn remote_api_origin_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.remote_api_origins
            .iter()
            .map(|o| validation::parse_http_url("remote_api_origins", o))
            .collect()
    }

    /// Manifest entries resolved against the application origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the origin or an entry cannot be resolved.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        let origin = self.app_origin_url()?;
        self.static_manifest
            .iter()
            .map(|entry| {
                origin.join(entry).map_err(|e| ConfigError::Invalid {
                    field: "static_manifest".into(),
                    reason: format!("'{entry}': {e}"),
                })
            })
            .collect()
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OFFSYNC_`
    /// 2. TOML file from `OFFSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OFFSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OFFSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
