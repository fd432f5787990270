//! Worker configuration.
//!
//! Loaded from a TOML document. Every field has a default, so an empty
//! document yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

// ── Data models ──────────────────────────────────────────────────────

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache generation tag. Bumping it purges every older partition on activate.
    pub version: String,
    /// The worker's own origin, e.g. `https://app.example.com`.
    pub origin: String,
    /// Path prefix identifying the remote API's REST surface.
    pub api_path_prefix: String,
    pub navigation_timeout_ms: u64,
    pub api_timeout_ms: u64,
    pub max_asset_entries: usize,
    pub max_api_entries: usize,
    /// Logical key under which the most recent navigation response is kept.
    pub shell_cache_key: String,
    /// Key of the offline fallback document in the shell partition.
    pub offline_fallback: String,
    /// Core assets fetched into the shell partition on install.
    pub precache: Vec<String>,
    pub navigation_preload: bool,
    /// Background-sync tag used for queue replay.
    pub sync_tag: String,
    pub replay: ReplayConfig,
}

/// Replay tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub client_error_policy: ClientErrorPolicy,
    /// Reject a replay pass while another one is still running.
    pub single_flight: bool,
}

/// What a replay pass does with a record answered by a 4xx status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientErrorPolicy {
    /// Keep the record queued and retry it on the next pass.
    #[serde(rename = "retry")]
    Retry,
    /// Delete the record; 408 and 429 are still retried.
    #[serde(rename = "discard")]
    Discard,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            origin: "http://localhost".to_string(),
            api_path_prefix: "/rest/v1/".to_string(),
            navigation_timeout_ms: 8000,
            api_timeout_ms: 7000,
            max_asset_entries: 60,
            max_api_entries: 50,
            shell_cache_key: "/".to_string(),
            offline_fallback: "/offline.html".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/offline.html".to_string(),
                "/logo.png".to_string(),
            ],
            navigation_preload: true,
            sync_tag: "sync-mutations".to_string(),
            replay: ReplayConfig::default(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            client_error_policy: ClientErrorPolicy::Retry,
            single_flight: true,
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────────────

impl WorkerConfig {
    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig =
            toml::from_str(content).map_err(|e| ConfigError::Toml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(invalid("version", "must not be empty"));
        }
        let origin = Url::parse(&self.origin)
            .map_err(|e| invalid("origin", format!("not an absolute URL: {e}")))?;
        if !origin.has_host() {
            return Err(invalid("origin", "missing host"));
        }
        if !self.api_path_prefix.starts_with('/') {
            return Err(invalid("api_path_prefix", "must start with '/'"));
        }
        if self.max_asset_entries == 0 {
            return Err(invalid("max_asset_entries", "must be greater than zero"));
        }
        if self.max_api_entries == 0 {
            return Err(invalid("max_api_entries", "must be greater than zero"));
        }
        if self.replay.backoff_cap_ms < self.replay.backoff_base_ms {
            return Err(invalid(
                "replay.backoff_cap_ms",
                "must not be smaller than replay.backoff_base_ms",
            ));
        }
        Ok(())
    }

    /// Name of the shell partition for the current version.
    pub fn shell_cache(&self) -> String {
        format!("shell-{}", self.version)
    }

    /// Name of the asset partition for the current version.
    pub fn asset_cache(&self) -> String {
        format!("assets-{}", self.version)
    }

    /// Name of the API partition for the current version.
    pub fn api_cache(&self) -> String {
        format!("api-{}", self.version)
    }

    /// The three partition names that survive activation.
    pub fn cache_names(&self) -> [String; 3] {
        [self.shell_cache(), self.asset_cache(), self.api_cache()]
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
