//! OTA agent configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::policy::PolicyConfig;
use crate::transport::FetchRequest;

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No update URL configured
    #[error("update URL is empty")]
    EmptyUrl,

    /// URL scheme is neither `https` nor `http`
    #[error("unsupported URL scheme in {0}")]
    UnsupportedScheme(String),

    /// `http://` URL without explicit opt-in
    #[error("plaintext URL {0} requires allow_plaintext_http")]
    PlaintextNotAllowed(String),

    /// A duration or size that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// OTA agent configuration.
///
/// Durations are stored in milliseconds, matching the JSON representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Firmware image URL
    pub update_url: String,
    /// Receive timeout for connecting and for every read
    pub receive_timeout_ms: u64,
    /// Accept `http://` update URLs
    pub allow_plaintext_http: bool,
    /// Treat a changed version label as a reason to update
    pub enforce_version_check: bool,
    /// Treat a changed content hash as a reason to update
    pub require_hash_change: bool,
    /// Refuse images below the device security version floor
    pub enforce_rollback_floor: bool,
    /// Fetch the image with HTTP range requests
    pub partial_download: bool,
    /// Largest range request in bytes when `partial_download` is set
    pub max_request_size: usize,
    /// How long `check_for_update` waits for the attempt
    pub completion_timeout_ms: u64,
    /// Delay between commit and restart
    pub reboot_delay_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            update_url: "https://localhost:8070/ota.bin".to_string(),
            receive_timeout_ms: 5000,
            allow_plaintext_http: false,
            enforce_version_check: true,
            require_hash_change: true,
            enforce_rollback_floor: false,
            partial_download: false,
            max_request_size: 16 * 1024,
            completion_timeout_ms: 60_000,
            reboot_delay_ms: 1000,
        }
    }
}

impl OtaConfig {
    /// Load configuration from `path`, writing the defaults there if it does
    /// not exist yet
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to stat config file: {}", path.display()))?
        {
            info!(path = %path.display(), "Config file not found, creating default");
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: OtaConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write configuration to `path` as pretty JSON
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.update_url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if url.starts_with("http://") {
            if !self.allow_plaintext_http {
                return Err(ConfigError::PlaintextNotAllowed(url.to_string()));
            }
        } else if !url.starts_with("https://") {
            return Err(ConfigError::UnsupportedScheme(url.to_string()));
        }

        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Zero("receive_timeout_ms"));
        }
        if self.partial_download && self.max_request_size == 0 {
            return Err(ConfigError::Zero("max_request_size"));
        }
        if self.completion_timeout_ms == 0 {
            return Err(ConfigError::Zero("completion_timeout_ms"));
        }

        if self.allow_plaintext_http {
            warn!("allow_plaintext_http is enabled; this is NOT secure");
        }
        Ok(())
    }

    /// Receive timeout
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Caller wait bound for one update attempt
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    /// Delay between commit and restart
    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_delay_ms)
    }

    /// Policy gates derived from this configuration
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            enforce_version_check: self.enforce_version_check,
            require_hash_change: self.require_hash_change,
            enforce_rollback_floor: self.enforce_rollback_floor,
        }
    }

    /// Transport request derived from this configuration
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            url: self.update_url.clone(),
            timeout: self.receive_timeout(),
            max_request_size: self.partial_download.then_some(self.max_request_size),
            allow_plaintext_http: self.allow_plaintext_http,
        }
    }
}
