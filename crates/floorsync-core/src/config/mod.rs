//! Sync client configuration.
//!
//! Settings come from a JSON file (missing file means defaults) with
//! environment overrides applied on top. The auth token is never printed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const SERVER_URL_ENV: &str = "FLOORSYNC_SERVER_URL";
pub const AUTH_TOKEN_ENV: &str = "FLOORSYNC_AUTH_TOKEN";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;
const DEFAULT_RETRY_BASE_SECS: u64 = 2;
const DEFAULT_RETRY_MAX_SECS: u64 = 300;
const DEFAULT_DEAD_LETTER_AFTER: u32 = 5;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    /// Base URL of the server of record, e.g. `https://floors.example.com/api`
    pub server_url: Option<String>,
    pub auth_token: Option<String>,
    /// Batch and probe request timeout; a timeout counts as unreachable
    pub request_timeout_secs: u64,
    /// Path requested by the reachability probe
    pub probe_path: String,
    /// How often to probe while offline
    pub probe_interval_secs: u64,
    /// First retry delay while online with pending changes
    pub retry_base_secs: u64,
    /// Retry delay cap
    pub retry_max_secs: u64,
    /// Failed attempts before a record is dead-lettered (0 = never)
    pub dead_letter_after: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_path: "/health".to_string(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            retry_base_secs: DEFAULT_RETRY_BASE_SECS,
            retry_max_secs: DEFAULT_RETRY_MAX_SECS,
            dead_letter_after: DEFAULT_DEAD_LETTER_AFTER,
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("server_url", &self.server_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_path", &self.probe_path)
            .field("probe_interval_secs", &self.probe_interval_secs)
            .field("retry_base_secs", &self.retry_base_secs)
            .field("retry_max_secs", &self.retry_max_secs)
            .field("dead_letter_after", &self.dead_letter_after)
            .finish()
    }
}

impl SyncSettings {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut settings = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse {}: {error}", path.display()))
        })?;
        settings.normalize()?;
        Ok(settings)
    }

    /// Write settings to `path` as pretty JSON, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut normalized = self.clone();
        normalized.normalize()?;
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Apply `FLOORSYNC_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(SERVER_URL_ENV).ok(),
            std::env::var(AUTH_TOKEN_ENV).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        server_url: Option<String>,
        auth_token: Option<String>,
    ) -> Result<()> {
        if let Some(url) = normalize_text_option(server_url) {
            self.server_url = Some(url);
        }
        if let Some(token) = normalize_text_option(auth_token) {
            self.auth_token = Some(token);
        }
        self.normalize()
    }

    /// Trim values and check URL and timing sanity
    pub fn normalize(&mut self) -> Result<()> {
        self.server_url = match normalize_text_option(self.server_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(Error::Config(
                    "server_url must include http:// or https://".to_string(),
                ))
            }
            None => None,
        };
        self.auth_token = normalize_text_option(self.auth_token.take());

        let probe_path = self.probe_path.trim();
        self.probe_path = if probe_path.starts_with('/') {
            probe_path.to_string()
        } else {
            format!("/{probe_path}")
        };

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.retry_base_secs == 0 || self.retry_max_secs < self.retry_base_secs {
            return Err(Error::Config(
                "retry delays must satisfy 0 < retry_base_secs <= retry_max_secs".to_string(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(Error::Config(
                "probe_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured server URL, or an error explaining how to set it
    pub fn require_server_url(&self) -> Result<String> {
        self.server_url.clone().ok_or_else(|| {
            Error::Config(format!(
                "server_url is not configured; set it in the config file or via {SERVER_URL_ENV}"
            ))
        })
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub const fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub const fn retry_max(&self) -> Duration {
        Duration::from_secs(self.retry_max_secs)
    }
}
