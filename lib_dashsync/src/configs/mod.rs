//! # Configuration
//!
//! Session settings for the sync layer, with the one deployment flag that
//! picks streaming or polling.
//!
//! Sources are layered the same way the server binaries do it, lowest
//! priority first: built-in defaults, an optional JSON file, then `DASHSYNC_*`
//! environment variables (a `.env` file is honoured through `dotenvy`).
//! The result is read once at startup and never re-evaluated.

use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SyncError;
use crate::transport::TransportMode;

/// Environment variable holding the transport flag.
pub const ENV_USE_POLLING: &str = "DASHSYNC_USE_POLLING";
/// Environment variable overriding the base URL.
pub const ENV_BASE_URL: &str = "DASHSYNC_BASE_URL";
/// Environment variable overriding the poll interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "DASHSYNC_POLL_INTERVAL_MS";
/// Environment variable overriding the reconnect delay in milliseconds.
pub const ENV_RECONNECT_DELAY_MS: &str = "DASHSYNC_RECONNECT_DELAY_MS";
/// Environment variable holding a bearer token for the snapshot endpoint.
pub const ENV_AUTH_TOKEN: &str = "DASHSYNC_AUTH_TOKEN";
/// Environment variable overriding the streaming endpoint path.
pub const ENV_STREAM_PATH: &str = "DASHSYNC_STREAM_PATH";
/// Environment variable overriding the snapshot endpoint path.
pub const ENV_SNAPSHOT_PATH: &str = "DASHSYNC_SNAPSHOT_PATH";
/// Environment variable overriding the per-request timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DASHSYNC_REQUEST_TIMEOUT_MS";
/// Environment variable enabling discovery synthesis while polling.
pub const ENV_SYNTHESIZE_DISCOVERIES: &str = "DASHSYNC_SYNTHESIZE_DISCOVERIES";

/// Interprets a boolean flag the way deployment tooling writes them.
///
/// `1`, `true`, `yes` and `on` (any case, surrounding whitespace ignored)
/// are true. Everything else, including an empty string, is false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// # Sync Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Dashboard backend, `http://` or `https://`.
    pub base_url: String,
    /// Path of the streaming endpoint.
    pub stream_path: String,
    /// Path of the aggregate snapshot endpoint.
    pub snapshot_path: String,
    /// Deployment flag: `true` selects the polling fallback.
    pub use_polling: bool,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// Polling only: raise discovery events for records that appear between
    /// two consecutive snapshots.
    pub synthesize_discoveries: bool,
    /// Optional bearer token sent with snapshot requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            stream_path: "/ws".to_string(),
            snapshot_path: "/api/ws-snapshot".to_string(),
            use_polling: false,
            poll_interval_ms: 4000,
            reconnect_delay_ms: 3000,
            request_timeout_ms: 10_000,
            synthesize_discoveries: false,
            auth_token: None,
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then the JSON file at `path` if it exists, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_json_file(p)?,
            Some(p) => {
                log::info!("Config file not found at {}. Using defaults and environment.", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, SyncError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Overlays `DASHSYNC_*` variables. Loads `.env` first if present.
    pub fn apply_env(&mut self) -> Result<(), SyncError> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();
        self.apply_vars(|key| env::var(key).ok())
    }

    /// Overlays every `DASHSYNC_*` key that `lookup` resolves.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_USE_POLLING) {
            self.use_polling = parse_flag(&raw);
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(path) = lookup(ENV_STREAM_PATH) {
            self.stream_path = path;
        }
        if let Some(path) = lookup(ENV_SNAPSHOT_PATH) {
            self.snapshot_path = path;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse_millis(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_DELAY_MS) {
            self.reconnect_delay_ms = parse_millis(ENV_RECONNECT_DELAY_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = parse_millis(ENV_REQUEST_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SYNTHESIZE_DISCOVERIES) {
            self.synthesize_discoveries = parse_flag(&raw);
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            if !token.is_empty() {
                self.auth_token = Some(token);
            }
        }
        Ok(())
    }

    /// Rejects zero intervals and unusable URLs.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("pollIntervalMs must be greater than zero".into()));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(SyncError::Config("reconnectDelayMs must be greater than zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(SyncError::Config("requestTimeoutMs must be greater than zero".into()));
        }
        self.stream_url()?;
        self.snapshot_url()?;
        Ok(())
    }

    /// Which transport this configuration selects.
    pub fn mode(&self) -> TransportMode {
        if self.use_polling {
            TransportMode::Polling
        } else {
            TransportMode::Streaming
        }
    }

    fn base(&self) -> Result<Url, SyncError> {
        let base = Url::parse(&self.base_url)?;
        match base.scheme() {
            "http" | "https" => Ok(base),
            other => Err(SyncError::Config(format!(
                "baseUrl must be http or https, got '{}'",
                other
            ))),
        }
    }

    /// WebSocket URL: the base URL with `ws`/`wss` scheme and the stream path.
    pub fn stream_url(&self) -> Result<Url, SyncError> {
        let base = self.base()?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        let mut url = base.join(&self.stream_path)?;
        url.set_scheme(scheme)
            .map_err(|_| SyncError::Config(format!("cannot use scheme '{}' for {}", scheme, url)))?;
        Ok(url)
    }

    /// Absolute URL of the snapshot endpoint.
    pub fn snapshot_url(&self) -> Result<Url, SyncError> {
        Ok(self.base()?.join(&self.snapshot_path)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<u64, SyncError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| SyncError::Config(format!("{} must be milliseconds: {}", key, e)))
}
