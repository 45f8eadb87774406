use clap::Parser;
use lib_dashsync::{parse_flag, SyncConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "dash_watch.conf";

fn flag_value(raw: &str) -> Result<bool, String> {
    Ok(parse_flag(raw))
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Headless dashboard sync client: follows the backend over streaming or polling", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DASHSYNC_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DASHSYNC_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "DASHSYNC_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DASHSYNC_BASE_URL", help = "Dashboard backend base URL (http or https).")]
    pub base_url: Option<String>,

    #[clap(long, env = "DASHSYNC_STREAM_PATH", help = "Path of the streaming endpoint.")]
    pub stream_path: Option<String>,

    #[clap(long, env = "DASHSYNC_SNAPSHOT_PATH", help = "Path of the aggregate snapshot endpoint.")]
    pub snapshot_path: Option<String>,

    #[clap(long, env = "DASHSYNC_USE_POLLING", value_parser = flag_value, help = "Use the polling fallback instead of streaming (1/true/yes/on).")]
    pub use_polling: Option<bool>,

    #[clap(long, env = "DASHSYNC_POLL_INTERVAL_MS", help = "Milliseconds between snapshot polls.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "DASHSYNC_RECONNECT_DELAY_MS", help = "Milliseconds to wait before reconnecting the stream.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "DASHSYNC_REQUEST_TIMEOUT_MS", help = "Timeout in milliseconds for one snapshot request.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "DASHSYNC_SYNTHESIZE_DISCOVERIES", value_parser = flag_value, help = "Under polling, raise discoveries for records that appear between snapshots.")]
    pub synthesize_discoveries: Option<bool>,

    #[clap(long, env = "DASHSYNC_AUTH_TOKEN", hide_env_values = true, help = "Bearer token for the snapshot endpoint.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "DASHSYNC_SUMMARY_INTERVAL_SECONDS", help = "Seconds between snapshot summary log lines.")]
    pub summary_interval_seconds: Option<u64>,

    #[clap(long, help = "JSON payload to send once the stream is connected.")]
    pub send: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            base_url: other.base_url.or(self.base_url),
            stream_path: other.stream_path.or(self.stream_path),
            snapshot_path: other.snapshot_path.or(self.snapshot_path),
            use_polling: other.use_polling.or(self.use_polling),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            synthesize_discoveries: other.synthesize_discoveries.or(self.synthesize_discoveries),
            auth_token: other.auth_token.or(self.auth_token),
            summary_interval_seconds: other.summary_interval_seconds.or(self.summary_interval_seconds),
            send: other.send.or(self.send),
        }
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(Path::new("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_seconds.unwrap_or(30).max(1))
    }

    /// The `--send` payload, parsed. Plain text that is not JSON is sent as a
    /// JSON string.
    pub fn send_payload(&self) -> Option<serde_json::Value> {
        self.send.as_deref().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        })
    }

    /// Library settings: unset fields keep the library defaults.
    pub fn to_sync_config(&self) -> Result<SyncConfig, lib_dashsync::SyncError> {
        let mut sync = SyncConfig::default();
        if let Some(v) = &self.base_url {
            sync.base_url = v.clone();
        }
        if let Some(v) = &self.stream_path {
            sync.stream_path = v.clone();
        }
        if let Some(v) = &self.snapshot_path {
            sync.snapshot_path = v.clone();
        }
        if let Some(v) = self.use_polling {
            sync.use_polling = v;
        }
        if let Some(v) = self.poll_interval_ms {
            sync.poll_interval_ms = v;
        }
        if let Some(v) = self.reconnect_delay_ms {
            sync.reconnect_delay_ms = v;
        }
        if let Some(v) = self.request_timeout_ms {
            sync.request_timeout_ms = v;
        }
        if let Some(v) = self.synthesize_discoveries {
            sync.synthesize_discoveries = v;
        }
        sync.auth_token = self.auth_token.clone().filter(|t| !t.is_empty());
        sync.validate()?;
        Ok(sync)
    }
}

fn defaults() -> Config {
    Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        summary_interval_seconds: Some(30),
        ..Default::default()
    }
}

/// Where to look for the config file when none is given: the working
/// directory first, then the user config directory.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("dashsync").join(CONFIG_FILE_NAME),
        None => local,
    }
}

fn read_file_config(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the config file, then environment and CLI (clap reads both).
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli.config_path.clone().unwrap_or_else(default_config_path);

    let mut current_config = defaults();
    if let Some(file_config) = read_file_config(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}
