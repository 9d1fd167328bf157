/// Application configuration for dashstream
///
/// Loaded once from a JSON file at startup and accessed through the global
/// `with_config` helper. The realtime section carries everything the channel
/// manager needs; embedders and tests can also construct a `ChannelConfig`
/// directly and skip the global entirely.
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use url::Url;

use crate::arguments::is_debug_config_enabled;
use crate::channel::ChannelConfig;
use crate::logger::{self, LogTag};

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "dashstream.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Realtime channel settings (endpoint plus reconnection policy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Push-messaging endpoint (ws:// or wss://)
    pub ws_url: String,

    /// Consecutive abnormal closures tolerated before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Fixed delay between automatic reconnection attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneralConfig {
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_interval_ms() -> u64 {
    3000
}

impl RealtimeConfig {
    /// Convert to the channel manager's own config type
    pub fn to_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.ws_url.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_interval_ms: self.reconnect_interval_ms,
        }
    }
}

static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Load configuration from a JSON file and install it globally
///
/// Validates the websocket endpoint URL up front so a typo fails at startup
/// instead of on the first connection attempt.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    let url = Url::parse(&config.realtime.ws_url)
        .with_context(|| format!("Invalid websocket URL: {}", config.realtime.ws_url))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        anyhow::bail!("Websocket URL must use ws:// or wss://: {}", url);
    }

    if is_debug_config_enabled() {
        logger::debug(
            LogTag::Config,
            &format!(
                "Loaded {} (endpoint {}, max {} attempts, {}ms interval)",
                path.display(),
                config.realtime.ws_url,
                config.realtime.max_reconnect_attempts,
                config.realtime.reconnect_interval_ms
            ),
        );
    }

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| anyhow::anyhow!("Config already initialized"))?;

    Ok(())
}

/// Access the global config through a closure
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&Config) -> R,
{
    let config_lock = CONFIG
        .get()
        .expect("Config not initialized. Call load_config() first.");

    let config = config_lock
        .read()
        .expect("Failed to acquire config read lock");

    f(&config)
}
