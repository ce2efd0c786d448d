use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Auto-refresh interval in seconds
    pub refresh_interval: u64,
    /// Whether the refresh timer is started at boot
    pub auto_refresh: bool,
    pub max_articles_per_feed: usize,
    /// Seconds static assets may be cached by clients
    pub cache_expiry: u64,
    /// Base URL of the RSS-to-JSON conversion endpoint
    pub converter_url: String,
    /// Path or http(s) URL of the source catalog document
    pub sources: String,
    pub static_dir: String,
    pub port: u16,
    /// HTTP client timeout in seconds
    pub request_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: 60,
            auto_refresh: true,
            max_articles_per_feed: 10,
            cache_expiry: 3600,
            converter_url: "https://api.rss2json.com/v1/api.json".to_string(),
            sources: "source.json".to_string(),
            static_dir: "static".to_string(),
            port: 35000,
            request_timeout: 30,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
