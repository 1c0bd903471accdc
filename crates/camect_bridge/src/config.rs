//! Configuration file parsing and structures.
//!
//! The bridge uses TOML for declarative configuration. Each entry under `[hubs]` describes one
//! Camect hub; its key is the config-entry id the hub session is set up under.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Key = entry_id, Value = hub connection settings
    #[serde(default)]
    pub hubs: HashMap<String, HubConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "local.home.camect.com".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_scan_interval() -> u64 {
    30
}

/// Connection settings for one Camect hub
#[derive(Clone, PartialEq, Deserialize)]
pub struct HubConfig {
    /// Whether this hub is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hub hostname. Pasted browser URLs are accepted and reduced to the hostname.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Seconds between metadata refreshes
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scan_interval_secs", &self.scan_interval_secs)
            .finish()
    }
}

impl HubConfig {
    /// `host:port` as handed to the vendor client
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL used when the hub does not report its own local URL
    pub fn default_local_url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs)
    }

    fn validate(&mut self, entry_id: &str) -> Result<(), ConfigError> {
        self.host = validate_hostname(&self.host)?;

        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid {
                entry_id: entry_id.to_string(),
                message: "username must not be empty".to_string(),
            });
        }

        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                entry_id: entry_id.to_string(),
                message: "scan_interval_secs must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Add the `https://` scheme unless the input already carries one
fn prepend_scheme(input: &str) -> String {
    if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    }
}

/// Reduce whatever a user copied from the browser's address bar to the bare hostname
pub fn validate_hostname(input: &str) -> Result<String, ConfigError> {
    let url = Url::parse(&prepend_scheme(input.trim())).map_err(|e| ConfigError::InvalidHost {
        host: input.to_string(),
        reason: e.to_string(),
    })?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(ConfigError::InvalidHost {
            host: input.to_string(),
            reason: "no hostname".to_string(),
        }),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        contents.parse()
    }

    /// Enabled hubs, in entry id order
    pub fn enabled_hubs(&self) -> Vec<(&String, &HubConfig)> {
        let mut hubs: Vec<_> = self.hubs.iter().filter(|(_, hub)| hub.enabled).collect();
        hubs.sort_by(|a, b| a.0.cmp(b.0));
        hubs
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(s)?;
        for (entry_id, hub) in config.hubs.iter_mut() {
            hub.validate(entry_id)?;
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid hub host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Invalid hub config {entry_id}: {message}")]
    Invalid { entry_id: String, message: String },
}
