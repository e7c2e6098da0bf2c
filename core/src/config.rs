//! Configuration management for the netpulse collector and query server
//!
//! This module handles loading, parsing, and validating configuration from
//! TOML files and environment variables. Environment variables use the
//! `NETPULSE_` prefix and override file values, which override defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main configuration for the collector process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Root directory for the CSV tree and the default database location
    pub log_dir: PathBuf,

    /// Explicit database path; defaults to `<log_dir>/netpulse.db`
    pub db_path: Option<PathBuf>,

    /// Destination to trace and ping out to the internet
    pub dest_host: String,

    /// Latency probe cadence in seconds
    pub ping_interval_sec: u64,

    /// Path discovery refresh interval in seconds
    pub traceroute_refresh_sec: u64,

    /// Throughput probe interval in seconds
    pub speedtest_interval_sec: u64,

    /// Throughput tool selection
    pub speedtest: SpeedtestConfig,
}

/// Throughput tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedtestConfig {
    /// Tool selector: "auto", "ookla", or "speedtest-cli"
    pub tool: String,

    /// Pinned server ids; when empty, auto-selection applies
    pub server_ids: Vec<String>,

    /// Auto-select the closest servers when no ids are pinned
    pub auto_select: bool,

    /// How many servers to use when auto-selecting
    pub auto_num_servers: usize,
}

/// Configuration for the query server process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Root directory holding the collector's database
    pub log_dir: PathBuf,

    /// Explicit database path; defaults to `<log_dir>/netpulse.db`
    pub db_path: Option<PathBuf>,

    /// Default query window in hours when a range is not given
    pub default_window_hours: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./netpulse_log"),
            db_path: None,
            dest_host: "8.8.8.8".to_string(),
            ping_interval_sec: 3,
            traceroute_refresh_sec: 300,
            speedtest_interval_sec: 1800,
            speedtest: SpeedtestConfig::default(),
        }
    }
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            tool: "auto".to_string(),
            server_ids: Vec::new(),
            auto_select: true,
            auto_num_servers: 2,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
            log_dir: PathBuf::from("./netpulse_log"),
            db_path: None,
            default_window_hours: 24,
        }
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_string_lossy().to_string(),
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl CollectorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: CollectorConfig = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `NETPULSE_*` environment variables
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Ok(dir) = env::var("NETPULSE_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("NETPULSE_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Ok(host) = env::var("NETPULSE_DEST_HOST") {
            self.dest_host = host;
        }
        if let Some(v) = env_parse("NETPULSE_PING_INTERVAL_SEC")? {
            self.ping_interval_sec = v;
        }
        if let Some(v) = env_parse("NETPULSE_TRACEROUTE_REFRESH_SEC")? {
            self.traceroute_refresh_sec = v;
        }
        if let Some(v) = env_parse("NETPULSE_SPEEDTEST_INTERVAL_SEC")? {
            self.speedtest_interval_sec = v;
        }
        if let Ok(tool) = env::var("NETPULSE_SPEEDTEST_TOOL") {
            self.speedtest.tool = tool;
        }
        if let Ok(ids) = env::var("NETPULSE_SPEEDTEST_SERVER_IDS") {
            self.speedtest.server_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_parse("NETPULSE_AUTO_SELECT_SPEEDTEST_SERVERS")? {
            self.speedtest.auto_select = v;
        }
        if let Some(v) = env_parse("NETPULSE_AUTO_NUM_SERVERS")? {
            self.speedtest.auto_num_servers = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dest_host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dest_host".to_string(),
                value: String::new(),
            });
        }
        if self.ping_interval_sec == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ping_interval_sec".to_string(),
                value: "0".to_string(),
            });
        }
        match self.speedtest.tool.as_str() {
            "auto" | "ookla" | "speedtest-cli" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "speedtest.tool".to_string(),
                    value: other.to_string(),
                });
            }
        }
        if self.speedtest.auto_select && self.speedtest.auto_num_servers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "speedtest.auto_num_servers".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective database path
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join("netpulse.db"))
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: ServerConfig = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `NETPULSE_*` environment variables
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Ok(host) = env::var("NETPULSE_HOST") {
            self.host = host;
        }
        if let Some(v) = env_parse("NETPULSE_PORT")? {
            self.port = v;
        }
        if let Ok(dir) = env::var("NETPULSE_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("NETPULSE_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(v) = env_parse("NETPULSE_DEFAULT_WINDOW_HOURS")? {
            self.default_window_hours = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host".to_string(),
                value: String::new(),
            });
        }
        if self.default_window_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_window_hours".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective database path
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join("netpulse.db"))
    }
}
