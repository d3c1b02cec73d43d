//! Configuration Module
//!
//! Provides TOML-based configuration for rtskb with support for:
//! - Logging level
//! - Pool sizing (global pool, reserve cache, arena and pool table bounds)
//! - Metrics endpoint
//! - Workload simulator parameters
//! - Environment variable overrides (RTSKB__* prefix)
//!
//! Pool sizes are read once at start-up and never change afterwards.

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::skb::RTSKB_SIZE;

// Re-export metrics config types
pub use metrics::MetricsConfig;

// Re-export simulator config types
pub use sim::SimConfig;

mod metrics;
mod sim;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Pool sizing
    pub pools: PoolsConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
    /// Workload simulator
    pub sim: SimConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Pool sizing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Buffers in the global pool
    #[serde(default = "default_global_rtskbs")]
    pub global_rtskbs: usize,
    /// Buffers pre-built for real-time pool creation
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Upper bound on buffers constructed at any time
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,
    /// Size of the pool table, reserve cache included
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,
    /// Verify the per-pool balance invariant on every free
    #[serde(default = "default_check_balance")]
    pub check_balance: bool,
}

fn default_global_rtskbs() -> usize {
    32
}
fn default_cache_size() -> usize {
    16
}
fn default_max_buffers() -> usize {
    4096
}
fn default_max_pools() -> usize {
    256
}
fn default_check_balance() -> bool {
    cfg!(debug_assertions)
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            global_rtskbs: default_global_rtskbs(),
            cache_size: default_cache_size(),
            max_buffers: default_max_buffers(),
            max_pools: default_max_pools(),
            check_balance: default_check_balance(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `RTSKB__` prefix with double underscores for nesting:
    ///    - `RTSKB__POOLS__GLOBAL_RTSKBS=64` overrides `pools.global_rtskbs`
    ///    - `RTSKB__POOLS__CACHE_SIZE=32` overrides `pools.cache_size`
    ///    - `RTSKB__METRICS__ENABLED=true` overrides `metrics.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("pools.global_rtskbs", default_global_rtskbs() as u64)?
            .set_default("pools.cache_size", default_cache_size() as u64)?
            .set_default("pools.max_buffers", default_max_buffers() as u64)?
            .set_default("pools.max_pools", default_max_pools() as u64)?
            .set_default("pools.check_balance", default_check_balance())?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.bind", "127.0.0.1:9100")?
            .set_default("sim.duration", "5s")?
            .set_default("sim.rx_interval", "100us")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (RTSKB__POOLS__CACHE_SIZE, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("RTSKB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pools = &self.pools;
        if pools.max_pools < 2 {
            return Err(ConfigError::Validation(
                "pools.max_pools must leave room for the reserve cache and the global pool"
                    .to_string(),
            ));
        }
        if pools.max_pools > u16::MAX as usize {
            return Err(ConfigError::Validation(format!(
                "pools.max_pools must not exceed {}",
                u16::MAX
            )));
        }
        if pools.max_buffers == 0 || pools.max_buffers >= u32::MAX as usize {
            return Err(ConfigError::Validation(
                "pools.max_buffers must be between 1 and 2^32 - 2".to_string(),
            ));
        }
        if pools.max_buffers < pools.global_rtskbs + pools.cache_size {
            return Err(ConfigError::Validation(format!(
                "pools.max_buffers ({}) cannot hold global_rtskbs ({}) plus cache_size ({})",
                pools.max_buffers, pools.global_rtskbs, pools.cache_size
            )));
        }

        let sim = &self.sim;
        if sim.frame_size == 0 || sim.frame_size > RTSKB_SIZE {
            return Err(ConfigError::Validation(format!(
                "sim.frame_size must be between 1 and {}",
                RTSKB_SIZE
            )));
        }
        if sim.rx_ring == 0 {
            return Err(ConfigError::Validation(
                "sim.rx_ring must be at least 1".to_string(),
            ));
        }
        if sim.capture && sim.capture_depth == 0 {
            return Err(ConfigError::Validation(
                "sim.capture_depth must be at least 1 when capture is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
