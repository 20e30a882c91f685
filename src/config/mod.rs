//! Configuration Module
//!
//! Provides TOML-based configuration for rollcall with support for:
//! - Logging level
//! - Node settings (bind address, seed peer, timing, limits)
//! - Environment variable overrides (ROLLCALL__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::cluster::NodeAddress;

// Re-export node config types
pub use node::{NodeConfig, MAX_NODE_DURATION};

mod node;

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
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Node configuration
    pub node: NodeConfig,
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

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `ROLLCALL__` prefix with double underscores for nesting:
    ///    - `ROLLCALL__NODE__BIND=0.0.0.0:7401` overrides `node.bind`
    ///    - `ROLLCALL__NODE__SEED=10.0.0.5:7400` overrides `node.seed`
    ///    - `ROLLCALL__LOG__LEVEL=debug` overrides `log.level`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("node.bind", "0.0.0.0:7400")?
            .set_default("node.handshake_timeout", "10s")?
            .set_default("node.report_interval", "5s")?
            .set_default("node.workers", 0)?
            .set_default("node.max_connections", 1024)?
            .set_default("node.max_payload_size", 1024 * 1024)?
            .set_default("node.tie_break", "larger-label")?;

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

        // Override with environment variables (ROLLCALL__NODE__BIND, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("ROLLCALL")
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
        let node = &self.node;

        for (name, value) in [
            ("handshake_timeout", node.handshake_timeout),
            ("report_interval", node.report_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "node.{} must be greater than zero",
                    name
                )));
            }
            if value > MAX_NODE_DURATION {
                return Err(ConfigError::Validation(format!(
                    "node.{} must be at most {:?}",
                    name, MAX_NODE_DURATION
                )));
            }
        }
        if node.max_connections == 0 || node.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Validation(format!(
                "node.max_connections must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if node.max_payload_size == 0 {
            return Err(ConfigError::Validation(
                "node.max_payload_size must be greater than zero".to_string(),
            ));
        }

        if let Some(seed) = &node.seed {
            if let Err(e) = seed.parse::<NodeAddress>() {
                return Err(ConfigError::Validation(format!("node.seed: {}", e)));
            }
        }

        Ok(())
    }
}
