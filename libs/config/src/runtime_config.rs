//! Runtime Configuration Module
//!
//! Loads node settings from built-in defaults, an optional TOML file and
//! `AMBIT_`-prefixed environment variables, in that order of precedence
//! (later sources win). Nested keys use a double underscore in the
//! environment, e.g. `AMBIT_TRANSMISSION__SEND_TIMEOUT_MS=250`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "AMBIT";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub node: NodeSettings,
    pub scheduler: SchedulerSettings,
    pub transmission: TransmissionSettings,
    pub logging: LoggingSettings,
}

/// Group membership settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeSettings {
    /// Name of the communication group nodes join
    pub group: String,
    /// Optional human readable label used in logs
    pub name: Option<String>,
}

/// Actor loop settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Prefix for scheduler names in log output
    pub name_prefix: String,
}

/// Far-reference transmission pool settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TransmissionSettings {
    /// Upper bound on simultaneously in-flight sends across all references
    pub max_concurrent_transmissions: usize,
    /// Transport timeout for one send attempt
    pub send_timeout_ms: u64,
    /// Attempts of the same letter within one task before the reference is
    /// considered disconnected
    pub max_send_attempts: u32,
}

/// Logging output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            group: "ambit".to_string(),
            name: None,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            name_prefix: "ambit".to_string(),
        }
    }
}

impl Default for TransmissionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_transmissions: 64,
            send_timeout_ms: 5_000,
            max_send_attempts: 3,
        }
    }
}

impl TransmissionSettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading overrides from `env` instead of the
    /// process environment when given
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("node.group", defaults.node.group.clone())?
            .set_default("scheduler.name_prefix", defaults.scheduler.name_prefix.clone())?
            .set_default(
                "transmission.max_concurrent_transmissions",
                defaults.transmission.max_concurrent_transmissions as i64,
            )?
            .set_default("transmission.send_timeout_ms", defaults.transmission.send_timeout_ms as i64)?
            .set_default("transmission.max_send_attempts", defaults.transmission.max_send_attempts as i64)?
            .set_default("logging.level", defaults.logging.level.clone())?
            .set_default("logging.json", defaults.logging.json)?;

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build runtime configuration")?
            .try_deserialize()
            .context("Failed to deserialize runtime configuration")?;

        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Parse a configuration directly from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(text).context("Failed to parse runtime configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.node.group.trim().is_empty() {
            bail!("node.group must not be empty");
        }
        if self.transmission.max_concurrent_transmissions == 0 {
            bail!("transmission.max_concurrent_transmissions must be at least 1");
        }
        if self.transmission.max_send_attempts == 0 {
            bail!("transmission.max_send_attempts must be at least 1");
        }
        if self.transmission.send_timeout_ms == 0 {
            bail!("transmission.send_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_sources() {
        let config = RuntimeConfig::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.transmission.send_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_file_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("node.toml");

        let config_content = r#"
[node]
group = "lab"
name = "n1"

[transmission]
max_send_attempts = 5

[logging]
level = "debug"
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load_with_env(Some(&config_path), Some(HashMap::new())).unwrap();

        assert_eq!(config.node.group, "lab");
        assert_eq!(config.node.name.as_deref(), Some("n1"));
        assert_eq!(config.transmission.max_send_attempts, 5);
        assert_eq!(config.transmission.max_concurrent_transmissions, 64);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_environment_override_wins_over_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("node.toml");
        fs::write(&config_path, "[transmission]\nsend_timeout_ms = 900\n").unwrap();

        let env = HashMap::from([(
            "AMBIT_TRANSMISSION__SEND_TIMEOUT_MS".to_string(),
            "250".to_string(),
        )]);
        let config = RuntimeConfig::load_with_env(Some(&config_path), Some(env)).unwrap();

        assert_eq!(config.transmission.send_timeout_ms, 250);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let result = RuntimeConfig::from_toml_str("[transmission]\nmax_send_attempts = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(RuntimeConfig::load_with_env(Some(&missing), Some(HashMap::new())).is_err());
    }
}
