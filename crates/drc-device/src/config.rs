//! Configuration for the device simulator.
//!
//! Stored as TOML under the platform config directory
//! (`~/.config/drc/device.toml` on Unix). CLI flags override file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Device simulator configuration.
///
/// # Example TOML
///
/// ```toml
/// [identity]
/// device_id = "device_01"
/// name = "Test ping device 01"
/// device_type = "TestDevice"
///
/// [broker]
/// host = "broker.hivemq.com"
/// port = 1883
///
/// [calls]
/// timeout_seconds = 30
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub calls: CallsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// Seconds before an unanswered call is reported as timed out.
    #[serde(default = "default_call_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_device_id() -> String {
    "device_01".into()
}
fn default_name() -> String {
    "Test ping device 01".into()
}
fn default_device_type() -> String {
    "TestDevice".into()
}
fn default_broker_host() -> String {
    "broker.hivemq.com".into()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_call_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "warn".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            name: default_name(),
            device_type: default_device_type(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_call_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// CLI values that take precedence over file values.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub broker: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Platform config file path, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "drc")
            .map(|dirs| dirs.config_dir().join("device.toml"))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Write a default config on first run so users have something to edit.
    pub fn create_default_if_missing() -> Result<(), ConfigError> {
        let Some(path) = Self::default_path() else {
            return Ok(());
        };
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(&Self::default())?;
        std::fs::write(&path, text)?;
        Ok(())
    }

    /// Apply CLI overrides on top of file values.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(device_id) = &overrides.device_id {
            self.identity.device_id = device_id.clone();
        }
        if let Some(name) = &overrides.name {
            self.identity.name = name.clone();
        }
        if let Some(device_type) = &overrides.device_type {
            self.identity.device_type = device_type.clone();
        }
        if let Some(broker) = &overrides.broker {
            self.broker.host = broker.clone();
        }
        if let Some(port) = overrides.port {
            self.broker.port = port;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_gateway_deployment() {
        let config = Config::default();
        assert_eq!(config.identity.device_id, "device_01");
        assert_eq!(config.broker.host, "broker.hivemq.com");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.calls.timeout_seconds, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(&path, "[broker]\nhost = \"localhost\"\n").unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.identity.device_id, "device_01");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.identity.device_id, "device_01");
    }

    #[test]
    fn cli_overrides_win_over_file_values() {
        let config = Config::default().with_overrides(&CliOverrides {
            device_id: Some("device_42".into()),
            broker: Some("localhost".into()),
            port: Some(8883),
            ..Default::default()
        });
        assert_eq!(config.identity.device_id, "device_42");
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.identity.name, "Test ping device 01");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.identity.device_id, config.identity.device_id);
        assert_eq!(parsed.broker.port, config.broker.port);
    }
}
