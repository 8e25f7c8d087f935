//! Configuration structures for the slave simulator.
//!
//! Supports TOML deserialization with defaults that match the
//! standalone slave server (one EL1258 on `/tmp/ethercat_bus.sock`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default logical process image size in bytes.
pub const DEFAULT_LOGICAL_MEMORY_SIZE: usize = 16 * 1024;

/// Largest frame accepted on the length-prefixed transport.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1500;

/// Top-level simulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Listen endpoint (`tcp://host:port` or `uds://path`).
    pub endpoint: String,

    /// Number of virtual slaves populated for each client connection.
    pub slave_count: usize,

    /// Device profile used for every populated slave.
    pub device: DeviceKind,

    /// Vendor id override (profile default when unset).
    pub vendor_id: Option<u32>,

    /// Product code override (profile default when unset).
    pub product_code: Option<u32>,

    /// Size of the logical process image in bytes.
    pub logical_memory_size: usize,

    /// Delay applied to frames passing through the in-process frame queue.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    /// Bound on every blocking wait in the server loop.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Largest frame accepted from a client.
    pub max_frame_size: usize,

    /// Interval between diagnostics log lines (0 disables them).
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            endpoint: "uds:///tmp/ethercat_bus.sock".to_string(),
            slave_count: 1,
            device: DeviceKind::default(),
            vendor_id: None,
            product_code: None,
            logical_memory_size: DEFAULT_LOGICAL_MEMORY_SIZE,
            latency: Duration::ZERO,
            poll_interval: Duration::from_millis(200),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Device profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Bare ESC without device objects.
    Generic,
    /// 8-channel digital input terminal.
    #[default]
    El1258,
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "el1258" => Ok(Self::El1258),
            other => Err(format!("unknown device kind '{other}' (expected generic or el1258)")),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slave_count > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "slave_count {} exceeds the 16-bit station address space",
                self.slave_count
            )));
        }
        if self.max_frame_size == 0 || self.max_frame_size > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} must be within 1..=65535",
                self.max_frame_size
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
