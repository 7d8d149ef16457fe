//! Runtime configuration
//!
//! Loaded from TOML, then overridden by command-line flags. Every section has
//! defaults so a missing file, or a file with only some keys, still yields a
//! usable configuration.

use crate::drive::{DriveLimits, DriveSettings};
use crate::gateway::GatewayTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, Level};

const APP_DIR: &str = "joydrive";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub path: PathBuf,
    pub queue_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/input/js0"),
            queue_capacity: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub vehicle_id: String,
    pub startup_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8005,
            vehicle_id: String::new(),
            startup_grace_ms: 1000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriveTuning {
    pub max_speed: f64,
    pub initial_speed: f64,
    pub acceleration: i32,
    pub tick_interval_ms: u64,
}

impl Default for DriveTuning {
    fn default() -> Self {
        Self {
            max_speed: 1600.0,
            initial_speed: 400.0,
            acceleration: 2000,
            tick_interval_ms: 200,
        }
    }
}

/// Everything the pipeline needs, fixed at construction time
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Time the supervisor gives both loops to exit after an interrupt
    pub shutdown_grace_ms: u64,
    pub log_level: String,
    pub device: DeviceConfig,
    pub gateway: GatewayConfig,
    pub drive: DriveTuning,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 400,
            log_level: "info".to_string(),
            device: DeviceConfig::default(),
            gateway: GatewayConfig::default(),
            drive: DriveTuning::default(),
        }
    }
}

impl DriveConfig {
    /// `<config dir>/joydrive/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Explicit path if given, else the default location if it exists, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading configuration from {}", path.display());
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.vehicle_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "vehicle id must not be empty".to_string(),
            ));
        }
        if self.device.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.drive.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.drive.max_speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max speed must be positive, got {}",
                self.drive.max_speed
            )));
        }
        if !(0.0..=self.drive.max_speed).contains(&self.drive.initial_speed) {
            return Err(ConfigError::Invalid(format!(
                "initial speed {} outside 0..={}",
                self.drive.initial_speed, self.drive.max_speed
            )));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.log_level)))
    }

    pub fn gateway_target(&self) -> GatewayTarget {
        GatewayTarget {
            host: self.gateway.host.clone(),
            port: self.gateway.port,
            vehicle_id: self.gateway.vehicle_id.clone(),
        }
    }

    pub fn drive_settings(&self) -> DriveSettings {
        DriveSettings {
            limits: DriveLimits {
                max_speed: self.drive.max_speed,
                acceleration: self.drive.acceleration,
                ..DriveLimits::default()
            },
            initial_speed: self.drive.initial_speed,
            tick_interval: Duration::from_millis(self.drive.tick_interval_ms),
            startup_grace: Duration::from_millis(self.gateway.startup_grace_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
