//! Telenode configuration loading and validation.
//!
//! This crate provides:
//! - The typed `node.json` structure ([`NodeConfig`])
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation with field-addressed errors
//!
//! Every section has serde defaults, so a partial file only overrides the
//! keys it names.

pub mod resolve;
pub mod validate;

pub use resolve::{resolve_config, resolve_config_with, ConfigPath, ConfigSource};
pub use validate::{validate_config, ValidationError, ValidationResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tn_common::{DeviceId, OperatingParams, ParamLimits, SensorKind};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Default number of pending records attempted per cycle.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// The complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub schema_version: String,
    pub device_id: DeviceId,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    /// Initial operating parameters; the backend may retune them.
    pub operating: OperatingParams,
    /// Bounds for backend-provided parameter updates.
    pub limits: ParamLimits,
    /// Active channels, in record field order.
    pub sensors: Vec<SensorKind>,
    pub power: PowerConfig,
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            device_id: DeviceId::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            operating: OperatingParams::default(),
            limits: ParamLimits::default(),
            sensors: SensorKind::ALL.to_vec(),
            power: PowerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Storage volume and log file names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the storage volume. Must already exist (it is a mount point);
    /// the node never creates it.
    pub volume: PathBuf,
    pub pending_file: String,
    pub sent_file: String,
    pub diag_file: String,
    pub counter_file: String,
    /// Diagnostic log size before it is rotated.
    pub diag_max_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            volume: resolve::default_volume(),
            pending_file: "pending.log".to_string(),
            sent_file: "sent.log".to_string(),
            diag_file: "diag.log".to_string(),
            counter_file: "counter".to_string(),
            diag_max_bytes: 64 * 1024,
        }
    }
}

/// Retry controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum pending records attempted per cycle.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Power gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// At or below this state of charge the node sheds load and halts.
    pub critical_battery_percent: f32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        PowerConfig {
            critical_battery_percent: 10.0,
        }
    }
}

/// Backend transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL; the payload fragment is appended as a path segment.
    pub endpoint: String,
    /// Deadline for one submission, connect through response.
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            endpoint: "http://localhost:8080/ingest".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl NodeConfig {
    /// Parse a config from JSON text without validating it.
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read, parse and validate a config file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text, path)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load the resolved config, or validated defaults when none was found.
    pub fn load(resolved: &ConfigPath) -> Result<Self, ConfigError> {
        match &resolved.path {
            Some(path) => {
                tracing::debug!(path = %path.display(), source = %resolved.source, "loading node config");
                Self::load_file(path)
            }
            None => {
                tracing::debug!("no node config found, using built-in defaults");
                let config = NodeConfig::default();
                validate_config(&config)?;
                Ok(config)
            }
        }
    }

    pub fn pending_path(&self) -> PathBuf {
        self.storage.volume.join(&self.storage.pending_file)
    }

    pub fn sent_path(&self) -> PathBuf {
        self.storage.volume.join(&self.storage.sent_file)
    }

    pub fn diag_path(&self) -> PathBuf {
        self.storage.volume.join(&self.storage.diag_file)
    }

    pub fn counter_path(&self) -> PathBuf {
        self.storage.volume.join(&self.storage.counter_file)
    }
}
