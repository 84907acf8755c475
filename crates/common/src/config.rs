//! Configuration structures for the TFACC client
//!
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables. Every field has a default matching the reference
//! accelerator, so an empty document is a valid configuration.

use crate::error::{Result, TfaccError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Page size the device mapping offset must be aligned to
pub const MAP_PAGE_SIZE: u64 = 0x1000;

/// Top-level configuration for the TFACC client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfaccConfig {
    /// Accelerator device configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Long message transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Flag polling configuration
    #[serde(default)]
    pub wait: WaitConfig,

    /// Observability configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Accelerator device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device node exposing the shared region
    #[serde(default = "default_device_path")]
    pub path: PathBuf,

    /// File offset of the shared region inside the device node
    #[serde(default = "default_map_offset")]
    pub map_offset: u64,

    /// Partition count assumed for the initial server-info query
    #[serde(default = "default_partitions")]
    pub default_partitions: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            map_offset: default_map_offset(),
            default_partitions: default_partitions(),
        }
    }
}

/// Long message transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum payload bytes per signaling round
    #[serde(default = "default_transfer_limit")]
    pub transfer_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            transfer_limit: default_transfer_limit(),
        }
    }
}

/// How the host polls partition flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategyKind {
    /// Spin until every partition is idle, without limit
    #[default]
    Spin,

    /// Spin until idle or until the timeout elapses
    Deadline,
}

/// Flag polling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Polling strategy
    #[serde(default)]
    pub strategy: WaitStrategyKind,

    /// Timeout for the deadline strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Print the Prometheus exposition on exit
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

/// Default value functions
fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/thinkforce0")
}

fn default_map_offset() -> u64 {
    9997 * MAP_PAGE_SIZE
}

fn default_partitions() -> usize {
    4
}

fn default_transfer_limit() -> usize {
    28 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    false
}

impl TfaccConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TfaccError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: TfaccConfig = serde_yaml::from_str(&content).map_err(|e| {
            TfaccError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = TfaccConfig::default();

        if let Ok(path) = std::env::var("TFACC_DEVICE") {
            config.device.path = PathBuf::from(path);
        }
        if let Ok(offset) = std::env::var("TFACC_MAP_OFFSET") {
            config.device.map_offset = offset
                .parse()
                .map_err(|_| TfaccError::config(format!("Invalid map offset: {}", offset)))?;
        }
        if let Ok(limit) = std::env::var("TFACC_TRANSFER_LIMIT") {
            config.transfer.transfer_limit = limit
                .parse()
                .map_err(|_| TfaccError::config(format!("Invalid transfer limit: {}", limit)))?;
        }
        if let Ok(timeout) = std::env::var("TFACC_WAIT_TIMEOUT_MS") {
            let timeout_ms = timeout
                .parse()
                .map_err(|_| TfaccError::config(format!("Invalid wait timeout: {}", timeout)))?;
            config.wait = WaitConfig {
                strategy: WaitStrategyKind::Deadline,
                timeout_ms: Some(timeout_ms),
            };
        }
        if let Ok(level) = std::env::var("TFACC_LOG_LEVEL") {
            config.observability = Some(ObservabilityConfig {
                log_level: level,
                enable_metrics: default_metrics(),
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Limits that depend on the region layout are checked again when the
    /// device channel is opened.
    pub fn validate(&self) -> Result<()> {
        if self.device.path.as_os_str().is_empty() {
            return Err(TfaccError::config("Device path must not be empty"));
        }
        if self.device.map_offset % MAP_PAGE_SIZE != 0 {
            return Err(TfaccError::config(format!(
                "Map offset {:#x} is not page aligned",
                self.device.map_offset
            )));
        }
        if self.device.default_partitions == 0 {
            return Err(TfaccError::config("Default partition count must be positive"));
        }
        if self.transfer.transfer_limit == 0 {
            return Err(TfaccError::config("Transfer limit must be positive"));
        }
        match (self.wait.strategy, self.wait.timeout_ms) {
            (WaitStrategyKind::Deadline, None) | (WaitStrategyKind::Deadline, Some(0)) => {
                return Err(TfaccError::config(
                    "Deadline wait strategy requires a positive timeout_ms",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Get the wait timeout as Duration, if one is configured
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait.timeout_ms.map(Duration::from_millis)
    }

    /// Log level, falling back to "info"
    pub fn log_level(&self) -> &str {
        self.observability
            .as_ref()
            .map(|o| o.log_level.as_str())
            .unwrap_or("info")
    }

    /// Whether the metrics exposition should be printed
    pub fn metrics_enabled(&self) -> bool {
        self.observability
            .as_ref()
            .map(|o| o.enable_metrics)
            .unwrap_or(false)
    }
}
