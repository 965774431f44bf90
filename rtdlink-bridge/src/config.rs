//! Configuration for the RTD bridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rtdlink_common::{Format, LoggingConfig};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Highest register count a single read may request.
pub const MAX_REGISTERS: u16 = 125;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Measurement device settings
    pub device: DeviceConfig,

    /// Sampling cadence and batching
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Live stream listener
    #[serde(default)]
    pub stream: StreamConfig,

    /// Batch persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device behind the serial-over-TCP bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host address (IP or hostname)
    pub host: String,

    /// TCP port of the serial tunnel (default: 9002)
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// First input register to read
    #[serde(default)]
    pub start_address: u16,

    /// Number of input registers, one per channel
    #[serde(default = "default_register_count")]
    pub register_count: u16,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Overall response timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_device_port() -> u16 {
    9002
}

fn default_unit_id() -> u8 {
    1
}

fn default_register_count() -> u16 {
    8
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    3000
}

impl DeviceConfig {
    /// `host:port` for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Sampling cadence and batch sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Device reads per minute
    #[serde(default = "default_samples_per_minute")]
    pub samples_per_minute: f64,

    /// Minutes of samples per stored batch
    #[serde(default = "default_upload_interval_minutes")]
    pub upload_interval_minutes: f64,

    /// Store the partial batch when shutting down
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

fn default_samples_per_minute() -> f64 {
    12.0
}

fn default_upload_interval_minutes() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_minute: default_samples_per_minute(),
            upload_interval_minutes: default_upload_interval_minutes(),
            flush_on_shutdown: true,
        }
    }
}

impl SamplingConfig {
    /// Pause between two reads: `60 / samples_per_minute` seconds.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.samples_per_minute)
    }

    /// Samples per batch: `samples_per_minute × upload_interval_minutes`, truncated.
    pub fn batch_threshold(&self) -> usize {
        (self.samples_per_minute * self.upload_interval_minutes) as usize
    }
}

/// Live stream listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bind address (default: "127.0.0.1:5050")
    #[serde(default = "default_stream_bind")]
    pub bind: String,

    /// Per-subscriber write timeout in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_stream_bind() -> String {
    "127.0.0.1:5050".to_string()
}

fn default_write_timeout_ms() -> u64 {
    250
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind: default_stream_bind(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Batch persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persist batches (batches are discarded otherwise)
    #[serde(default)]
    pub enabled: bool,

    /// Target database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Target collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Root directory for batch files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Batch file format: "csv", "json" or "cbor"
    #[serde(default)]
    pub format: Format,
}

fn default_database() -> String {
    "rtd".to_string()
}

fn default_collection() -> String {
    "readings".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database: default_database(),
            collection: default_collection(),
            data_dir: default_data_dir(),
            format: Format::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: Self = rtdlink_common::load_config(path)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a JSON5 string and validate it.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = rtdlink_common::parse_config(content)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;

        if device.host.trim().is_empty() {
            return Err(BridgeError::validation("device.host cannot be empty"));
        }

        if device.unit_id == 0 || device.unit_id > 247 {
            return Err(BridgeError::validation(format!(
                "device.unit_id must be 1-247, got {}",
                device.unit_id
            )));
        }

        if device.register_count == 0 || device.register_count > MAX_REGISTERS {
            return Err(BridgeError::validation(format!(
                "device.register_count must be 1-{}, got {}",
                MAX_REGISTERS, device.register_count
            )));
        }

        if device.connect_timeout_ms == 0 || device.read_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "device timeouts must be greater than zero",
            ));
        }

        let sampling = &self.sampling;

        if !(sampling.samples_per_minute > 0.0 && sampling.samples_per_minute.is_finite()) {
            return Err(BridgeError::validation(
                "sampling.samples_per_minute must be a positive number",
            ));
        }

        if !(sampling.upload_interval_minutes > 0.0 && sampling.upload_interval_minutes.is_finite())
        {
            return Err(BridgeError::validation(
                "sampling.upload_interval_minutes must be a positive number",
            ));
        }

        if sampling.batch_threshold() == 0 {
            return Err(BridgeError::validation(format!(
                "samples_per_minute × upload_interval_minutes must be at least 1, got {}",
                sampling.samples_per_minute * sampling.upload_interval_minutes
            )));
        }

        if self.stream.bind.trim().is_empty() {
            return Err(BridgeError::validation("stream.bind cannot be empty"));
        }

        if self.stream.write_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "stream.write_timeout_ms must be greater than zero",
            ));
        }

        if self.store.enabled
            && (self.store.database.is_empty() || self.store.collection.is_empty())
        {
            return Err(BridgeError::validation(
                "store.database and store.collection are required when the store is enabled",
            ));
        }

        Ok(())
    }
}
