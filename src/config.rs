//! Recorder configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/recorder.toml` by default)
//! 2. environment variables prefixed with `DAQ_RECORDER_`, nested keys
//!    separated by a double underscore
//!
//! Every field has a default, so an absent file yields a working setup.
//!
//! # Example
//! ```no_run
//! use daq_recorder::config::RecorderConfig;
//!
//! // DAQ_RECORDER_STORAGE__OUTPUT_DIR=/data overrides storage.output_dir
//! let config = RecorderConfig::load()?;
//! config.validate()?;
//! println!("Writing to {}", config.storage.output_dir.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use daq_storage::{SaveFormat, TIFF_SIZE_CEILING};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where and how recordings are stored
    #[serde(default)]
    pub storage: StorageConfig,
    /// Recording worker tuning
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory relative save names are resolved against
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Format used when a request does not name one (hdf5, tiff, zarr)
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Size at which a TIFF recording continues in a new file
    #[serde(default = "default_tiff_size_limit")]
    pub tiff_size_limit_bytes: u64,
}

/// Recording worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep after a pass that found no frames, in microseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_us: u64,
    /// Buffered notifications per subscriber before the oldest are dropped
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

// Default value functions
fn default_name() -> String {
    "daq-recorder".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_format() -> String {
    "zarr".to_string()
}

fn default_tiff_size_limit() -> u64 {
    TIFF_SIZE_CEILING
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            default_format: default_format(),
            tiff_size_limit_bytes: default_tiff_size_limit(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: default_poll_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl WorkerConfig {
    /// Idle sleep between empty passes.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

impl StorageConfig {
    /// Parsed [`Self::default_format`].
    pub fn default_format(&self) -> Result<SaveFormat, String> {
        self.default_format.parse()
    }
}

impl RecorderConfig {
    /// Load configuration from `config/recorder.toml` and environment variables
    ///
    /// Example override: `DAQ_RECORDER_WORKER__POLL_INTERVAL_US=500`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/recorder.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_RECORDER_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        self.storage.default_format()?;

        if self.storage.tiff_size_limit_bytes == 0 {
            return Err("tiff_size_limit_bytes must be greater than zero".to_string());
        }
        if self.worker.poll_interval_us == 0 {
            return Err("poll_interval_us must be greater than zero".to_string());
        }
        if self.worker.event_capacity == 0 {
            return Err("event_capacity must be greater than zero".to_string());
        }

        Ok(())
    }
}
