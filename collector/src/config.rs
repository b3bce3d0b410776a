//! Configuration management for the hostpulse collector
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `HOSTPULSE__SECTION__KEY` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "HOSTPULSE";

/// Shortest accepted sampling interval
pub const MIN_INTERVAL_SECS: f64 = 0.001;

/// Largest accepted window capacity
pub const MAX_WINDOW_CAPACITY: usize = 1_000_000;

/// Main configuration structure for the collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling cadence and run length
    pub sampling: SamplingConfig,

    /// Alert and warning thresholds
    pub alerts: AlertConfig,

    /// Recent-history window
    pub window: WindowConfig,

    /// Log, store and report locations
    pub storage: StorageConfig,

    /// Insight report scheduling
    pub insights: InsightsConfig,

    /// Run metrics export
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between ticks
    pub interval_secs: f64,

    /// Run length in seconds, 0 runs until stopped
    pub duration_secs: f64,

    /// How long a CPU measurement blocks, in milliseconds
    pub cpu_window_ms: u64,
}

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// CPU percentage above which an alert fires
    pub cpu_threshold: f64,

    /// Peak memory percentage above which reports carry a warning
    pub memory_warning_percent: f64,

    /// Average KB/s above which reports carry a network notice
    pub network_notice_kbps: f64,
}

/// Window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of samples retained
    pub capacity: usize,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Line-oriented sample log
    pub log_path: PathBuf,

    /// SQLite sample store
    pub db_path: PathBuf,

    /// Directory receiving insight reports
    pub report_dir: PathBuf,

    /// Remove the log and store before a run starts
    pub reset_on_start: bool,
}

/// Insight report configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    /// Also write a report every N ticks, 0 only writes the closing report
    pub every_ticks: u64,
}

/// Run metrics configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus text dump written when a run ends
    pub export_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5.0,
            duration_secs: 120.0,
            cpu_window_ms: 1000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 75.0,
            memory_warning_percent: 90.0,
            network_notice_kbps: 1024.0,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("metrics.log"),
            db_path: PathBuf::from("system_metrics.db"),
            report_dir: PathBuf::from("dashboard_outputs"),
            reset_on_start: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SamplingConfig {
    /// Tick period, never shorter than [`MIN_INTERVAL_SECS`]
    pub fn interval(&self) -> Duration {
        let floor = Duration::from_millis(1);
        Duration::try_from_secs_f64(self.interval_secs)
            .map_or(floor, |interval| interval.max(floor))
    }

    /// Run length, `None` when the run is unbounded
    pub fn duration(&self) -> Option<Duration> {
        if self.duration_secs == 0.0 {
            None
        } else {
            Some(Duration::try_from_secs_f64(self.duration_secs).unwrap_or(Duration::MAX))
        }
    }

    /// CPU measurement window
    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.to_string_lossy().to_string() })?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: defaults -> file -> env
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        Self::load_layered(config_path, ENV_PREFIX)
    }

    pub(crate) fn load_layered<P: AsRef<Path>>(
        config_path: Option<P>,
        env_prefix: &str,
    ) -> ConfigResult<Self> {
        let defaults = ::config::Config::try_from(&MonitorConfig::default())
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = config_path {
            let path = path.as_ref();
            if !path.exists() {
                return Err(ConfigError::FileNotFound { path: path.to_string_lossy().to_string() });
            }
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: MonitorConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let interval = self.sampling.interval_secs;
        if !(interval >= MIN_INTERVAL_SECS && Duration::try_from_secs_f64(interval).is_ok()) {
            return Err(ConfigError::InvalidValue {
                field: "sampling.interval_secs".to_string(),
                value: interval.to_string(),
            });
        }

        let duration = self.sampling.duration_secs;
        if !(duration >= 0.0 && Duration::try_from_secs_f64(duration).is_ok()) {
            return Err(ConfigError::InvalidValue {
                field: "sampling.duration_secs".to_string(),
                value: duration.to_string(),
            });
        }

        if self.sampling.cpu_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sampling.cpu_window_ms".to_string(),
                value: "0".to_string(),
            });
        }

        for (field, value) in [
            ("alerts.cpu_threshold", self.alerts.cpu_threshold),
            ("alerts.memory_warning_percent", self.alerts.memory_warning_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if self.alerts.network_notice_kbps.is_nan() || self.alerts.network_notice_kbps < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "alerts.network_notice_kbps".to_string(),
                value: self.alerts.network_notice_kbps.to_string(),
            });
        }

        if !(1..=MAX_WINDOW_CAPACITY).contains(&self.window.capacity) {
            return Err(ConfigError::InvalidValue {
                field: "window.capacity".to_string(),
                value: self.window.capacity.to_string(),
            });
        }

        if self.storage.log_path == self.storage.db_path {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "log and store share the same path: {}",
                    self.storage.log_path.display()
                ),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("hostpulse").join("hostpulse.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}
