//! Error handling for the hostpulse collector
//!
//! Per-tick failures (metric reads, persistence) are recoverable and the
//! collection loop keeps going; initialization failures abort the run
//! before it reaches the running state.

use std::fmt;

use thiserror::Error;

/// The main error type for the collector
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Metric acquisition errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Log, store and report errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

/// Metric acquisition errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("System metrics unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Metric registration failed: {name}")]
    RegistrationFailed { name: String },

    #[error("Metrics export failed: {reason}")]
    ExportFailed { reason: String },
}

/// Which of the two persistence sinks an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Log,
    Store,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Log => write!(f, "log"),
            SinkKind::Store => write!(f, "store"),
        }
    }
}

/// Storage related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage initialization failed for {path}: {reason}")]
    InitFailed { path: String, reason: String },

    #[error("Log write failed: {reason}")]
    LogWrite { reason: String },

    #[error("Store write failed: {reason}")]
    StoreWrite { reason: String },

    #[error("Partial persistence failure: {failed} sink failed: {reason}")]
    PartialPersistenceFailure { failed: SinkKind, reason: String },

    #[error("Persistence failed on both sinks: log: {log_reason}; store: {store_reason}")]
    PersistenceFailed { log_reason: String, store_reason: String },

    #[error("Report write failed for {path}: {reason}")]
    ReportWrite { path: String, reason: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for metric acquisition
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// A specialized result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<tokio::task::JoinError> for MonitorError {
    fn from(err: tokio::task::JoinError) -> Self {
        MonitorError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_conversions() {
        let metrics_error = MonitorError::from(MetricsError::Unavailable {
            reason: "no cpus".to_string(),
        });
        assert!(matches!(metrics_error, MonitorError::Metrics(_)));
        assert_eq!(metrics_error.to_string(), "Metrics error: System metrics unavailable: no cpus");

        let init_error = MonitorError::from(StorageError::InitFailed {
            path: "/nope/metrics.db".to_string(),
            reason: "permission denied".to_string(),
        });
        assert_eq!(
            init_error.to_string(),
            "Storage error: Storage initialization failed for /nope/metrics.db: permission denied"
        );

        let config_error = MonitorError::from(ConfigError::ValidationFailed {
            reason: "bad".to_string(),
        });
        assert!(matches!(config_error, MonitorError::Config(_)));
    }

    #[test]
    fn test_partial_failure_names_sink() {
        let err = StorageError::PartialPersistenceFailure {
            failed: SinkKind::Log,
            reason: "read-only file system".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Partial persistence failure: log sink failed: read-only file system"
        );
    }

    #[tokio::test]
    async fn test_panicked_task_becomes_task_error() {
        let join_error = tokio::task::spawn_blocking(|| panic!("sampler crashed"))
            .await
            .unwrap_err();
        let err = MonitorError::from(join_error);
        assert!(matches!(err, MonitorError::Task(_)));
    }
}
