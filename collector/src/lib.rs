//! Hostpulse collector library
//!
//! Samples host CPU, memory and network throughput at a fixed interval,
//! persists every sample to a plain-text log and a SQLite table, keeps a
//! bounded window of recent history, raises CPU threshold alerts and writes
//! insight reports summarizing the window.

pub mod alert;
pub mod collector;
pub mod config;
pub mod error;
pub mod insights;
pub mod metrics;
pub mod presenter;
pub mod rate;
pub mod sample;
pub mod source;
pub mod storage;
pub mod window;

// Re-export commonly used types
pub use alert::Alert;
pub use collector::{CollectionLoop, RunState, RunStatus, RunSummary};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use insights::{InsightReport, InsightThresholds, ReportWriter};
pub use metrics::RunMetrics;
pub use presenter::{ChannelPresenter, PresentationEvent, Presenter, StatusKind};
pub use rate::{CounterState, RateDeriver};
pub use sample::Sample;
pub use source::{MetricSource, NetCounters, RawReading, SysinfoSource};
pub use storage::{PersistenceSink, SampleSink, SqliteStore};
pub use window::{SharedWindow, Window};
