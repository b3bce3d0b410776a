//! The collection loop
//!
//! A run goes `Idle -> Running -> (Completed | Interrupted)`. While running,
//! every tick reads the host, derives network rates, persists the sample,
//! pushes it into the shared window, evaluates the CPU alert and asks the
//! presenter to refresh. Both terminal transitions produce exactly one final
//! insight report and one final refresh.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alert;
use crate::config::MonitorConfig;
use crate::error::{MetricsError, MetricsResult, Result, StorageError};
use crate::insights::{self, InsightReport, InsightThresholds, ReportWriter};
use crate::metrics::{RunMetrics, RunStats};
use crate::presenter::{Presenter, StatusKind};
use crate::rate::{CounterAnomaly, RateDeriver};
use crate::sample::Sample;
use crate::source::MetricSource;
use crate::storage::PersistenceSink;
use crate::window::{SharedWindow, Window};

/// Run status
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Idle,
    Running,
    /// The configured duration elapsed
    Completed,
    /// Stopped by an external signal
    Interrupted,
    /// Initialization failed before the run started
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Interrupted | RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Interrupted => write!(f, "interrupted"),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Observable state of a run
#[derive(Debug, Clone)]
pub struct RunState {
    pub status: RunStatus,
    pub started_at: Option<DateTime<Local>>,
    pub last_sample: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            started_at: None,
            last_sample: None,
            last_error: None,
        }
    }
}

/// What the loop hands back once it reaches a terminal state
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    pub stats: RunStats,
    /// Samples written to both sinks
    pub samples_persisted: u64,
    /// The closing report
    pub report: InsightReport,
    /// Where the closing report was written, if the write succeeded
    pub report_path: Option<PathBuf>,
}

/// Result of one tick of the blocking pipeline
#[derive(Debug)]
pub enum TickOutcome {
    Sampled {
        sample: Sample,
        anomalies: Vec<CounterAnomaly>,
        persistence: Option<StorageError>,
    },
    /// The source could not be read; nothing was derived or persisted
    Skipped(MetricsError),
}

/// Read, derive and persist. Everything here may block.
pub struct Pipeline {
    source: Box<dyn MetricSource>,
    rates: RateDeriver,
    sink: PersistenceSink,
}

impl Pipeline {
    /// Take the initial counter read that later rates are derived from
    pub fn seed(mut source: Box<dyn MetricSource>, sink: PersistenceSink) -> MetricsResult<Self> {
        let counters = source.read_counters()?;
        tracing::debug!(
            "Seeded network counters - sent: {} B, recv: {} B",
            counters.sent,
            counters.recv
        );

        Ok(Self {
            source,
            rates: RateDeriver::seeded(counters),
            sink,
        })
    }

    pub fn tick(&mut self) -> TickOutcome {
        let reading = match self.source.sample_instant() {
            Ok(reading) => reading,
            Err(e) => return TickOutcome::Skipped(e),
        };

        let derivation = self.rates.advance(reading.counters());
        let sample = Sample::from_byte_rates(
            Local::now(),
            reading.cpu_percent,
            reading.memory_percent,
            derivation.sent_rate,
            derivation.recv_rate,
        );

        let persistence = self.sink.append(&sample).err();

        TickOutcome::Sampled {
            sample,
            anomalies: derivation.anomalies,
            persistence,
        }
    }

    pub fn persisted(&self) -> u64 {
        self.sink.appended()
    }
}

pub struct CollectionLoop {
    config: MonitorConfig,
    source: Box<dyn MetricSource>,
    sink: PersistenceSink,
    presenter: Arc<dyn Presenter>,
    window: SharedWindow,
    state: Arc<RwLock<RunState>>,
    metrics: Arc<RunMetrics>,
}

impl CollectionLoop {
    pub fn new(
        config: MonitorConfig,
        source: Box<dyn MetricSource>,
        sink: PersistenceSink,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        config.validate()?;

        let window = SharedWindow::new(config.window.capacity);
        let metrics = Arc::new(RunMetrics::new()?);

        Ok(Self {
            config,
            source,
            sink,
            presenter,
            window,
            state: Arc::new(RwLock::new(RunState::default())),
            metrics,
        })
    }

    /// Handle to the window for concurrent readers
    pub fn window(&self) -> SharedWindow {
        self.window.clone()
    }

    pub fn state_handle(&self) -> Arc<RwLock<RunState>> {
        self.state.clone()
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.metrics.clone()
    }

    /// Run until the configured duration elapses or `stop` is cancelled
    ///
    /// Only initialization failures are returned as errors. Per-tick
    /// failures are reported to the presenter and the loop carries on.
    pub async fn run(self, stop: CancellationToken) -> Result<RunSummary> {
        let CollectionLoop {
            config,
            source,
            sink,
            presenter,
            window,
            state,
            metrics,
        } = self;

        tracing::info!("Starting collection loop");

        let seeded = tokio::task::spawn_blocking(move || Pipeline::seed(source, sink)).await?;
        let mut pipeline = match seeded {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!("Initial counter read failed: {}", e);
                let mut state = state.write().await;
                state.status = RunStatus::Failed(e.to_string());
                state.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        window.reset().await;
        {
            let mut state = state.write().await;
            *state = RunState {
                status: RunStatus::Running,
                started_at: Some(Local::now()),
                ..RunState::default()
            };
        }

        let thresholds = InsightThresholds::from(&config.alerts);
        let writer = ReportWriter::new(&config.storage.report_dir);
        let deadline = config.sampling.duration();
        let every_ticks = config.insights.every_ticks;

        presenter.on_status(StatusKind::Info, &start_message(&config));

        let started = Instant::now();
        let mut ticker = tokio::time::interval(config.sampling.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let final_status = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break RunStatus::Interrupted,
                _ = ticker.tick() => {}
            }

            if deadline.map_or(false, |limit| started.elapsed() >= limit) {
                break RunStatus::Completed;
            }

            let tick_started = Instant::now();
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = pipeline.tick();
                (pipeline, outcome)
            })
            .await?;
            pipeline = returned;

            let (sample, anomalies, persistence) = match outcome {
                TickOutcome::Sampled {
                    sample,
                    anomalies,
                    persistence,
                } => (sample, anomalies, persistence),
                TickOutcome::Skipped(e) => {
                    tracing::warn!("Skipping tick: {}", e);
                    metrics.record_skipped();
                    presenter.on_status(StatusKind::Metrics, &format!("Skipped sample: {}", e));
                    state.write().await.last_error = Some(e.to_string());
                    continue;
                }
            };

            if let Some(e) = persistence {
                tracing::warn!("Persistence failure: {}", e);
                metrics.record_persistence_failure();
                presenter.on_status(StatusKind::Persistence, &e.to_string());
                state.write().await.last_error = Some(e.to_string());
            }

            let len = window.push(&sample).await;
            metrics.record_sample(&sample, tick_started.elapsed());
            metrics.set_window_len(len);
            state.write().await.last_sample = Some(sample.timestamp);

            tracing::debug!(
                "Tick - CPU: {:.2}%, Memory: {:.2}%, Sent: {:.2} KB/s, Recv: {:.2} KB/s",
                sample.cpu_percent,
                sample.memory_percent,
                sample.net_sent_kbps,
                sample.net_recv_kbps
            );

            if let Some(alert) = alert::evaluate(sample.cpu_percent, config.alerts.cpu_threshold) {
                tracing::warn!("{}", alert);
                metrics.record_alert();
                presenter.on_alert(&alert);
            }

            if !anomalies.is_empty() {
                metrics.record_anomalies(anomalies.len());
                for anomaly in &anomalies {
                    presenter.on_status(StatusKind::Anomaly, &anomaly.to_string());
                }
            }

            let frozen = window.frozen().await;
            presenter.refresh(&frozen.snapshot());

            let ticks = metrics.counters().ticks.get();
            if every_ticks > 0 && ticks % every_ticks == 0 {
                write_report(&frozen, &thresholds, &writer, presenter.as_ref(), &metrics).await?;
            }
        };

        let message = match final_status {
            RunStatus::Completed => "Monitoring duration reached.",
            _ => "Monitoring stopped.",
        };
        tracing::info!("{}", message);
        presenter.on_status(StatusKind::Info, message);

        let frozen = window.frozen().await;
        let (report, report_path) =
            write_report(&frozen, &thresholds, &writer, presenter.as_ref(), &metrics).await?;
        presenter.refresh(&frozen.snapshot());

        if let Some(path) = &config.metrics.export_path {
            if let Err(e) = metrics.write_to(path) {
                tracing::warn!("Failed to export run metrics: {}", e);
                presenter.on_status(StatusKind::Metrics, &e.to_string());
            }
        }

        state.write().await.status = final_status.clone();

        let stats = metrics.stats();
        tracing::info!(
            "Collection loop {} after {} ticks ({} skipped, {} alerts)",
            final_status,
            stats.ticks,
            stats.ticks_skipped,
            stats.alerts
        );

        Ok(RunSummary {
            status: final_status,
            stats,
            samples_persisted: pipeline.persisted(),
            report,
            report_path,
        })
    }
}

fn start_message(config: &MonitorConfig) -> String {
    match config.sampling.duration() {
        Some(duration) => format!(
            "Monitoring system every {}s for {}s. Press Ctrl+C to stop.",
            config.sampling.interval_secs,
            duration.as_secs_f64()
        ),
        None => format!(
            "Monitoring system every {}s until stopped. Press Ctrl+C to stop.",
            config.sampling.interval_secs
        ),
    }
}

/// Generate a report from `window` and write it. A failed write is
/// reported, not returned.
async fn write_report(
    window: &Window,
    thresholds: &InsightThresholds,
    writer: &ReportWriter,
    presenter: &dyn Presenter,
    metrics: &RunMetrics,
) -> Result<(InsightReport, Option<PathBuf>)> {
    let report = insights::generate(window, thresholds);

    let (writer, to_write) = (writer.clone(), report.clone());
    let written = tokio::task::spawn_blocking(move || writer.write(&to_write)).await?;

    match written {
        Ok(path) => {
            metrics.record_report();
            let text = format!("Insights saved to {}", path.display());
            presenter.on_status(StatusKind::Report, &text);
            Ok((report, Some(path)))
        }
        Err(e) => {
            tracing::warn!("Failed to write insight report: {}", e);
            presenter.on_status(StatusKind::Persistence, &e.to_string());
            Ok((report, None))
        }
    }
}
