//! Run metrics for the collection loop
//!
//! These describe the collector itself (ticks taken, alerts raised, write
//! failures), not the host. They live in a private Prometheus registry and
//! can be exported as Prometheus text or JSON at the end of a run.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};
use crate::sample::Sample;

/// Counters and gauges registered for one run
#[derive(Clone)]
pub struct RunCounters {
    pub ticks: IntCounter,
    pub ticks_skipped: IntCounter,
    pub alerts: IntCounter,
    pub counter_anomalies: IntCounter,
    pub persistence_failures: IntCounter,
    pub reports_written: IntCounter,

    pub tick_duration: Histogram,

    pub last_cpu_percent: Gauge,
    pub last_memory_percent: Gauge,
    pub window_len: IntGauge,
}

/// Point-in-time copy of the run counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub ticks: u64,
    pub ticks_skipped: u64,
    pub alerts: u64,
    pub counter_anomalies: u64,
    pub persistence_failures: u64,
    pub reports_written: u64,
    pub window_len: u64,
    /// Mean wall time per tick in milliseconds
    pub avg_tick_ms: f64,
    pub uptime_secs: u64,
}

pub struct RunMetrics {
    registry: Registry,
    counters: RunCounters,
    start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let counters = RunCounters::new(&registry)?;

        Ok(Self {
            registry,
            counters,
            start_time: Instant::now(),
        })
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn record_sample(&self, sample: &Sample, tick_time: Duration) {
        self.counters.ticks.inc();
        self.counters.tick_duration.observe(tick_time.as_secs_f64());
        self.counters.last_cpu_percent.set(sample.cpu_percent);
        self.counters.last_memory_percent.set(sample.memory_percent);
    }

    pub fn record_skipped(&self) {
        self.counters.ticks_skipped.inc();
    }

    pub fn record_alert(&self) {
        self.counters.alerts.inc();
    }

    pub fn record_anomalies(&self, count: usize) {
        self.counters.counter_anomalies.inc_by(count as u64);
    }

    pub fn record_persistence_failure(&self) {
        self.counters.persistence_failures.inc();
    }

    pub fn record_report(&self) {
        self.counters.reports_written.inc();
    }

    pub fn set_window_len(&self, len: usize) {
        self.counters.window_len.set(len as i64);
    }

    pub fn stats(&self) -> RunStats {
        let samples = self.counters.tick_duration.get_sample_count();
        let avg_tick_ms = if samples > 0 {
            self.counters.tick_duration.get_sample_sum() / samples as f64 * 1000.0
        } else {
            0.0
        };

        RunStats {
            ticks: self.counters.ticks.get(),
            ticks_skipped: self.counters.ticks_skipped.get(),
            alerts: self.counters.alerts.get(),
            counter_anomalies: self.counters.counter_anomalies.get(),
            persistence_failures: self.counters.persistence_failures.get(),
            reports_written: self.counters.reports_written.get(),
            window_len: self.counters.window_len.get().max(0) as u64,
            avg_tick_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export in `"prometheus"` text or `"json"` format
    pub fn export(&self, format: &str) -> MetricsResult<String> {
        match format {
            "prometheus" => {
                let encoder = TextEncoder::new();
                let metric_families = self.registry.gather();
                encoder
                    .encode_to_string(&metric_families)
                    .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
            }
            "json" => serde_json::to_string_pretty(&self.stats())
                .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() }),
            _ => Err(MetricsError::ExportFailed {
                reason: format!("Unsupported format: {}", format),
            }),
        }
    }

    /// Write the export to `path`, choosing the format from its extension
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> MetricsResult<()> {
        let path = path.as_ref();
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => "json",
            _ => "prometheus",
        };

        let output = self.export(format)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(export_error)?;
        }
        fs::write(path, output).map_err(export_error)?;

        tracing::info!("Run metrics written to {}", path.display());
        Ok(())
    }
}

impl RunCounters {
    fn new(registry: &Registry) -> MetricsResult<Self> {
        let ticks =
            register_counter(registry, "hostpulse_ticks_total", "Ticks that produced a sample")?;
        let ticks_skipped = register_counter(
            registry,
            "hostpulse_ticks_skipped_total",
            "Ticks skipped because metrics were unavailable",
        )?;
        let alerts =
            register_counter(registry, "hostpulse_alerts_total", "CPU threshold alerts raised")?;
        let counter_anomalies = register_counter(
            registry,
            "hostpulse_counter_anomalies_total",
            "Network counters observed going backwards",
        )?;
        let persistence_failures = register_counter(
            registry,
            "hostpulse_persistence_failures_total",
            "Samples that failed to reach the log or the store",
        )?;
        let reports_written = register_counter(
            registry,
            "hostpulse_reports_written_total",
            "Insight reports written",
        )?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("hostpulse_tick_duration_seconds", "Wall time of one sampling tick")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
        registry
            .register(Box::new(tick_duration.clone()))
            .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;

        let last_cpu_percent = Gauge::new(
            "hostpulse_last_cpu_percent",
            "CPU utilization of the newest sample",
        )
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
        registry
            .register(Box::new(last_cpu_percent.clone()))
            .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;

        let last_memory_percent =
            Gauge::new("hostpulse_last_memory_percent", "Memory utilization of the newest sample")
                .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
        registry
            .register(Box::new(last_memory_percent.clone()))
            .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;

        let window_len =
            IntGauge::new("hostpulse_window_len", "Samples currently held in the window")
                .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
        registry
            .register(Box::new(window_len.clone()))
            .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;

        Ok(Self {
            ticks,
            ticks_skipped,
            alerts,
            counter_anomalies,
            persistence_failures,
            reports_written,
            tick_duration,
            last_cpu_percent,
            last_memory_percent,
            window_len,
        })
    }
}

fn export_error(e: std::io::Error) -> MetricsError {
    MetricsError::ExportFailed { reason: e.to_string() }
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> MetricsResult<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    fn sample(cpu: f64) -> Sample {
        let ts = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Sample::new(ts, cpu, 40.0, 0.0, 0.0)
    }

    #[test]
    fn test_stats_follow_recordings() {
        let metrics = RunMetrics::new().unwrap();
        metrics.record_sample(&sample(80.0), Duration::from_millis(20));
        metrics.record_sample(&sample(10.0), Duration::from_millis(40));
        metrics.record_skipped();
        metrics.record_alert();
        metrics.record_anomalies(2);
        metrics.record_persistence_failure();
        metrics.record_report();
        metrics.set_window_len(2);

        let stats = metrics.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.ticks_skipped, 1);
        assert_eq!(stats.alerts, 1);
        assert_eq!(stats.counter_anomalies, 2);
        assert_eq!(stats.persistence_failures, 1);
        assert_eq!(stats.reports_written, 1);
        assert_eq!(stats.window_len, 2);
        assert!((stats.avg_tick_ms - 30.0).abs() < 1e-6);
        assert_eq!(metrics.counters().last_cpu_percent.get(), 10.0);
    }

    #[test]
    fn test_export_formats() {
        let metrics = RunMetrics::new().unwrap();
        metrics.record_alert();

        let text = metrics.export("prometheus").unwrap();
        assert!(text.contains("hostpulse_alerts_total 1"));

        let json = metrics.export("json").unwrap();
        assert!(json.contains("\"alerts\": 1"));

        assert!(metrics.export("xml").is_err());
    }

    #[test]
    fn test_write_to_picks_format_from_extension() {
        let dir = TempDir::new().unwrap();
        let metrics = RunMetrics::new().unwrap();

        let prom = dir.path().join("out/run.prom");
        metrics.write_to(&prom).unwrap();
        assert!(fs::read_to_string(&prom).unwrap().contains("hostpulse_ticks_total"));

        let json = dir.path().join("run.json");
        metrics.write_to(&json).unwrap();
        assert!(fs::read_to_string(&json).unwrap().contains("\"ticks\""));
    }
}
