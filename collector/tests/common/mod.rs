//! Shared fixtures for the collector integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use tempfile::TempDir;

use hostpulse_collector::error::{MetricsError, MetricsResult, StorageError, StorageResult};
use hostpulse_collector::storage::PersistedRecord;
use hostpulse_collector::{MetricSource, MonitorConfig, NetCounters, RawReading, SampleSink};

pub const TEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

static INIT: Once = Once::new();

/// Route collector logs to the test harness once per binary
pub fn init_test_environment() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("hostpulse_collector=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Fast-ticking configuration with every path inside `dir`
pub fn create_test_config(dir: &TempDir) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.sampling.interval_secs = 0.02;
    config.sampling.duration_secs = 0.3;
    config.alerts.cpu_threshold = 75.0;
    config.window.capacity = 3;
    config.storage.log_path = dir.path().join("metrics.log");
    config.storage.db_path = dir.path().join("system_metrics.db");
    config.storage.report_dir = dir.path().join("reports");
    config
}

type Script = Box<dyn FnMut(usize) -> MetricsResult<RawReading> + Send>;

/// Metric source whose readings come from a closure of the tick index
pub struct ScriptedSource {
    script: Script,
    seed: MetricsResult<NetCounters>,
    calls: usize,
}

impl ScriptedSource {
    pub fn new<F>(script: F) -> Self
    where
        F: FnMut(usize) -> MetricsResult<RawReading> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            seed: Ok(NetCounters::default()),
            calls: 0,
        }
    }

    /// Cycles `cpu` values with steadily growing counters
    pub fn cycling(cpu: Vec<f64>) -> Self {
        Self::new(move |i| Ok(reading(cpu[i % cpu.len()], (i as u64 + 1) * 4096)))
    }

    pub fn failing_seed(mut self) -> Self {
        self.seed = Err(MetricsError::Unavailable {
            reason: "no network interfaces".to_string(),
        });
        self
    }
}

impl MetricSource for ScriptedSource {
    fn sample_instant(&mut self) -> MetricsResult<RawReading> {
        let index = self.calls;
        self.calls += 1;
        (self.script)(index)
    }

    fn read_counters(&mut self) -> MetricsResult<NetCounters> {
        self.seed.clone()
    }
}

pub fn reading(cpu: f64, counter: u64) -> RawReading {
    RawReading {
        cpu_percent: cpu,
        memory_percent: 45.0,
        net_sent_total: counter,
        net_recv_total: counter * 2,
    }
}

/// Sink that records what it was given, optionally failing every write
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub records: Arc<Mutex<Vec<PersistedRecord>>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl SampleSink for RecordingSink {
    fn write(&mut self, record: &PersistedRecord) -> StorageResult<()> {
        if self.fail {
            return Err(StorageError::StoreWrite {
                reason: "database is locked".to_string(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
