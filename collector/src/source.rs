//! Host metric acquisition
//!
//! A [`MetricSource`] reports instantaneous CPU and memory utilization and
//! the cumulative network byte counters. Turning counters into throughput is
//! the job of [`crate::rate`].

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Networks, System};

use crate::error::{MetricsError, MetricsResult};

/// Raw reading taken from the operating system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub net_sent_total: u64,
    pub net_recv_total: u64,
}

/// Cumulative network byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub sent: u64,
    pub recv: u64,
}

impl RawReading {
    pub fn counters(&self) -> NetCounters {
        NetCounters {
            sent: self.net_sent_total,
            recv: self.net_recv_total,
        }
    }
}

/// Source of host metrics
///
/// `sample_instant` may block while CPU usage is measured, so callers on an
/// async runtime should run it on the blocking pool.
pub trait MetricSource: Send {
    /// Take a full reading
    fn sample_instant(&mut self) -> MetricsResult<RawReading>;

    /// Read only the cumulative network counters, without blocking
    fn read_counters(&mut self) -> MetricsResult<NetCounters>;
}

/// [`MetricSource`] backed by `sysinfo`
pub struct SysinfoSource {
    system: System,
    networks: Networks,
    cpu_window: Duration,
}

impl SysinfoSource {
    pub fn new(cpu_window: Duration) -> MetricsResult<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(MetricsError::Unavailable {
                reason: "platform is not supported by sysinfo".to_string(),
            });
        }

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Ok(Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        })
    }

    fn measure_cpu(&mut self) -> MetricsResult<f64> {
        self.system.refresh_cpu();
        thread::sleep(self.cpu_window);
        self.system.refresh_cpu();

        if self.system.cpus().is_empty() {
            return Err(MetricsError::Unavailable {
                reason: "no CPUs reported".to_string(),
            });
        }

        Ok(self.system.global_cpu_info().cpu_usage() as f64)
    }

    fn measure_memory(&mut self) -> MetricsResult<f64> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(MetricsError::Unavailable {
                reason: "total memory reported as zero".to_string(),
            });
        }

        Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

impl MetricSource for SysinfoSource {
    fn sample_instant(&mut self) -> MetricsResult<RawReading> {
        let cpu_percent = self.measure_cpu()?;
        let memory_percent = self.measure_memory()?;
        let counters = self.read_counters()?;

        tracing::trace!(
            "Raw reading - CPU: {:.2}%, Memory: {:.2}%, Sent: {} B, Recv: {} B",
            cpu_percent,
            memory_percent,
            counters.sent,
            counters.recv
        );

        Ok(RawReading {
            cpu_percent,
            memory_percent,
            net_sent_total: counters.sent,
            net_recv_total: counters.recv,
        })
    }

    fn read_counters(&mut self) -> MetricsResult<NetCounters> {
        // Picks up interfaces that came or went since the last read.
        self.networks.refresh_list();
        self.networks.refresh();

        let counters = self
            .networks
            .iter()
            .fold(NetCounters::default(), |acc, (_, data)| NetCounters {
                sent: acc.sent.saturating_add(data.total_transmitted()),
                recv: acc.recv.saturating_add(data.total_received()),
            });

        Ok(counters)
    }
}
