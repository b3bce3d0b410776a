//! Sample data model shared by every stage of the pipeline

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the sample log and the store
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp layout used for chart axes
pub const CLOCK_FORMAT: &str = "%H:%M:%S";

/// Bytes in one kilobyte, as used for every network figure
pub const BYTES_PER_KB: f64 = 1024.0;

/// One tick's worth of host metrics
///
/// Network rates are stored in KB/s. Percentages are clamped into
/// `[0, 100]` on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub net_sent_kbps: f64,
    pub net_recv_kbps: f64,
}

impl Sample {
    pub fn new(
        timestamp: DateTime<Local>,
        cpu_percent: f64,
        memory_percent: f64,
        net_sent_kbps: f64,
        net_recv_kbps: f64,
    ) -> Self {
        Self {
            timestamp,
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent: memory_percent.clamp(0.0, 100.0),
            net_sent_kbps: net_sent_kbps.max(0.0),
            net_recv_kbps: net_recv_kbps.max(0.0),
        }
    }

    /// Build a sample from byte-per-second rates
    pub fn from_byte_rates(
        timestamp: DateTime<Local>,
        cpu_percent: f64,
        memory_percent: f64,
        sent_bytes_per_sec: f64,
        recv_bytes_per_sec: f64,
    ) -> Self {
        Self::new(
            timestamp,
            cpu_percent,
            memory_percent,
            sent_bytes_per_sec / BYTES_PER_KB,
            recv_bytes_per_sec / BYTES_PER_KB,
        )
    }

    /// Timestamp as written to the log and the store
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(LOG_TIMESTAMP_FORMAT).to_string()
    }

    /// Timestamp as shown on chart axes
    pub fn clock_label(&self) -> String {
        self.timestamp.format(CLOCK_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_percentages_are_clamped() {
        let ts = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sample = Sample::new(ts, 101.5, -2.0, -1.0, 3.0);
        assert_eq!(sample.cpu_percent, 100.0);
        assert_eq!(sample.memory_percent, 0.0);
        assert_eq!(sample.net_sent_kbps, 0.0);
        assert_eq!(sample.net_recv_kbps, 3.0);
    }

    #[test]
    fn test_byte_rates_convert_to_kb() {
        let ts = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sample = Sample::from_byte_rates(ts, 10.0, 20.0, 2048.0, 512.0);
        assert_eq!(sample.net_sent_kbps, 2.0);
        assert_eq!(sample.net_recv_kbps, 0.5);
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let sample = Sample::new(ts, 1.0, 1.0, 0.0, 0.0);
        assert_eq!(sample.formatted_timestamp(), "2024-03-01 09:05:07");
        assert_eq!(sample.clock_label(), "09:05:07");
    }
}
