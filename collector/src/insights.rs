//! Summary statistics and warnings over the recent-history window
//!
//! [`generate`] is pure: it reads a [`Window`] and produces an
//! [`InsightReport`]. Writing the report to disk is the job of
//! [`ReportWriter`], which never overwrites an earlier report.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::error::{StorageError, StorageResult};
use crate::sample::LOG_TIMESTAMP_FORMAT;
use crate::window::Window;

const REPORT_TITLE: &str = "System Monitoring Insights";
const REPORT_FILE_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Names tried per report before giving up
const MAX_REPORT_ATTEMPTS: u32 = 1000;

/// Limits that turn statistics into warnings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsightThresholds {
    /// CPU percent the maximum must exceed
    pub cpu: f64,
    /// Memory percent the maximum must exceed
    pub memory: f64,
    /// KB/s either network average must exceed
    pub network_kbps: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for InsightThresholds {
    fn from(config: &AlertConfig) -> Self {
        Self {
            cpu: config.cpu_threshold,
            memory: config.memory_warning_percent,
            network_kbps: config.network_notice_kbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsightWarning {
    HighCpu { max: f64 },
    HighMemory { max: f64 },
    HighNetwork,
}

impl fmt::Display for InsightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightWarning::HighCpu { max } => write!(
                f,
                "WARNING: High CPU usage detected (Max: {:.2}%). \
                 Consider closing heavy applications.",
                max
            ),
            InsightWarning::HighMemory { max } => write!(
                f,
                "WARNING: High memory usage detected (Max: {:.2}%). \
                 Free up memory or add more RAM.",
                max
            ),
            InsightWarning::HighNetwork => {
                write!(f, "NOTICE: High network activity detected. Check for large data transfers.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub generated_at: DateTime<Local>,
    /// Samples the statistics were computed over
    pub samples: usize,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: f64,
    pub net_sent_avg: f64,
    pub net_recv_avg: f64,
    pub warnings: Vec<InsightWarning>,
}

impl InsightReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Plain-text report body
    pub fn render(&self) -> String {
        let mut lines = vec![
            REPORT_TITLE.to_string(),
            "=".repeat(25),
            format!("Generated at: {}", self.generated_at.format(LOG_TIMESTAMP_FORMAT)),
            format!("CPU Usage - Avg: {:.2}%, Max: {:.2}%", self.cpu_avg, self.cpu_max),
            format!("Memory Usage - Avg: {:.2}%, Max: {:.2}%", self.memory_avg, self.memory_max),
            format!("Network Sent - Avg: {:.2} KB/s", self.net_sent_avg),
            format!("Network Received - Avg: {:.2} KB/s", self.net_recv_avg),
        ];

        if self.has_warnings() {
            lines.push(String::new());
            lines.extend(self.warnings.iter().map(ToString::to_string));
        }

        lines.join("\n")
    }
}

/// Compute statistics over the window. An empty window yields all zeros and
/// no warnings.
pub fn generate(window: &Window, thresholds: &InsightThresholds) -> InsightReport {
    generate_at(window, thresholds, Local::now())
}

pub fn generate_at(
    window: &Window,
    thresholds: &InsightThresholds,
    at: DateTime<Local>,
) -> InsightReport {
    let (cpu_avg, cpu_max) = mean_max(window.cpu().iter().copied());
    let (memory_avg, memory_max) = mean_max(window.memory().iter().copied());
    let (net_sent_avg, _) = mean_max(window.net_sent().iter().copied());
    let (net_recv_avg, _) = mean_max(window.net_recv().iter().copied());

    let mut warnings = Vec::new();
    if cpu_max > thresholds.cpu {
        warnings.push(InsightWarning::HighCpu { max: cpu_max });
    }
    if memory_max > thresholds.memory {
        warnings.push(InsightWarning::HighMemory { max: memory_max });
    }
    if net_sent_avg > thresholds.network_kbps || net_recv_avg > thresholds.network_kbps {
        warnings.push(InsightWarning::HighNetwork);
    }

    InsightReport {
        generated_at: at,
        samples: window.len(),
        cpu_avg,
        cpu_max,
        memory_avg,
        memory_max,
        net_sent_avg,
        net_recv_avg,
        warnings,
    }
}

fn mean_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (count, sum, max) = values.fold((0usize, 0.0, f64::NEG_INFINITY), |(n, sum, max), v| {
        (n + 1, sum + v, max.max(v))
    });

    if count == 0 {
        (0.0, 0.0)
    } else {
        (sum / count as f64, max)
    }
}

/// Writes rendered reports into a directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    max_attempts: u32,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_attempts: MAX_REPORT_ATTEMPTS,
        }
    }

    /// Limit how many `_N` suffixes are tried for one timestamp
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `report` to `insights_YYYYMMDD_HHMMSS.txt`, adding `_1`, `_2`,
    /// ... when that name is already taken.
    pub fn write(&self, report: &InsightReport) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::ReportWrite {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let stem = format!("insights_{}", report.generated_at.format(REPORT_FILE_FORMAT));
        let body = report.render();

        for attempt in 0..self.max_attempts {
            let name = if attempt == 0 {
                format!("{}.txt", stem)
            } else {
                format!("{}_{}.txt", stem, attempt)
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())
                        .and_then(|_| file.flush())
                        .map_err(|e| report_error(&path, e))?;
                    tracing::info!("Insights saved to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(report_error(&path, e)),
            }
        }

        Err(StorageError::ReportWrite {
            path: self.dir.display().to_string(),
            reason: "no free report name".to_string(),
        })
    }
}

fn report_error(path: &Path, e: io::Error) -> StorageError {
    StorageError::ReportWrite {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn window_of(cpu: &[f64], memory: f64, net_kbps: f64) -> Window {
        let base = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut window = Window::new(cpu.len().max(1));
        for (i, value) in cpu.iter().enumerate() {
            let ts = base + chrono::Duration::seconds(i as i64);
            window.push(&Sample::new(ts, *value, memory, net_kbps, 0.0));
        }
        window
    }

    #[test]
    fn test_empty_window_is_all_zero() {
        let report = generate(&Window::new(5), &InsightThresholds::default());
        assert_eq!(report.samples, 0);
        assert_eq!(report.cpu_avg, 0.0);
        assert_eq!(report.cpu_max, 0.0);
        assert_eq!(report.memory_avg, 0.0);
        assert_eq!(report.memory_max, 0.0);
        assert_eq!(report.net_sent_avg, 0.0);
        assert_eq!(report.net_recv_avg, 0.0);
        assert!(!report.has_warnings());
    }

    #[test]
    fn test_capacity_three_scenario() {
        let window = window_of(&[10.0, 20.0, 90.0], 50.0, 1.0);
        let thresholds = InsightThresholds {
            cpu: 75.0,
            ..InsightThresholds::default()
        };

        let report = generate(&window, &thresholds);
        assert_eq!(report.cpu_avg, 40.0);
        assert_eq!(report.cpu_max, 90.0);
        assert_eq!(report.warnings, vec![InsightWarning::HighCpu { max: 90.0 }]);
    }

    #[test]
    fn test_memory_and_network_warnings() {
        let window = window_of(&[5.0, 5.0], 95.0, 2048.0);
        let report = generate(&window, &InsightThresholds::default());
        assert_eq!(
            report.warnings,
            vec![InsightWarning::HighMemory { max: 95.0 }, InsightWarning::HighNetwork]
        );
    }

    #[test]
    fn test_render_layout() {
        let window = window_of(&[10.0, 20.0, 90.0], 50.0, 1.0);
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        let report = generate_at(&window, &InsightThresholds::default(), at);

        let text = report.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "System Monitoring Insights");
        assert_eq!(lines[1], "=========================");
        assert_eq!(lines[2], "Generated at: 2024-03-01 12:00:05");
        assert_eq!(lines[3], "CPU Usage - Avg: 40.00%, Max: 90.00%");
        assert_eq!(lines[4], "Memory Usage - Avg: 50.00%, Max: 50.00%");
        assert_eq!(lines[5], "Network Sent - Avg: 1.00 KB/s");
        assert_eq!(lines[6], "Network Received - Avg: 0.00 KB/s");
        assert_eq!(lines[7], "");
        assert!(lines[8].starts_with("WARNING: High CPU usage detected (Max: 90.00%)"));
    }

    #[test]
    fn test_repeated_reports_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"));
        let window = window_of(&[10.0, 20.0, 90.0], 50.0, 1.0);
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();

        let first = generate_at(&window, &InsightThresholds::default(), at);
        let second = generate_at(&window, &InsightThresholds::default(), at);
        assert_eq!(first, second);

        let first_path = writer.write(&first).unwrap();
        let second_path = writer.write(&second).unwrap();

        assert_ne!(first_path, second_path);
        assert!(first_path.ends_with("insights_20240301_120005.txt"));
        assert!(second_path.ends_with("insights_20240301_120005_1.txt"));
        assert_eq!(fs::read_to_string(&first_path).unwrap(), first.render());
    }

    #[test]
    fn test_exhausted_report_names_fail() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path()).with_max_attempts(2);
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        let report = generate_at(&Window::new(3), &InsightThresholds::default(), at);

        fs::write(dir.path().join("insights_20240301_120005.txt"), "taken").unwrap();
        fs::write(dir.path().join("insights_20240301_120005_1.txt"), "taken").unwrap();

        let err = writer.write(&report).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ReportWrite { ref reason, .. } if reason == "no free report name"
        ));
        // Existing reports are left alone.
        let kept = fs::read_to_string(dir.path().join("insights_20240301_120005.txt")).unwrap();
        assert_eq!(kept, "taken");
    }
}
