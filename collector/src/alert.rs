//! CPU threshold alerts
//!
//! Evaluation is stateless: an alert fires on every tick where the CPU
//! reading is strictly above the threshold, including consecutive ticks of a
//! sustained overload.

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub triggered_at: DateTime<Local>,
    pub observed_value: f64,
    pub threshold: f64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALERT: CPU usage ({:.2}%) exceeds threshold ({}%)!",
            self.observed_value, self.threshold
        )
    }
}

/// Alert iff `cpu_percent > threshold`
pub fn evaluate(cpu_percent: f64, threshold: f64) -> Option<Alert> {
    evaluate_at(cpu_percent, threshold, Local::now())
}

pub fn evaluate_at(cpu_percent: f64, threshold: f64, at: DateTime<Local>) -> Option<Alert> {
    (cpu_percent > threshold).then(|| Alert {
        triggered_at: at,
        observed_value: cpu_percent,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_to_threshold_does_not_alert() {
        assert!(evaluate(75.0, 75.0).is_none());
    }

    #[test]
    fn test_just_above_threshold_alerts() {
        let alert = evaluate(75.01, 75.0).unwrap();
        assert_eq!(alert.observed_value, 75.01);
        assert_eq!(alert.threshold, 75.0);
    }

    #[test]
    fn test_below_threshold_does_not_alert() {
        assert!(evaluate(10.0, 75.0).is_none());
        assert!(evaluate(0.0, 0.0).is_none());
    }

    #[test]
    fn test_sustained_overload_alerts_every_time() {
        let fired = (0..5).filter_map(|_| evaluate(99.0, 75.0)).count();
        assert_eq!(fired, 5);
    }

    #[test]
    fn test_alert_message() {
        let alert = evaluate(91.234, 75.0).unwrap();
        assert_eq!(alert.to_string(), "ALERT: CPU usage (91.23%) exceeds threshold (75%)!");
    }
}
