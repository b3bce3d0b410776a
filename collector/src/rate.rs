//! Network throughput derived from cumulative byte counters

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::source::NetCounters;

/// Previous cumulative counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub prev_net_sent: u64,
    pub prev_net_recv: u64,
}

impl From<NetCounters> for CounterState {
    fn from(counters: NetCounters) -> Self {
        Self {
            prev_net_sent: counters.sent,
            prev_net_recv: counters.recv,
        }
    }
}

/// Which counter misbehaved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Counter {
    Sent,
    Recv,
}

/// A cumulative counter went backwards (interface reset or wrap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAnomaly {
    pub counter: Counter,
    pub previous: u64,
    pub current: u64,
}

impl fmt::Display for CounterAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.counter {
            Counter::Sent => "sent",
            Counter::Recv => "received",
        };
        write!(
            f,
            "network {} counter went backwards ({} -> {}), rate clamped to 0",
            name, self.previous, self.current
        )
    }
}

/// Result of one rate derivation
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    /// Bytes per second sent
    pub sent_rate: f64,
    /// Bytes per second received
    pub recv_rate: f64,
    /// State to feed into the next derivation
    pub state: CounterState,
    pub anomalies: Vec<CounterAnomaly>,
}

/// Derive per-second rates from two counter readings.
///
/// A decreasing counter yields a rate of 0 and a [`CounterAnomaly`]; a
/// non-positive interval yields zero rates.
pub fn derive(
    prev: CounterState,
    cur_sent: u64,
    cur_recv: u64,
    interval_seconds: f64,
) -> Derivation {
    let mut anomalies = Vec::new();

    let sent_rate = rate_of(
        Counter::Sent,
        prev.prev_net_sent,
        cur_sent,
        interval_seconds,
        &mut anomalies,
    );
    let recv_rate = rate_of(
        Counter::Recv,
        prev.prev_net_recv,
        cur_recv,
        interval_seconds,
        &mut anomalies,
    );

    Derivation {
        sent_rate,
        recv_rate,
        state: CounterState {
            prev_net_sent: cur_sent,
            prev_net_recv: cur_recv,
        },
        anomalies,
    }
}

fn rate_of(
    counter: Counter,
    previous: u64,
    current: u64,
    interval_seconds: f64,
    anomalies: &mut Vec<CounterAnomaly>,
) -> f64 {
    if current < previous {
        anomalies.push(CounterAnomaly { counter, previous, current });
        return 0.0;
    }

    if interval_seconds.is_nan() || interval_seconds <= 0.0 {
        return 0.0;
    }

    (current - previous) as f64 / interval_seconds
}

/// Stateful wrapper that owns the counter state for one collection run
///
/// The interval passed to [`derive`] is the real time elapsed between
/// counter reads, so skipped ticks do not inflate the next rate.
#[derive(Debug, Clone)]
pub struct RateDeriver {
    state: CounterState,
    last_read: Instant,
}

impl RateDeriver {
    /// Seed from the initial counter read taken before the loop starts
    pub fn seeded(counters: NetCounters) -> Self {
        Self::seeded_at(counters, Instant::now())
    }

    pub fn seeded_at(counters: NetCounters, at: Instant) -> Self {
        Self {
            state: counters.into(),
            last_read: at,
        }
    }

    pub fn state(&self) -> CounterState {
        self.state
    }

    pub fn advance(&mut self, counters: NetCounters) -> Derivation {
        self.advance_at(counters, Instant::now())
    }

    pub fn advance_at(&mut self, counters: NetCounters, at: Instant) -> Derivation {
        let elapsed = at.saturating_duration_since(self.last_read).as_secs_f64();
        let derivation = derive(self.state, counters.sent, counters.recv, elapsed);

        for anomaly in &derivation.anomalies {
            tracing::warn!("Counter anomaly: {}", anomaly);
        }

        self.state = derivation.state;
        self.last_read = at;
        derivation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state(sent: u64, recv: u64) -> CounterState {
        CounterState { prev_net_sent: sent, prev_net_recv: recv }
    }

    #[test]
    fn test_rate_is_delta_over_interval() {
        let d = derive(state(1000, 500), 6000, 3000, 5.0);
        assert_eq!(d.sent_rate, 1000.0);
        assert_eq!(d.recv_rate, 500.0);
        assert_eq!(d.state, state(6000, 3000));
        assert!(d.anomalies.is_empty());
    }

    #[test]
    fn test_unchanged_counter_gives_zero_without_anomaly() {
        let d = derive(state(1000, 1000), 1000, 1000, 5.0);
        assert_eq!(d.sent_rate, 0.0);
        assert!(d.anomalies.is_empty());
    }

    #[test]
    fn test_counter_reset_is_clamped_and_flagged() {
        let d = derive(state(2000, 100), 1000, 600, 5.0);
        assert_eq!(d.sent_rate, 0.0);
        assert_eq!(d.recv_rate, 100.0);
        assert_eq!(
            d.anomalies,
            vec![CounterAnomaly { counter: Counter::Sent, previous: 2000, current: 1000 }]
        );
        // The reset value becomes the new baseline.
        assert_eq!(d.state.prev_net_sent, 1000);
    }

    #[test]
    fn test_zero_interval_gives_zero_rates() {
        let d = derive(state(0, 0), 4096, 4096, 0.0);
        assert_eq!(d.sent_rate, 0.0);
        assert_eq!(d.recv_rate, 0.0);
        assert!(d.anomalies.is_empty());
    }

    #[test]
    fn test_deriver_uses_elapsed_time() {
        let start = Instant::now();
        let mut deriver = RateDeriver::seeded_at(NetCounters { sent: 0, recv: 0 }, start);

        let counters = NetCounters { sent: 2048, recv: 1024 };
        let d = deriver.advance_at(counters, start + Duration::from_secs(2));
        assert_eq!(d.sent_rate, 1024.0);
        assert_eq!(d.recv_rate, 512.0);

        let counters = NetCounters { sent: 2048, recv: 4096 };
        let d = deriver.advance_at(counters, start + Duration::from_secs(4));
        assert_eq!(d.sent_rate, 0.0);
        assert_eq!(d.recv_rate, 1536.0);
        assert_eq!(deriver.state(), state(2048, 4096));
    }
}
