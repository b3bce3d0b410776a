//! Presentation collaborator
//!
//! The collection loop never renders anything itself. It reports alerts,
//! status lines and window snapshots to a [`Presenter`]; the usual
//! implementation forwards them over a channel to a foreground task.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::alert::Alert;
use crate::sample::Sample;

/// Class of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Info,
    /// A counter went backwards
    Anomaly,
    /// Log or store write failed
    Persistence,
    /// A metric read failed and the tick was skipped
    Metrics,
    /// An insight report was written
    Report,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusKind::Info => "info",
            StatusKind::Anomaly => "anomaly",
            StatusKind::Persistence => "persistence",
            StatusKind::Metrics => "metrics",
            StatusKind::Report => "report",
        };
        f.write_str(label)
    }
}

pub trait Presenter: Send + Sync {
    fn on_alert(&self, alert: &Alert);
    fn on_status(&self, kind: StatusKind, text: &str);
    fn refresh(&self, snapshot: &[Sample]);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    Alert(Alert),
    Status { kind: StatusKind, text: String },
    Refresh(Vec<Sample>),
}

/// [`Presenter`] that forwards every call as a [`PresentationEvent`]
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<PresentationEvent>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PresentationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PresentationEvent) {
        // The consumer going away must not stop collection.
        if self.tx.send(event).is_err() {
            tracing::debug!("Presentation channel closed, dropping event");
        }
    }
}

impl Presenter for ChannelPresenter {
    fn on_alert(&self, alert: &Alert) {
        self.send(PresentationEvent::Alert(alert.clone()));
    }

    fn on_status(&self, kind: StatusKind, text: &str) {
        self.send(PresentationEvent::Status {
            kind,
            text: text.to_string(),
        });
    }

    fn refresh(&self, snapshot: &[Sample]) {
        self.send(PresentationEvent::Refresh(snapshot.to_vec()));
    }
}

/// One-line summary of the newest sample in a snapshot
pub fn summary_line(snapshot: &[Sample]) -> Option<String> {
    let latest = snapshot.last()?;
    Some(format!(
        "[{}] CPU: {:.2}%  Memory: {:.2}%  Sent: {:.2} KB/s  Recv: {:.2} KB/s  ({} samples)",
        latest.clock_label(),
        latest.cpu_percent,
        latest.memory_percent,
        latest.net_sent_kbps,
        latest.net_recv_kbps,
        snapshot.len()
    ))
}

/// Foreground consumer that prints events to the terminal until the channel
/// closes
pub async fn run_console(mut rx: mpsc::UnboundedReceiver<PresentationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PresentationEvent::Alert(alert) => println!("{}", alert),
            PresentationEvent::Status { kind: StatusKind::Info, text } => println!("{}", text),
            PresentationEvent::Status { kind, text } => println!("[{}] {}", kind, text),
            PresentationEvent::Refresh(snapshot) => {
                if let Some(line) = summary_line(&snapshot) {
                    println!("{}", line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert;
    use chrono::{Local, TimeZone};

    #[tokio::test]
    async fn test_channel_presenter_forwards_in_order() {
        let (presenter, mut rx) = ChannelPresenter::new();
        let alert = alert::evaluate(90.0, 75.0).unwrap();
        let ts = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sample = Sample::new(ts, 90.0, 40.0, 1.0, 2.0);

        presenter.on_alert(&alert);
        presenter.on_status(StatusKind::Persistence, "store failed");
        presenter.refresh(std::slice::from_ref(&sample));
        drop(presenter);

        assert_eq!(rx.recv().await, Some(PresentationEvent::Alert(alert)));
        assert_eq!(
            rx.recv().await,
            Some(PresentationEvent::Status {
                kind: StatusKind::Persistence,
                text: "store failed".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(PresentationEvent::Refresh(vec![sample])));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (presenter, rx) = ChannelPresenter::new();
        drop(rx);
        presenter.on_status(StatusKind::Info, "nobody listening");
    }

    #[test]
    fn test_summary_line() {
        assert!(summary_line(&[]).is_none());

        let ts = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let line = summary_line(&[Sample::new(ts, 12.5, 40.0, 1.0, 2.0)]).unwrap();
        assert!(line.starts_with("[09:05:07] CPU: 12.50%"));
        assert!(line.ends_with("(1 samples)"));
    }
}
