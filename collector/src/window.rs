//! Bounded recent-history window
//!
//! The window keeps five parallel series (timestamp, cpu, memory, sent,
//! received) of equal length. Pushing into a full window evicts the oldest
//! entry of every series before appending, so index `i` always refers to the
//! same sample across series.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::RwLock;

use crate::sample::Sample;

/// Upper bound on the slots reserved up front for each series
const PREALLOCATED_SLOTS: usize = 4096;

#[derive(Debug, Clone)]
pub struct Window {
    capacity: usize,
    timestamps: VecDeque<DateTime<Local>>,
    cpu: VecDeque<f64>,
    memory: VecDeque<f64>,
    net_sent: VecDeque<f64>,
    net_recv: VecDeque<f64>,
}

impl Window {
    /// Create an empty window; a capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let reserved = capacity.min(PREALLOCATED_SLOTS);
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(reserved),
            cpu: VecDeque::with_capacity(reserved),
            memory: VecDeque::with_capacity(reserved),
            net_sent: VecDeque::with_capacity(reserved),
            net_recv: VecDeque::with_capacity(reserved),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, sample: &Sample) {
        if self.len() == self.capacity {
            self.timestamps.pop_front();
            self.cpu.pop_front();
            self.memory.pop_front();
            self.net_sent.pop_front();
            self.net_recv.pop_front();
        }

        self.timestamps.push_back(sample.timestamp);
        self.cpu.push_back(sample.cpu_percent);
        self.memory.push_back(sample.memory_percent);
        self.net_sent.push_back(sample.net_sent_kbps);
        self.net_recv.push_back(sample.net_recv_kbps);
    }

    /// Ordered copy of the retained samples, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        (0..self.len())
            .map(|i| Sample {
                timestamp: self.timestamps[i],
                cpu_percent: self.cpu[i],
                memory_percent: self.memory[i],
                net_sent_kbps: self.net_sent[i],
                net_recv_kbps: self.net_recv[i],
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.cpu.clear();
        self.memory.clear();
        self.net_sent.clear();
        self.net_recv.clear();
    }

    pub fn timestamps(&self) -> &VecDeque<DateTime<Local>> {
        &self.timestamps
    }

    pub fn cpu(&self) -> &VecDeque<f64> {
        &self.cpu
    }

    pub fn memory(&self) -> &VecDeque<f64> {
        &self.memory
    }

    pub fn net_sent(&self) -> &VecDeque<f64> {
        &self.net_sent
    }

    pub fn net_recv(&self) -> &VecDeque<f64> {
        &self.net_recv
    }

    pub fn oldest(&self) -> Option<DateTime<Local>> {
        self.timestamps.front().copied()
    }

    pub fn latest(&self) -> Option<Sample> {
        let i = self.len().checked_sub(1)?;
        Some(Sample {
            timestamp: self.timestamps[i],
            cpu_percent: self.cpu[i],
            memory_percent: self.memory[i],
            net_sent_kbps: self.net_sent[i],
            net_recv_kbps: self.net_recv[i],
        })
    }
}

/// Window shared between the collection loop and its readers
///
/// Push and snapshot both take the lock, so a reader sees the window either
/// before or after a push, never half evicted.
#[derive(Debug, Clone)]
pub struct SharedWindow {
    inner: Arc<RwLock<Window>>,
}

impl SharedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Window::new(capacity))),
        }
    }

    pub async fn push(&self, sample: &Sample) -> usize {
        let mut window = self.inner.write().await;
        window.push(sample);
        window.len()
    }

    pub async fn snapshot(&self) -> Vec<Sample> {
        self.inner.read().await.snapshot()
    }

    /// Owned copy of the whole window, for report generation
    pub async fn frozen(&self) -> Window {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn reset(&self) {
        self.inner.write().await.clear();
    }
}
