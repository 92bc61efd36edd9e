//! PHY runtime counters
//!
//! Updated from the real-time threads with relaxed atomics and read as a
//! `PhyMetrics` snapshot by whoever reports statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time copy of the PHY counters
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PhyMetrics {
    /// Subframes handed to workers by the driver loop
    pub subframes: u64,
    /// Radio transmissions issued by the coordinator
    pub tx_count: u64,
    /// Bursts closed with `tx_end`
    pub tx_end_count: u64,
    /// Receive calls that reported lost samples
    pub rx_overflows: u64,
    /// Receive calls that failed outright
    pub rx_errors: u64,
    /// Transmit calls rejected by the radio
    pub tx_errors: u64,
    /// Driver iterations that missed their deadline
    pub late_iterations: u64,
    /// `wait_worker` calls blocked longer than one subframe
    pub worker_stalls: u64,
    pub max_stall_us: u64,
    pub max_worker_us: u64,
    pub avg_worker_us: f64,
    pub prach_detections: u64,
    pub prach_dropped: u64,
}

/// Shared counters behind `PhyMetrics`
#[derive(Debug, Default)]
pub struct MetricsCounters {
    subframes: AtomicU64,
    tx_count: AtomicU64,
    tx_end_count: AtomicU64,
    rx_overflows: AtomicU64,
    rx_errors: AtomicU64,
    tx_errors: AtomicU64,
    late_iterations: AtomicU64,
    worker_stalls: AtomicU64,
    max_stall_us: AtomicU64,
    worker_runs: AtomicU64,
    worker_total_us: AtomicU64,
    max_worker_us: AtomicU64,
    prach_detections: AtomicU64,
    prach_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl MetricsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subframe(&self) {
        bump(&self.subframes);
    }

    pub fn tx(&self) {
        bump(&self.tx_count);
    }

    pub fn tx_end(&self) {
        bump(&self.tx_end_count);
    }

    pub fn rx_overflow(&self) {
        bump(&self.rx_overflows);
    }

    pub fn rx_error(&self) {
        bump(&self.rx_errors);
    }

    pub fn tx_error(&self) {
        bump(&self.tx_errors);
    }

    pub fn late_iteration(&self) {
        bump(&self.late_iterations);
    }

    pub fn prach_detection(&self) {
        bump(&self.prach_detections);
    }

    pub fn prach_dropped(&self) {
        bump(&self.prach_dropped);
    }

    /// Record a `wait_worker` stall of `waited`
    pub fn worker_stall(&self, waited: Duration) {
        bump(&self.worker_stalls);
        self.max_stall_us.fetch_max(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one worker's compute time
    pub fn worker_time(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        bump(&self.worker_runs);
        self.worker_total_us.fetch_add(us, Ordering::Relaxed);
        self.max_worker_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PhyMetrics {
        let runs = self.worker_runs.load(Ordering::Relaxed);
        let total = self.worker_total_us.load(Ordering::Relaxed);
        PhyMetrics {
            subframes: self.subframes.load(Ordering::Relaxed),
            tx_count: self.tx_count.load(Ordering::Relaxed),
            tx_end_count: self.tx_end_count.load(Ordering::Relaxed),
            rx_overflows: self.rx_overflows.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            late_iterations: self.late_iterations.load(Ordering::Relaxed),
            worker_stalls: self.worker_stalls.load(Ordering::Relaxed),
            max_stall_us: self.max_stall_us.load(Ordering::Relaxed),
            max_worker_us: self.max_worker_us.load(Ordering::Relaxed),
            avg_worker_us: if runs > 0 { total as f64 / runs as f64 } else { 0.0 },
            prach_detections: self.prach_detections.load(Ordering::Relaxed),
            prach_dropped: self.prach_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_time_aggregates() {
        let counters = MetricsCounters::new();
        counters.worker_time(Duration::from_micros(100));
        counters.worker_time(Duration::from_micros(300));
        let m = counters.snapshot();
        assert_eq!(m.max_worker_us, 300);
        assert!((m.avg_worker_us - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stall_tracks_maximum() {
        let counters = MetricsCounters::new();
        counters.worker_stall(Duration::from_millis(3));
        counters.worker_stall(Duration::from_millis(2));
        let m = counters.snapshot();
        assert_eq!(m.worker_stalls, 2);
        assert_eq!(m.max_stall_us, 3000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let counters = MetricsCounters::new();
        counters.subframe();
        counters.tx();
        let json = serde_json::to_string(&counters.snapshot()).unwrap();
        assert!(json.contains("\"subframes\":1"));
        assert!(json.contains("\"tx_count\":1"));
    }
}
