//! Common Utilities
//!
//! Timing helpers and log throttling shared by the real-time threads

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Number of samples in one subframe at `sample_rate` Hz
pub fn samples_per_subframe(sample_rate: f64, subframe: Duration) -> usize {
    let nof_samples = (sample_rate * subframe.as_secs_f64()).round() as usize;

    trace!("Calculated {} samples per {:?} subframe at {} Hz",
           nof_samples, subframe, sample_rate);

    nof_samples
}

/// Counts repeated events and lets through the first one and every
/// `every`-th after it, so hot loops can warn without flooding the log.
#[derive(Debug)]
pub struct LogThrottle {
    every: u64,
    count: AtomicU64,
}

impl LogThrottle {
    /// Create a throttle that reports every `every` events
    pub const fn new(every: u64) -> Self {
        Self {
            every,
            count: AtomicU64::new(0),
        }
    }

    /// Record one event; returns the running total when it should be logged
    pub fn hit(&self) -> Option<u64> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every <= 1 || count % self.every == 1 {
            Some(count)
        } else {
            None
        }
    }

    /// Events recorded so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_subframe() {
        assert_eq!(samples_per_subframe(1.92e6, Duration::from_millis(1)), 1920);
        assert_eq!(samples_per_subframe(30.72e6, Duration::from_millis(1)), 30720);
        assert_eq!(samples_per_subframe(23.04e6, Duration::from_micros(500)), 11520);
    }

    #[test]
    fn test_log_throttle() {
        let throttle = LogThrottle::new(100);
        assert_eq!(throttle.hit(), Some(1));
        for _ in 0..99 {
            assert!(throttle.hit().is_none());
        }
        assert_eq!(throttle.hit(), Some(101));
        assert_eq!(throttle.count(), 101);
    }
}
