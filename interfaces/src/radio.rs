//! Radio boundary
//!
//! The PHY pipeline talks to any radio through `RadioInterface`. Timestamps
//! are hardware timestamps; the pipeline never assumes they match wall-clock
//! time.

use crate::InterfaceError;
use common::RfTimestamp;
use num_complex::Complex32;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Multi-channel baseband sample buffer (one channel per RF port and antenna)
#[derive(Debug, Clone, PartialEq)]
pub struct RfBuffer {
    channels: Vec<Vec<Complex32>>,
    nof_samples: usize,
}

impl RfBuffer {
    /// Create a zeroed buffer of `nof_channels` x `nof_samples`
    pub fn new(nof_channels: usize, nof_samples: usize) -> Self {
        Self {
            channels: vec![vec![Complex32::new(0.0, 0.0); nof_samples]; nof_channels],
            nof_samples,
        }
    }

    /// Create from per-channel sample vectors
    pub fn from_channels(channels: Vec<Vec<Complex32>>) -> Self {
        let nof_samples = channels.iter().map(Vec::len).min().unwrap_or(0);
        Self { channels, nof_samples }
    }

    /// Number of channels
    pub fn nof_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of valid samples per channel
    pub fn nof_samples(&self) -> usize {
        self.nof_samples
    }

    /// Change the number of valid samples, growing storage if needed
    pub fn set_nof_samples(&mut self, nof_samples: usize) {
        for ch in &mut self.channels {
            if ch.len() < nof_samples {
                ch.resize(nof_samples, Complex32::new(0.0, 0.0));
            }
        }
        self.nof_samples = nof_samples;
    }

    /// Valid samples of channel `ch`
    pub fn channel(&self, ch: usize) -> &[Complex32] {
        &self.channels[ch][..self.nof_samples]
    }

    /// Mutable valid samples of channel `ch`
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Complex32] {
        let n = self.nof_samples;
        &mut self.channels[ch][..n]
    }

    /// Zero every channel
    pub fn zero(&mut self) {
        for ch in &mut self.channels {
            ch.iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
        }
    }

    /// Zero the valid samples from `start` on in every channel
    pub fn zero_from(&mut self, start: usize) {
        let end = self.nof_samples;
        for ch in &mut self.channels {
            if start < end {
                ch[start..end].iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
            }
        }
    }

    /// Overwrite channel `dst` with `src`
    pub fn copy_channel(&mut self, dst: usize, src: &[Complex32]) {
        let n = self.nof_samples.min(src.len());
        self.channels[dst][..n].copy_from_slice(&src[..n]);
    }

    /// Add `src` sample by sample into channel `dst`
    pub fn combine_channel(&mut self, dst: usize, src: &[Complex32]) {
        let n = self.nof_samples.min(src.len());
        for (d, s) in self.channels[dst][..n].iter_mut().zip(&src[..n]) {
            *d += *s;
        }
    }

    /// True if every valid sample is zero
    pub fn is_zero(&self) -> bool {
        self.channels
            .iter()
            .all(|ch| ch[..self.nof_samples].iter().all(|s| s.re == 0.0 && s.im == 0.0))
    }

    /// Mean power of channel `ch`
    pub fn avg_power(&self, ch: usize) -> f32 {
        let samples = self.channel(ch);
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
    }
}

/// Result of one receive call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxMetadata {
    /// Samples written per channel
    pub nof_samples: usize,
    /// Hardware time of the first sample
    pub timestamp: RfTimestamp,
    /// Samples were lost before this buffer
    pub overflow: bool,
}

/// TX/RX statistics snapshot
#[derive(Debug, Default, Clone, Serialize)]
pub struct RfStats {
    pub tx_samples: u64,
    pub rx_samples: u64,
    pub tx_underruns: u64,
    pub rx_overruns: u64,
    pub tx_late_packets: u64,
    pub tx_bursts_ended: u64,
}

/// Lock-free counters behind `RfStats`
#[derive(Debug, Default)]
pub struct RfCounters {
    pub tx_samples: AtomicU64,
    pub rx_samples: AtomicU64,
    pub tx_underruns: AtomicU64,
    pub rx_overruns: AtomicU64,
    pub tx_late_packets: AtomicU64,
    pub tx_bursts_ended: AtomicU64,
}

impl RfCounters {
    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self) -> RfStats {
        RfStats {
            tx_samples: self.tx_samples.load(Ordering::Relaxed),
            rx_samples: self.rx_samples.load(Ordering::Relaxed),
            tx_underruns: self.tx_underruns.load(Ordering::Relaxed),
            rx_overruns: self.rx_overruns.load(Ordering::Relaxed),
            tx_late_packets: self.tx_late_packets.load(Ordering::Relaxed),
            tx_bursts_ended: self.tx_bursts_ended.load(Ordering::Relaxed),
        }
    }
}

/// Radio/RF driver boundary
///
/// `rx_now` is called only by the driver loop. `tx` and `tx_end` are called
/// by whichever worker thread holds the transmit ticket, so implementations
/// must be `Sync`.
pub trait RadioInterface: Send + Sync {
    /// Block until `buffer.nof_samples()` samples per channel are available
    fn rx_now(&self, buffer: &mut RfBuffer) -> Result<RxMetadata, InterfaceError>;

    /// Queue `buffer` for transmission at hardware time `timestamp`
    fn tx(&self, buffer: &RfBuffer, timestamp: RfTimestamp) -> Result<(), InterfaceError>;

    /// Close the current transmission burst
    fn tx_end(&self);

    /// Radio keeps transmitting between bursts (zeros are sent when idle)
    fn is_continuous_tx(&self) -> bool {
        true
    }

    /// Number of RF channels (ports x antennas)
    fn nof_channels(&self) -> usize;

    /// Baseband sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Counters since start
    fn stats(&self) -> RfStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_sums_channels() {
        let mut buffer = RfBuffer::new(2, 4);
        let src = vec![Complex32::new(1.0, -1.0); 4];
        buffer.combine_channel(1, &src);
        buffer.combine_channel(1, &src);

        assert!(buffer.channel(0).iter().all(|s| *s == Complex32::new(0.0, 0.0)));
        assert!(buffer.channel(1).iter().all(|s| *s == Complex32::new(2.0, -2.0)));

        buffer.zero();
        assert!(buffer.is_zero());
    }

    #[test]
    fn test_set_nof_samples_limits_view() {
        let mut buffer = RfBuffer::new(1, 8);
        buffer.set_nof_samples(3);
        assert_eq!(buffer.channel(0).len(), 3);
        buffer.set_nof_samples(16);
        assert_eq!(buffer.channel_mut(0).len(), 16);
    }

    #[test]
    fn test_zero_from_clears_tail_only() {
        let mut buffer = RfBuffer::from_channels(vec![vec![Complex32::new(1.0, 0.0); 6]; 2]);
        buffer.zero_from(4);
        for ch in 0..2 {
            assert!(buffer.channel(ch)[..4].iter().all(|s| s.re == 1.0));
            assert!(buffer.channel(ch)[4..].iter().all(|s| s.re == 0.0));
        }
        buffer.zero_from(10);
        assert!(!buffer.is_zero());
    }

    #[test]
    fn test_avg_power() {
        let buffer = RfBuffer::from_channels(vec![vec![Complex32::new(1.0, 1.0); 10]]);
        assert!((buffer.avg_power(0) - 2.0).abs() < 1e-6);
    }
}
