//! Simulated radio paced by a virtual sample clock
//!
//! Produces low-level noise at the configured rate and accepts transmissions,
//! checking that they arrive in timestamp order and ahead of the receive
//! clock. Used when no peer radio is available.

use crate::radio::{RadioInterface, RfBuffer, RfCounters, RfStats, RxMetadata};
use crate::InterfaceError;
use common::{LogThrottle, RfTimestamp};
use num_complex::Complex32;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static TX_OUT_OF_ORDER: LogThrottle = LogThrottle::new(100);

/// Simulated radio configuration
#[derive(Debug, Clone)]
pub struct SimRfConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Number of channels
    pub num_channels: usize,
    /// Block `rx_now` until the virtual sample clock reaches the last sample
    pub realtime: bool,
    /// Noise amplitude per I/Q component
    pub noise_amplitude: f32,
    /// Report an overflow (and drop one buffer of samples) every N receive calls
    pub overflow_period: Option<u64>,
}

impl Default for SimRfConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.92e6,
            num_channels: 1,
            realtime: true,
            noise_amplitude: 1e-3,
            overflow_period: None,
        }
    }
}

impl SimRfConfig {
    /// Parse "key=value" device arguments
    pub fn from_device_args(args: &str, num_channels: usize) -> Result<Self, InterfaceError> {
        let mut config = Self {
            num_channels,
            ..Self::default()
        };

        for pair in args.split(',') {
            let Some((key, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let invalid = || InterfaceError::InvalidConfig(format!("Invalid {}: {}", key.trim(), value.trim()));
            match key.trim() {
                "base_srate" | "srate" => config.sample_rate = value.trim().parse().map_err(|_| invalid())?,
                "realtime" => config.realtime = value.trim().parse().map_err(|_| invalid())?,
                "noise" => config.noise_amplitude = value.trim().parse().map_err(|_| invalid())?,
                "overflow_period" => config.overflow_period = Some(value.trim().parse().map_err(|_| invalid())?),
                other => debug!("Ignoring unknown sim device argument '{}'", other),
            }
        }

        if !(config.sample_rate > 0.0) || config.num_channels == 0 {
            return Err(InterfaceError::InvalidConfig(
                format!("Invalid sim radio: srate={} channels={}", config.sample_rate, config.num_channels)
            ));
        }
        Ok(config)
    }
}

/// Simulated radio
pub struct SimRadio {
    config: SimRfConfig,
    start: Instant,
    rx_sample_count: AtomicU64,
    rx_calls: AtomicU64,
    last_tx: Mutex<Option<RfTimestamp>>,
    rng: Mutex<StdRng>,
    counters: RfCounters,
}

impl SimRadio {
    /// Create a simulated radio; the sample clock starts now
    pub fn new(config: SimRfConfig) -> Self {
        debug!("Simulated radio: {} channels at {} MHz (realtime={})",
               config.num_channels, config.sample_rate / 1e6, config.realtime);
        Self {
            config,
            start: Instant::now(),
            rx_sample_count: AtomicU64::new(0),
            rx_calls: AtomicU64::new(0),
            last_tx: Mutex::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
            counters: RfCounters::default(),
        }
    }

    fn sample_clock_deadline(&self, sample: u64) -> Instant {
        self.start + Duration::from_secs_f64(sample as f64 / self.config.sample_rate)
    }
}

impl RadioInterface for SimRadio {
    fn rx_now(&self, buffer: &mut RfBuffer) -> Result<RxMetadata, InterfaceError> {
        if buffer.nof_channels() != self.config.num_channels {
            return Err(InterfaceError::ChannelMismatch {
                buffer: buffer.nof_channels(),
                radio: self.config.num_channels,
            });
        }

        let nof_samples = buffer.nof_samples();
        let call = self.rx_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let overflow = self.config.overflow_period.is_some_and(|p| p > 0 && call % p == 0);
        if overflow {
            // Samples lost in the "hardware" before this buffer
            self.rx_sample_count.fetch_add(nof_samples as u64, Ordering::Relaxed);
            self.counters.rx_overruns.fetch_add(1, Ordering::Relaxed);
        }

        let first_sample = self.rx_sample_count.fetch_add(nof_samples as u64, Ordering::Relaxed);
        if self.config.realtime {
            let deadline = self.sample_clock_deadline(first_sample + nof_samples as u64);
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }

        let amplitude = self.config.noise_amplitude;
        {
            let mut rng = self.rng.lock();
            for ch in 0..buffer.nof_channels() {
                for s in buffer.channel_mut(ch) {
                    *s = if amplitude > 0.0 {
                        Complex32::new(rng.gen_range(-amplitude..amplitude), rng.gen_range(-amplitude..amplitude))
                    } else {
                        Complex32::new(0.0, 0.0)
                    };
                }
            }
        }

        self.counters.rx_samples.fetch_add(nof_samples as u64, Ordering::Relaxed);
        Ok(RxMetadata {
            nof_samples,
            timestamp: RfTimestamp::from_samples(first_sample, self.config.sample_rate)?,
            overflow,
        })
    }

    fn tx(&self, buffer: &RfBuffer, timestamp: RfTimestamp) -> Result<(), InterfaceError> {
        let mut last_tx = self.last_tx.lock();
        if let Some(last) = *last_tx {
            if timestamp.as_secs_f64() <= last.as_secs_f64() {
                self.counters.tx_late_packets.fetch_add(1, Ordering::Relaxed);
                if let Some(n) = TX_OUT_OF_ORDER.hit() {
                    warn!("TX at {} not after previous TX at {} ({} so far)", timestamp, last, n);
                }
            }
        }
        *last_tx = Some(timestamp);

        let rx_now = RfTimestamp::from_samples(
            self.rx_sample_count.load(Ordering::Relaxed),
            self.config.sample_rate,
        )?;
        if timestamp.as_secs_f64() < rx_now.as_secs_f64() {
            self.counters.tx_underruns.fetch_add(1, Ordering::Relaxed);
        }

        self.counters.tx_samples.fetch_add(buffer.nof_samples() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn tx_end(&self) {
        self.counters.tx_bursts_ended.fetch_add(1, Ordering::Relaxed);
    }

    fn nof_channels(&self) -> usize {
        self.config.num_channels
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn stats(&self) -> RfStats {
        self.counters.snapshot()
    }
}
