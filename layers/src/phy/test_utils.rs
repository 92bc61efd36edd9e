//! Test doubles for the radio, stack and processing task

use super::prach_worker::PrachDetection;
use super::processor::{ProcessorFactory, SubframeProcessor};
use super::phy_common::PhyCommon;
use super::sf_worker::WorkerContext;
use crate::stack::PhyStackInterface;
use common::{RfTimestamp, Tti};
use interfaces::{InterfaceError, RadioInterface, RfBuffer, RfStats, RxMetadata};
use num_complex::Complex32;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Poll `cond` every millisecond until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// One observed `tx` call
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub timestamp: RfTimestamp,
    /// Real part of sample 0 per channel
    pub first_samples: Vec<f32>,
    /// Real part of sample 1 per channel
    pub second_samples: Vec<f32>,
}

/// Radio returning immediately, one subframe per call, 1 s + n ms timestamps
pub struct MockRadio {
    nof_channels: usize,
    sf_len: usize,
    continuous: bool,
    fail_rx_at: Option<u64>,
    overflow_at: Option<u64>,
    short_rx_at: Option<(u64, usize)>,
    rx_samples: Option<Vec<Complex32>>,
    rx_count: AtomicU64,
    transmissions: Mutex<Vec<TxRecord>>,
    tx_ends: AtomicU64,
}

impl MockRadio {
    pub fn new(nof_channels: usize, sf_len: usize) -> Self {
        Self {
            nof_channels,
            sf_len,
            continuous: true,
            fail_rx_at: None,
            overflow_at: None,
            short_rx_at: None,
            rx_samples: None,
            rx_count: AtomicU64::new(0),
            transmissions: Mutex::new(Vec::new()),
            tx_ends: AtomicU64::new(0),
        }
    }

    /// Non-continuous radio: idle subframes end the burst
    pub fn burst_mode(mut self) -> Self {
        self.continuous = false;
        self
    }

    /// Fail the `n`-th receive call (0-based)
    pub fn fail_rx_at(mut self, n: u64) -> Self {
        self.fail_rx_at = Some(n);
        self
    }

    /// Report an overflow on the `n`-th receive call
    pub fn overflow_at(mut self, n: u64) -> Self {
        self.overflow_at = Some(n);
        self
    }

    /// Deliver only `len` samples on the `n`-th receive call
    pub fn short_rx_at(mut self, n: u64, len: usize) -> Self {
        self.short_rx_at = Some((n, len));
        self
    }

    /// Samples written to channel 0 on every receive call
    pub fn with_rx_samples(mut self, samples: Vec<Complex32>) -> Self {
        self.rx_samples = Some(samples);
        self
    }

    pub fn transmissions(&self) -> Vec<TxRecord> {
        self.transmissions.lock().clone()
    }

    pub fn tx_end_count(&self) -> u64 {
        self.tx_ends.load(Ordering::SeqCst)
    }
}

impl RadioInterface for MockRadio {
    fn rx_now(&self, buffer: &mut RfBuffer) -> Result<RxMetadata, InterfaceError> {
        let n = self.rx_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_rx_at == Some(n) {
            return Err(InterfaceError::Timeout);
        }
        let nof_samples = match self.short_rx_at {
            Some((at, len)) if at == n => len.min(self.sf_len),
            _ => self.sf_len,
        };
        if let Some(samples) = &self.rx_samples {
            let len = nof_samples.min(samples.len());
            buffer.channel_mut(0)[..len].copy_from_slice(&samples[..len]);
        }
        let timestamp = RfTimestamp::from_samples((1000 + n) * self.sf_len as u64, self.sample_rate())?;
        Ok(RxMetadata {
            nof_samples,
            timestamp,
            overflow: self.overflow_at == Some(n),
        })
    }

    fn tx(&self, buffer: &RfBuffer, timestamp: RfTimestamp) -> Result<(), InterfaceError> {
        let sample = |ch: usize, i: usize| buffer.channel(ch).get(i).map(|s| s.re).unwrap_or(0.0);
        let record = TxRecord {
            timestamp,
            first_samples: (0..buffer.nof_channels()).map(|ch| sample(ch, 0)).collect(),
            second_samples: (0..buffer.nof_channels()).map(|ch| sample(ch, 1)).collect(),
        };
        self.transmissions.lock().push(record);
        Ok(())
    }

    fn tx_end(&self) {
        self.tx_ends.fetch_add(1, Ordering::SeqCst);
    }

    fn is_continuous_tx(&self) -> bool {
        self.continuous
    }

    fn nof_channels(&self) -> usize {
        self.nof_channels
    }

    fn sample_rate(&self) -> f64 {
        self.sf_len as f64 * 1000.0
    }

    fn stats(&self) -> RfStats {
        RfStats {
            rx_samples: self.rx_count.load(Ordering::SeqCst) * self.sf_len as u64,
            tx_samples: self.transmissions.lock().len() as u64 * self.sf_len as u64,
            tx_bursts_ended: self.tx_end_count(),
            ..RfStats::default()
        }
    }
}

/// Stack recording every notification
#[derive(Default)]
pub struct MockStack {
    ttis: Mutex<Vec<Tti>>,
    rach: Mutex<Vec<(Tti, PrachDetection)>>,
}

impl MockStack {
    pub fn ttis(&self) -> Vec<Tti> {
        self.ttis.lock().clone()
    }

    pub fn clock_count(&self) -> usize {
        self.ttis.lock().len()
    }

    pub fn rach(&self) -> Vec<(Tti, PrachDetection)> {
        self.rach.lock().clone()
    }
}

impl PhyStackInterface for MockStack {
    fn tti_clock(&self, tti: Tti) {
        self.ttis.lock().push(tti);
    }

    fn rach_detected(&self, tti: Tti, detection: &PrachDetection) {
        self.rach.lock().push((tti, *detection));
    }
}

/// Writes the receive TTI into sample 0 and 1.0 into sample 1 of every
/// antenna after a random compute delay; transmits while `tti_rx < tx_limit`
pub struct MarkerProcessor {
    min_delay_us: u64,
    max_delay_us: u64,
    tx_limit: u32,
}

impl MarkerProcessor {
    pub fn new(delay_us: u64, tx_limit: u32) -> Self {
        Self::with_random_delay(delay_us, delay_us, tx_limit)
    }

    pub fn with_random_delay(min_delay_us: u64, max_delay_us: u64, tx_limit: u32) -> Self {
        Self {
            min_delay_us,
            max_delay_us: max_delay_us.max(min_delay_us),
            tx_limit,
        }
    }
}

impl SubframeProcessor for MarkerProcessor {
    fn work_ul(&mut self, _ctx: &WorkerContext, _rx: &RfBuffer, _common: &PhyCommon) {}

    fn work_dl(&mut self, ctx: &WorkerContext, tx: &mut RfBuffer, _common: &PhyCommon) -> bool {
        let delay = rand::thread_rng().gen_range(self.min_delay_us..=self.max_delay_us);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }
        if ctx.tti_rx.value() >= self.tx_limit {
            return false;
        }
        for ch in 0..tx.nof_channels() {
            let samples = tx.channel_mut(ch);
            samples[0] = Complex32::new(ctx.tti_rx.value() as f32, 0.0);
            samples[1] = Complex32::new(1.0, 0.0);
        }
        true
    }
}

/// Records the real part of channel 0 as each worker received it, never transmits
pub struct RxRecorder {
    log: Arc<Mutex<Vec<(u32, Vec<f32>)>>>,
}

impl SubframeProcessor for RxRecorder {
    fn work_ul(&mut self, ctx: &WorkerContext, rx: &RfBuffer, _common: &PhyCommon) {
        let samples = rx.channel(0).iter().map(|s| s.re).collect();
        self.log.lock().push((ctx.tti_rx.value(), samples));
    }

    fn work_dl(&mut self, _ctx: &WorkerContext, _tx: &mut RfBuffer, _common: &PhyCommon) -> bool {
        false
    }
}

/// Factory of `RxRecorder`s sharing `log`
pub fn recorder_factory(log: Arc<Mutex<Vec<(u32, Vec<f32>)>>>) -> Box<ProcessorFactory> {
    Box::new(move |_, _| -> Box<dyn SubframeProcessor> { Box::new(RxRecorder { log: log.clone() }) })
}

/// Factory of `MarkerProcessor`s with compute time uniform in `[min_us, max_us]`
pub fn marker_factory(min_us: u64, max_us: u64, tx_limit: u32) -> Box<ProcessorFactory> {
    Box::new(move |_, _| -> Box<dyn SubframeProcessor> {
        Box::new(MarkerProcessor::with_random_delay(min_us, max_us, tx_limit))
    })
}
