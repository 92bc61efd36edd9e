//! Per-subframe processing task run by each worker
//!
//! The pipeline does not interpret samples. A `SubframeProcessor` reads the
//! worker's receive buffer, writes its transmit buffer and says whether the
//! transmit buffer carries a signal.

use super::phy_common::PhyCommon;
use super::sf_worker::WorkerContext;
use interfaces::RfBuffer;
use num_complex::Complex32;
use std::f32::consts::PI;
use tracing::trace;

/// Processing task bound to one worker
pub trait SubframeProcessor: Send + 'static {
    /// Uplink processing of the samples received in `ctx.tti_rx`
    fn work_ul(&mut self, ctx: &WorkerContext, rx: &RfBuffer, common: &PhyCommon);

    /// Fill `tx` for `ctx.tti_tx`; returns true to transmit it
    fn work_dl(&mut self, ctx: &WorkerContext, tx: &mut RfBuffer, common: &PhyCommon) -> bool;
}

/// Builds the processor of worker `worker_id` serving `carrier`
pub type ProcessorFactory = dyn Fn(usize, usize) -> Box<dyn SubframeProcessor> + Send + Sync;

/// Test tone generator with uplink power measurement
///
/// Downlink: a complex tone of `tone_cycles` periods per subframe on every
/// antenna. Uplink: mean receive power, cleared pending feedback and stored
/// grants for the subframe.
#[derive(Debug, Clone)]
pub struct TestSignalProcessor {
    amplitude: f32,
    tone_cycles: f32,
    /// Transmit one subframe out of `tx_period`, 0 disables transmission
    tx_period: u32,
    last_ul_power: f32,
}

impl TestSignalProcessor {
    pub fn new(amplitude: f32, tone_cycles: f32, tx_period: u32) -> Self {
        Self {
            amplitude,
            tone_cycles,
            tx_period,
            last_ul_power: 0.0,
        }
    }

    /// Mean power of the last received subframe
    pub fn last_ul_power(&self) -> f32 {
        self.last_ul_power
    }
}

impl Default for TestSignalProcessor {
    fn default() -> Self {
        Self::new(0.5, 15.0, 1)
    }
}

impl SubframeProcessor for TestSignalProcessor {
    fn work_ul(&mut self, ctx: &WorkerContext, rx: &RfBuffer, common: &PhyCommon) {
        let nof_channels = rx.nof_channels().max(1);
        self.last_ul_power = (0..rx.nof_channels()).map(|ch| rx.avg_power(ch)).sum::<f32>() / nof_channels as f32;

        let grants = common.get_ul_grants(ctx.tti_rx);
        common.ue_db().clear_tti_pending_ack(ctx.tti_rx);
        trace!("tti={} carrier {}: ul power {:.3e}, {} grants",
               ctx.tti_rx, ctx.carrier, self.last_ul_power, grants.len());
    }

    fn work_dl(&mut self, ctx: &WorkerContext, tx: &mut RfBuffer, _common: &PhyCommon) -> bool {
        if self.tx_period == 0 || ctx.tti_tx.value() % self.tx_period != 0 {
            return false;
        }

        let n = tx.nof_samples().max(1) as f32;
        let step = 2.0 * PI * self.tone_cycles / n;
        for ch in 0..tx.nof_channels() {
            for (i, s) in tx.channel_mut(ch).iter_mut().enumerate() {
                *s = Complex32::from_polar(self.amplitude, step * i as f32);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::test_utils::MockRadio;
    use common::{RfTimestamp, Tti};
    use std::sync::Arc;

    fn context(tti: u32) -> WorkerContext {
        let tti_rx = Tti::new(tti, 10240).unwrap();
        WorkerContext {
            tti_rx,
            tti_tx: tti_rx.add(4),
            rx_time: RfTimestamp::default(),
            tx_time: RfTimestamp::default(),
            carrier: 0,
            ticket: tti,
            last: true,
            nof_contributors: 1,
        }
    }

    #[test]
    fn test_tone_has_configured_power() {
        let common = PhyCommon::new(Arc::new(MockRadio::new(1, 64)), vec![0], 1, 64).unwrap();
        let mut processor = TestSignalProcessor::new(0.5, 4.0, 1);
        let mut tx = RfBuffer::new(1, 64);
        assert!(processor.work_dl(&context(0), &mut tx, &common));
        assert!((tx.avg_power(0) - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_tx_period_gates_transmission() {
        let common = PhyCommon::new(Arc::new(MockRadio::new(1, 16)), vec![0], 1, 16).unwrap();
        let mut processor = TestSignalProcessor::new(1.0, 1.0, 5);
        let mut tx = RfBuffer::new(1, 16);
        // tti_tx = tti_rx + 4
        assert!(processor.work_dl(&context(1), &mut tx, &common));
        assert!(!processor.work_dl(&context(2), &mut tx, &common));

        let mut silent = TestSignalProcessor::new(1.0, 1.0, 0);
        assert!(!silent.work_dl(&context(1), &mut tx, &common));
    }

    #[test]
    fn test_ul_power_measured() {
        let common = PhyCommon::new(Arc::new(MockRadio::new(1, 16)), vec![0], 1, 16).unwrap();
        let mut processor = TestSignalProcessor::default();
        let rx = RfBuffer::from_channels(vec![vec![Complex32::new(2.0, 0.0); 16]]);
        processor.work_ul(&context(0), &rx, &common);
        assert!((processor.last_ul_power() - 4.0).abs() < 1e-6);
    }
}
