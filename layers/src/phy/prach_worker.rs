//! Random access detection off the real-time path
//!
//! The driver loop offers every subframe to `PrachWorker::new_tti`. On PRACH
//! opportunities the samples are copied and queued to a background thread
//! running a `PrachDetector`; detections are reported to the stack.

use super::phy_common::PhyCommon;
use crate::stack::PhyStackInterface;
use crate::LayerError;
use common::{LogThrottle, Tti};
use crossbeam_channel::{bounded, Sender, TrySendError};
use interfaces::RfBuffer;
use num_complex::Complex32;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// PRACH opportunity configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PrachArgs {
    pub enabled: bool,
    /// Opportunity period in subframes
    pub period: u32,
    /// Subframe offset within the period
    pub offset: u32,
    /// Carrier whose first antenna is scanned
    pub carrier: usize,
    /// Subframes that may wait for detection
    pub queue_depth: usize,
    /// Peak-to-average power ratio that counts as a detection
    pub threshold: f32,
}

impl Default for PrachArgs {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 10,
            offset: 1,
            carrier: 0,
            queue_depth: 8,
            threshold: 10.0,
        }
    }
}

/// One detected preamble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrachDetection {
    /// Preamble index (0-63)
    pub preamble: u32,
    /// Timing advance in samples
    pub time_adv: u32,
    /// Detection metric relative to the threshold base
    pub peak_to_avg: f32,
}

/// Preamble detector run on the background thread
pub trait PrachDetector: Send + 'static {
    fn detect(&mut self, samples: &[Complex32]) -> Vec<PrachDetection>;
}

/// Power threshold detector
///
/// Splits the subframe into 64 windows and reports the strongest window when
/// its power exceeds `threshold` times the mean. The window index stands in
/// for the preamble and its start for the timing advance.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
}

const NOF_WINDOWS: usize = 64;

impl EnergyDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl PrachDetector for EnergyDetector {
    fn detect(&mut self, samples: &[Complex32]) -> Vec<PrachDetection> {
        let window = samples.len() / NOF_WINDOWS;
        if window == 0 {
            return Vec::new();
        }

        let powers: Vec<f32> = samples
            .chunks_exact(window)
            .map(|w| w.iter().map(|s| s.norm_sqr()).sum::<f32>() / window as f32)
            .collect();
        let mean = powers.iter().sum::<f32>() / powers.len() as f32;
        if mean <= 0.0 {
            return Vec::new();
        }

        let peak = powers
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1));
        match peak {
            Some((idx, &power)) if power / mean > self.threshold => vec![PrachDetection {
                preamble: (idx % NOF_WINDOWS) as u32,
                time_adv: (idx * window) as u32,
                peak_to_avg: power / mean,
            }],
            _ => Vec::new(),
        }
    }
}

/// Background PRACH processing
pub struct PrachWorker {
    args: PrachArgs,
    channel: usize,
    common: Arc<PhyCommon>,
    queue: Mutex<Option<Sender<(Tti, Vec<Complex32>)>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    drop_log: LogThrottle,
}

impl PrachWorker {
    /// Start the detection thread
    pub fn new(
        args: PrachArgs,
        mut detector: Box<dyn PrachDetector>,
        stack: Arc<dyn PhyStackInterface>,
        common: Arc<PhyCommon>,
    ) -> Result<Self, LayerError> {
        if args.period == 0 || args.offset >= args.period {
            return Err(LayerError::InvalidConfiguration(
                format!("PRACH offset {} must be below period {}", args.offset, args.period)
            ));
        }
        if args.carrier >= common.nof_carriers() {
            return Err(LayerError::InvalidConfiguration(format!("PRACH carrier {} not configured", args.carrier)));
        }

        let (queue, jobs) = bounded::<(Tti, Vec<Complex32>)>(args.queue_depth.max(1));
        let thread_common = common.clone();
        let handle = std::thread::Builder::new()
            .name("phy-prach".to_string())
            .spawn(move || {
                for (tti, samples) in jobs.iter() {
                    for detection in detector.detect(&samples) {
                        thread_common.counters().prach_detection();
                        info!("PRACH: tti={} preamble={} ta={} ratio={:.1}",
                              tti, detection.preamble, detection.time_adv, detection.peak_to_avg);
                        stack.rach_detected(tti, &detection);
                    }
                }
                debug!("PRACH thread exiting");
            })
            .map_err(|e| LayerError::InitializationFailed(format!("Failed to spawn PRACH thread: {}", e)))?;

        Ok(Self {
            channel: common.channel_offset(args.carrier),
            args,
            common,
            queue: Mutex::new(Some(queue)),
            thread: Mutex::new(Some(handle)),
            drop_log: LogThrottle::new(100),
        })
    }

    /// True if `tti` carries a PRACH opportunity
    pub fn is_opportunity(&self, tti: Tti) -> bool {
        tti.value() % self.args.period == self.args.offset
    }

    /// Offer one received subframe; never blocks
    pub fn new_tti(&self, tti: Tti, buffer: &RfBuffer) {
        if !self.is_opportunity(tti) || self.channel >= buffer.nof_channels() {
            return;
        }

        let queue = self.queue.lock();
        let Some(queue) = queue.as_ref() else {
            return;
        };
        match queue.try_send((tti, buffer.channel(self.channel).to_vec())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.common.counters().prach_dropped();
                if let Some(n) = self.drop_log.hit() {
                    warn!("PRACH queue full, dropped tti={} ({} total)", tti, n);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Drain queued subframes and join the detection thread
    pub fn stop(&self) {
        // Closing the queue ends the thread after the backlog
        self.queue.lock().take();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("PRACH thread panicked");
            }
        }
    }
}

impl Drop for PrachWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
