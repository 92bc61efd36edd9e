//! Cross-worker PHY state and the ordered transmit choke point

use super::metrics::{MetricsCounters, PhyMetrics};
use super::sf_worker::WorkerContext;
use super::tti_semaphore::TtiSemaphore;
use super::ue_db::{UeDb, TTIMOD_SZ};
use crate::LayerError;
use common::{LogThrottle, RfTimestamp, Rnti, Tti};
use interfaces::{RadioInterface, RfBuffer};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Uplink grant issued by the scheduler for one subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlGrant {
    pub rnti: Rnti,
    pub cc_idx: usize,
    pub n_prb: u32,
    pub mcs: u8,
    pub tbs: u32,
}

/// Shared transmit buffer of the ticket currently at the front
struct TxState {
    buffer: RfBuffer,
    /// Contributions merged for the current ticket
    merged: usize,
    tx_enable: bool,
    /// A burst is open on the radio
    in_burst: bool,
}

impl TxState {
    fn reset(&mut self) {
        self.buffer.zero();
        self.merged = 0;
        self.tx_enable = false;
    }
}

/// Common coordinator shared by every worker
pub struct PhyCommon {
    radio: Arc<dyn RadioInterface>,
    semaphore: TtiSemaphore<u32>,
    tx: Mutex<TxState>,
    merged: Condvar,
    /// RF port of each carrier
    carrier_ports: Vec<usize>,
    nof_antennas: usize,
    ue_db: UeDb,
    ul_grants: Mutex<Vec<Vec<UlGrant>>>,
    /// Time alignment in seconds, stored as f64 bits
    ta_bits: AtomicU64,
    pending_tx_end: AtomicBool,
    metrics: MetricsCounters,
    tx_error_log: LogThrottle,
}

impl PhyCommon {
    /// Create the coordinator for `carrier_ports.len()` carriers of `sf_len` samples
    pub fn new(
        radio: Arc<dyn RadioInterface>,
        carrier_ports: Vec<usize>,
        nof_antennas: usize,
        sf_len: usize,
    ) -> Result<Self, LayerError> {
        if carrier_ports.is_empty() || nof_antennas == 0 {
            return Err(LayerError::InvalidConfiguration("At least one carrier and antenna required".to_string()));
        }
        let needed = carrier_ports.iter().map(|p| (p + 1) * nof_antennas).max().unwrap_or(0);
        if radio.nof_channels() < needed {
            return Err(LayerError::InvalidConfiguration(format!(
                "Radio has {} channels, carriers need {}", radio.nof_channels(), needed
            )));
        }

        let buffer = RfBuffer::new(radio.nof_channels(), sf_len);
        Ok(Self {
            radio,
            semaphore: TtiSemaphore::new(),
            tx: Mutex::new(TxState {
                buffer,
                merged: 0,
                tx_enable: false,
                in_burst: false,
            }),
            merged: Condvar::new(),
            carrier_ports,
            nof_antennas,
            ue_db: UeDb::new(),
            ul_grants: Mutex::new(vec![Vec::new(); TTIMOD_SZ]),
            ta_bits: AtomicU64::new(0f64.to_bits()),
            pending_tx_end: AtomicBool::new(false),
            metrics: MetricsCounters::new(),
            tx_error_log: LogThrottle::new(1000),
        })
    }

    /// Transmit ordering semaphore, tickets are receive TTI values
    pub fn semaphore(&self) -> &TtiSemaphore<u32> {
        &self.semaphore
    }

    pub fn ue_db(&self) -> &UeDb {
        &self.ue_db
    }

    pub fn radio(&self) -> &Arc<dyn RadioInterface> {
        &self.radio
    }

    pub fn nof_carriers(&self) -> usize {
        self.carrier_ports.len()
    }

    pub fn nof_antennas(&self) -> usize {
        self.nof_antennas
    }

    /// First radio channel of `carrier`
    pub fn channel_offset(&self, carrier: usize) -> usize {
        self.carrier_ports.get(carrier).copied().unwrap_or(0) * self.nof_antennas
    }

    pub(crate) fn counters(&self) -> &MetricsCounters {
        &self.metrics
    }

    /// Snapshot of the PHY counters
    pub fn metrics(&self) -> PhyMetrics {
        self.metrics.snapshot()
    }

    /// Store the uplink grants scheduled for `tti`
    pub fn set_ul_grants(&self, tti: Tti, grants: Vec<UlGrant>) {
        self.ul_grants.lock()[tti.ring_index(TTIMOD_SZ)] = grants;
    }

    /// Uplink grants stored for `tti`
    pub fn get_ul_grants(&self, tti: Tti) -> Vec<UlGrant> {
        self.ul_grants.lock()[tti.ring_index(TTIMOD_SZ)].clone()
    }

    /// Time alignment subtracted from every transmit timestamp
    pub fn set_time_alignment(&self, secs: f64) {
        self.ta_bits.store(secs.to_bits(), Ordering::Relaxed);
        info!("Time alignment set to {:.2} us", secs * 1e6);
    }

    pub fn time_alignment(&self) -> f64 {
        f64::from_bits(self.ta_bits.load(Ordering::Relaxed))
    }

    /// Close the open burst at the next idle subframe
    pub fn reset_radio(&self) {
        self.pending_tx_end.store(true, Ordering::Relaxed);
    }

    /// Ordered transmit of one contribution
    ///
    /// Every carrier worker of a subframe calls this with the same ticket.
    /// Contributions are merged into the shared buffer; the worker flagged
    /// `last` waits for the others, transmits once and releases the ticket.
    pub fn worker_end(&self, ctx: &WorkerContext, tx_enable: bool, buffer: &RfBuffer) {
        self.semaphore.wait(ctx.ticket);

        let mut tx = self.tx.lock();
        if tx_enable {
            let offset = self.channel_offset(ctx.carrier);
            for ant in 0..self.nof_antennas.min(buffer.nof_channels()) {
                tx.buffer.combine_channel(offset + ant, buffer.channel(ant));
            }
            tx.tx_enable = true;
        }
        tx.merged += 1;
        self.merged.notify_all();

        if !ctx.last {
            trace!("tti={} carrier {} merged", ctx.tti_tx, ctx.carrier);
            return;
        }

        while tx.merged < ctx.nof_contributors {
            self.merged.wait(&mut tx);
        }

        self.transmit(&mut tx, ctx);
        tx.reset();
        drop(tx);

        self.semaphore.release();
    }

    fn transmit(&self, tx: &mut TxState, ctx: &WorkerContext) {
        let tx_time = ctx.tx_time.sub_secs(self.time_alignment());

        if tx.tx_enable && !ctx.tx_time.is_zero() {
            self.radio_tx(tx, tx_time, ctx.tti_tx);
        } else if self.radio.is_continuous_tx() {
            if self.pending_tx_end.swap(false, Ordering::Relaxed) {
                self.radio_tx_end(tx, ctx.tti_tx);
            } else if tx.in_burst {
                // Keep the burst alive with silence
                tx.buffer.zero();
                self.radio_tx(tx, tx_time, ctx.tti_tx);
            }
        } else {
            self.radio_tx_end(tx, ctx.tti_tx);
        }
    }

    fn radio_tx(&self, tx: &mut TxState, timestamp: RfTimestamp, tti_tx: Tti) {
        match self.radio.tx(&tx.buffer, timestamp) {
            Ok(()) => {
                tx.in_burst = true;
                self.metrics.tx();
            }
            Err(e) => {
                self.metrics.tx_error();
                if let Some(n) = self.tx_error_log.hit() {
                    warn!("Transmit failed at tti={} ({} total): {}", tti_tx, n, e);
                }
            }
        }
    }

    fn radio_tx_end(&self, tx: &mut TxState, tti_tx: Tti) {
        if tx.in_burst {
            debug!("Ending burst at tti={}", tti_tx);
        }
        self.radio.tx_end();
        tx.in_burst = false;
        self.metrics.tx_end();
    }
}
