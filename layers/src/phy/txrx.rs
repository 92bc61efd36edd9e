//! Real-time driver loop
//!
//! The only thread that turns sample-clock time into subframe boundaries.
//! Each iteration receives one subframe, assigns one worker per carrier,
//! queues the subframe's transmit ticket and starts the workers.

use super::phy_common::PhyCommon;
use super::prach_worker::PrachWorker;
use super::sf_worker::{SfWorker, WorkerContext};
use super::worker_pool::{PoolWorker, WorkerPool};
use crate::stack::PhyStackInterface;
use crate::LayerError;
use common::{LogThrottle, RfTimestamp, Tti};
use interfaces::{RadioInterface, RfBuffer};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Driver loop state, moved onto the `phy-txrx` thread by `spawn`
pub struct TxRx {
    radio: Arc<dyn RadioInterface>,
    common: Arc<PhyCommon>,
    /// One pool per carrier
    pools: Vec<Arc<WorkerPool<SfWorker>>>,
    prach: Option<Arc<PrachWorker>>,
    stack: Arc<dyn PhyStackInterface>,
    sf_len: usize,
    sf_duration: Duration,
    tx_offset: u32,
    tti_modulus: u32,
}

impl TxRx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: Arc<dyn RadioInterface>,
        common: Arc<PhyCommon>,
        pools: Vec<Arc<WorkerPool<SfWorker>>>,
        prach: Option<Arc<PrachWorker>>,
        stack: Arc<dyn PhyStackInterface>,
        sf_len: usize,
        sf_duration: Duration,
        tx_offset: u32,
        tti_modulus: u32,
    ) -> Self {
        Self {
            radio,
            common,
            pools,
            prach,
            stack,
            sf_len,
            sf_duration,
            tx_offset,
            tti_modulus,
        }
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>, LayerError> {
        if self.pools.is_empty() || self.pools.len() != self.common.nof_carriers() {
            return Err(LayerError::InvalidConfiguration(
                format!("{} worker pools for {} carriers", self.pools.len(), self.common.nof_carriers())
            ));
        }
        // First iteration increments to TTI 0
        let tti = Tti::new(self.tti_modulus.wrapping_sub(1), self.tti_modulus)
            .map_err(|e| LayerError::InvalidConfiguration(e.to_string()))?;

        std::thread::Builder::new()
            .name("phy-txrx".to_string())
            .spawn(move || self.run(tti))
            .map_err(|e| LayerError::InitializationFailed(format!("Failed to spawn phy-txrx: {}", e)))
    }

    fn run(self, mut tti: Tti) {
        let overflow_log = LogThrottle::new(100);
        let rx_error_log = LogThrottle::new(100);
        let short_rx_log = LogThrottle::new(100);
        let stall_log = LogThrottle::new(100);
        let late_log = LogThrottle::new(1000);

        let sf_secs = self.sf_duration.as_secs_f64();
        let counters = self.common.counters();
        let mut buffer = RfBuffer::new(self.radio.nof_channels(), self.sf_len);
        let mut last_rx_time: Option<RfTimestamp> = None;
        let mut workers: Vec<Box<SfWorker>> = Vec::with_capacity(self.pools.len());
        let mut deadline = Instant::now();

        info!("TX/RX loop started: {} carriers, {} samples per subframe, tx offset {}",
              self.pools.len(), self.sf_len, self.tx_offset);

        loop {
            deadline += self.sf_duration;
            tti = tti.next();

            let rx_time = match self.radio.rx_now(&mut buffer) {
                Ok(meta) => {
                    if meta.nof_samples < buffer.nof_samples() {
                        buffer.zero_from(meta.nof_samples);
                        if let Some(n) = short_rx_log.hit() {
                            warn!("Short receive at tti={}: {} of {} samples ({} total)",
                                  tti, meta.nof_samples, buffer.nof_samples(), n);
                        }
                    }
                    if meta.overflow {
                        counters.rx_overflow();
                        if let Some(n) = overflow_log.hit() {
                            warn!("Radio overflow at tti={} ({} total)", tti, n);
                        }
                    }
                    meta.timestamp
                }
                Err(e) => {
                    counters.rx_error();
                    if let Some(n) = rx_error_log.hit() {
                        warn!("Receive failed at tti={} ({} total): {}", tti, n, e);
                    }
                    buffer.zero();
                    last_rx_time.map(|t| t.add_secs(sf_secs)).unwrap_or_default()
                }
            };
            last_rx_time = Some(rx_time);

            let wait_start = Instant::now();
            for pool in &self.pools {
                match pool.wait_worker(tti) {
                    Some(worker) => workers.push(worker),
                    None => {
                        for (pool, worker) in self.pools.iter().zip(workers.drain(..)) {
                            pool.release_worker(worker);
                        }
                        info!("TX/RX loop stopped at tti={}", tti);
                        return;
                    }
                }
            }
            let waited = wait_start.elapsed();
            if waited > self.sf_duration {
                counters.worker_stall(waited);
                if let Some(n) = stall_log.hit() {
                    warn!("Waited {:?} for a worker at tti={} ({} stalls)", waited, tti, n);
                }
            }

            let ctx = WorkerContext {
                tti_rx: tti,
                tti_tx: tti.add(self.tx_offset),
                rx_time,
                tx_time: rx_time.add_secs(self.tx_offset as f64 * sf_secs),
                carrier: 0,
                ticket: tti.value(),
                last: false,
                nof_contributors: workers.len(),
            };

            self.common.semaphore().push(ctx.ticket);

            let nof_workers = workers.len();
            for (carrier, mut worker) in workers.drain(..).enumerate() {
                let offset = self.common.channel_offset(carrier);
                let rx = worker.rx_buffer_mut();
                rx.set_nof_samples(buffer.nof_samples());
                for ant in 0..rx.nof_channels() {
                    rx.copy_channel(ant, buffer.channel(offset + ant));
                }
                worker.set_context(WorkerContext {
                    carrier,
                    last: carrier + 1 == nof_workers,
                    ..ctx
                });
                debug!("tti={} carrier {} -> worker {}", tti, carrier, worker.id());
                self.pools[carrier].start_worker(worker);
            }

            if let Some(prach) = &self.prach {
                prach.new_tti(tti, &buffer);
            }
            self.stack.tti_clock(tti);
            counters.subframe();

            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
            } else if now - deadline > self.sf_duration {
                counters.late_iteration();
                if let Some(n) = late_log.hit() {
                    debug!("TX/RX loop {:?} behind at tti={} ({} late)", now - deadline, tti, n);
                }
            }
        }
    }
}
