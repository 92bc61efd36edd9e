//! Physical Layer (PHY) Runtime
//!
//! Subframe-synchronized pipeline: a driver loop paced by the radio sample
//! clock hands each subframe to a pool of workers that run in parallel, and
//! an ordering semaphore puts their outputs on air strictly in subframe order.

pub mod metrics;
pub mod phy_common;
pub mod prach_worker;
pub mod processor;
pub mod sf_worker;
pub mod tti_semaphore;
pub mod txrx;
pub mod ue_db;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use metrics::PhyMetrics;
pub use phy_common::{PhyCommon, UlGrant};
pub use prach_worker::{EnergyDetector, PrachArgs, PrachDetection, PrachDetector, PrachWorker};
pub use processor::{ProcessorFactory, SubframeProcessor, TestSignalProcessor};
pub use sf_worker::{SfWorker, WorkerContext};
pub use tti_semaphore::TtiSemaphore;
pub use ue_db::{UeDb, UePhyConfig};
pub use worker_pool::{PoolWorker, WorkerPool};

use crate::stack::PhyStackInterface;
use crate::LayerError;
use common::{samples_per_subframe, DEFAULT_TTI_MODULUS};
use interfaces::{RadioInterface, RfStats};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};
use txrx::TxRx;

/// Carrier configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierArgs {
    /// RF port; the carrier uses radio channels `rf_port * nof_antennas ..`
    pub rf_port: usize,
}

/// PHY configuration, fixed at initialization
#[derive(Debug, Clone, PartialEq)]
pub struct PhyArgs {
    /// Workers per carrier, i.e. the pipeline depth
    pub nof_workers: usize,
    pub sf_duration: Duration,
    /// Transmit opportunity of a subframe, in subframes after reception
    pub tx_offset: u32,
    pub tti_modulus: u32,
    pub nof_antennas: usize,
    pub carriers: Vec<CarrierArgs>,
    pub prach: PrachArgs,
}

impl Default for PhyArgs {
    fn default() -> Self {
        Self {
            nof_workers: 4,
            sf_duration: Duration::from_millis(1),
            tx_offset: 4,
            tti_modulus: DEFAULT_TTI_MODULUS,
            nof_antennas: 1,
            carriers: vec![CarrierArgs { rf_port: 0 }],
            prach: PrachArgs::default(),
        }
    }
}

impl PhyArgs {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), LayerError> {
        let invalid = |msg: String| Err(LayerError::InvalidConfiguration(msg));

        if self.nof_workers == 0 {
            return invalid("Worker pool size must be at least 1".to_string());
        }
        if self.sf_duration.is_zero() {
            return invalid("Subframe duration must be positive".to_string());
        }
        if self.tti_modulus == 0 {
            return invalid("TTI modulus must be positive".to_string());
        }
        // Tickets are TTI values and must stay unique while in flight
        if self.nof_workers as u64 >= self.tti_modulus as u64 {
            return invalid(format!("{} workers do not fit TTI modulus {}", self.nof_workers, self.tti_modulus));
        }
        if self.tx_offset >= self.tti_modulus {
            return invalid(format!("TX offset {} must be below TTI modulus {}", self.tx_offset, self.tti_modulus));
        }
        if self.nof_antennas == 0 {
            return invalid("At least one antenna required".to_string());
        }
        if self.carriers.is_empty() {
            return invalid("At least one carrier required".to_string());
        }
        Ok(())
    }
}

/// eNodeB PHY: coordinator, worker pools, PRACH worker and driver loop
pub struct EnbPhy {
    args: PhyArgs,
    radio: Arc<dyn RadioInterface>,
    stack: Arc<dyn PhyStackInterface>,
    common: Arc<PhyCommon>,
    pools: Vec<Arc<WorkerPool<SfWorker>>>,
    prach: Option<Arc<PrachWorker>>,
    sf_len: usize,
    driver: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl EnbPhy {
    /// Validate `args` and build every component; nothing runs until `start`
    pub fn new(
        args: PhyArgs,
        radio: Arc<dyn RadioInterface>,
        stack: Arc<dyn PhyStackInterface>,
        factory: &ProcessorFactory,
    ) -> Result<Self, LayerError> {
        args.validate()?;

        let sf_len = samples_per_subframe(radio.sample_rate(), args.sf_duration);
        if sf_len == 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "No samples per subframe at {} Hz", radio.sample_rate()
            )));
        }

        let ports = args.carriers.iter().map(|c| c.rf_port).collect();
        let common = Arc::new(PhyCommon::new(radio.clone(), ports, args.nof_antennas, sf_len)?);

        let mut pools = Vec::with_capacity(args.carriers.len());
        for carrier in 0..args.carriers.len() {
            let workers = (0..args.nof_workers)
                .map(|id| Box::new(SfWorker::new(id, carrier, sf_len, factory(id, carrier), common.clone())))
                .collect();
            pools.push(Arc::new(WorkerPool::new(&format!("phy-cc{}", carrier), workers)?));
        }

        let prach = if args.prach.enabled {
            let detector = Box::new(EnergyDetector::new(args.prach.threshold));
            Some(Arc::new(PrachWorker::new(args.prach.clone(), detector, stack.clone(), common.clone())?))
        } else {
            None
        };

        info!("PHY initialized: {} carriers x {} workers, {} samples per {:?} subframe",
              args.carriers.len(), args.nof_workers, sf_len, args.sf_duration);

        Ok(Self {
            args,
            radio,
            stack,
            common,
            pools,
            prach,
            sf_len,
            driver: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the driver loop
    pub fn start(&self) -> Result<(), LayerError> {
        let mut driver = self.driver.lock();
        if self.stopped.load(Ordering::SeqCst) {
            return Err(LayerError::InvalidState("PHY already stopped".to_string()));
        }
        if driver.is_some() {
            return Err(LayerError::InvalidState("PHY already started".to_string()));
        }

        let txrx = TxRx::new(
            self.radio.clone(),
            self.common.clone(),
            self.pools.clone(),
            self.prach.clone(),
            self.stack.clone(),
            self.sf_len,
            self.args.sf_duration,
            self.args.tx_offset,
            self.args.tti_modulus,
        );
        *driver = Some(txrx.spawn()?);
        Ok(())
    }

    /// Stop the pipeline; later calls return immediately
    ///
    /// Pools stop first so the driver loop sees the shutdown sentinel, then
    /// the loop is joined and every pending ticket is allowed to transmit.
    /// Concurrent callers block until the first one has finished.
    pub fn stop(&self) {
        let mut driver = self.driver.lock();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping PHY");

        for pool in &self.pools {
            pool.stop();
        }
        if let Some(handle) = driver.take() {
            if handle.join().is_err() {
                error!("TX/RX thread panicked");
            }
        }
        self.common.semaphore().wait_all();
        if let Some(prach) = &self.prach {
            prach.stop();
        }

        info!("PHY stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.driver.lock().is_some()
    }

    pub fn common(&self) -> &Arc<PhyCommon> {
        &self.common
    }

    pub fn args(&self) -> &PhyArgs {
        &self.args
    }

    /// Samples per subframe
    pub fn sf_len(&self) -> usize {
        self.sf_len
    }

    pub fn metrics(&self) -> PhyMetrics {
        self.common.metrics()
    }

    pub fn radio_stats(&self) -> RfStats {
        self.radio.stats()
    }

    /// Workers busy across all carriers
    pub fn busy_workers(&self) -> usize {
        self.pools.iter().map(|p| p.busy_workers()).sum()
    }
}

impl Drop for EnbPhy {
    fn drop(&mut self) {
        self.stop();
    }
}
