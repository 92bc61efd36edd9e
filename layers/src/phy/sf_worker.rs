//! Subframe worker

use super::phy_common::PhyCommon;
use super::processor::SubframeProcessor;
use super::worker_pool::PoolWorker;
use common::{RfTimestamp, Tti};
use interfaces::RfBuffer;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Assignment of a worker to one subframe, set by the driver loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkerContext {
    pub tti_rx: Tti,
    pub tti_tx: Tti,
    /// Hardware time of the first received sample
    pub rx_time: RfTimestamp,
    /// Hardware time the output must go on air
    pub tx_time: RfTimestamp,
    pub carrier: usize,
    /// Ordering ticket shared by all contributors of the subframe
    pub ticket: u32,
    /// This contributor transmits and releases the ticket
    pub last: bool,
    pub nof_contributors: usize,
}

/// Reusable execution context for one carrier's subframe processing
pub struct SfWorker {
    id: usize,
    carrier: usize,
    ctx: WorkerContext,
    rx: RfBuffer,
    tx: RfBuffer,
    processor: Box<dyn SubframeProcessor>,
    common: Arc<PhyCommon>,
}

impl SfWorker {
    pub fn new(
        id: usize,
        carrier: usize,
        sf_len: usize,
        processor: Box<dyn SubframeProcessor>,
        common: Arc<PhyCommon>,
    ) -> Self {
        let nof_antennas = common.nof_antennas();
        Self {
            id,
            carrier,
            ctx: WorkerContext::default(),
            rx: RfBuffer::new(nof_antennas, sf_len),
            tx: RfBuffer::new(nof_antennas, sf_len),
            processor,
            common,
        }
    }

    pub fn carrier(&self) -> usize {
        self.carrier
    }

    /// Receive buffer, filled by the driver loop before `work`
    pub fn rx_buffer_mut(&mut self) -> &mut RfBuffer {
        &mut self.rx
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn set_context(&mut self, ctx: WorkerContext) {
        self.ctx = ctx;
    }
}

impl PoolWorker for SfWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn set_tti(&mut self, tti: Tti) {
        self.ctx.tti_rx = tti;
    }

    fn work(&mut self) {
        let start = Instant::now();

        self.tx.zero();
        self.processor.work_ul(&self.ctx, &self.rx, &self.common);
        let tx_enable = self.processor.work_dl(&self.ctx, &mut self.tx, &self.common);

        let elapsed = start.elapsed();
        self.common.counters().worker_time(elapsed);
        trace!("Worker {} carrier {} tti={} done in {:?}", self.id, self.carrier, self.ctx.tti_rx, elapsed);

        self.common.worker_end(&self.ctx, tx_enable, &self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::test_utils::{MarkerProcessor, MockRadio};

    #[test]
    fn test_work_transmits_processor_output() {
        let radio = Arc::new(MockRadio::new(1, 8));
        let common = Arc::new(PhyCommon::new(radio.clone(), vec![0], 1, 8).unwrap());
        let mut worker = SfWorker::new(0, 0, 8, Box::new(MarkerProcessor::new(0, u32::MAX)), common.clone());

        let tti = Tti::new(9, 10240).unwrap();
        worker.set_tti(tti);
        worker.set_context(WorkerContext {
            tti_rx: tti,
            tti_tx: tti.add(4),
            rx_time: RfTimestamp::new(2, 0.0),
            tx_time: RfTimestamp::new(2, 0.004),
            carrier: 0,
            ticket: 9,
            last: true,
            nof_contributors: 1,
        });
        common.semaphore().push(9);
        worker.work();

        let sent = radio.transmissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].first_samples, vec![9.0]);
        assert_eq!(common.metrics().tx_count, 1);
        assert!(common.semaphore().is_empty());
    }
}
