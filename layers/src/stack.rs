//! Protocol-stack boundary
//!
//! The PHY notifies the upper layers once per subframe and reports random
//! access detections. Neither call returns data to the PHY.

use crate::phy::prach_worker::PrachDetection;
use common::Tti;
use tracing::debug;

/// Upper-layer callbacks driven by the PHY
pub trait PhyStackInterface: Send + Sync {
    /// Advance the stack clock; called once per subframe by the driver loop
    fn tti_clock(&self, tti: Tti);

    /// A random access preamble was detected in subframe `tti`
    fn rach_detected(&self, tti: Tti, detection: &PrachDetection);
}

/// Stack that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStack;

impl PhyStackInterface for NullStack {
    fn tti_clock(&self, _tti: Tti) {}

    fn rach_detected(&self, tti: Tti, detection: &PrachDetection) {
        debug!("RACH detected at tti={}: preamble={} ta={}", tti, detection.preamble, detection.time_adv);
    }
}
