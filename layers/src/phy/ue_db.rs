//! Per-terminal PHY database
//!
//! Shared by every worker behind one lock with short critical sections.
//! Accessors copy data out; no reference into the map outlives the lock.

use crate::LayerError;
use common::{Rnti, TransmissionMode, Tti};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Slots of the per-TTI rings (must exceed the HARQ round trip)
pub const TTIMOD_SZ: usize = 20;

/// HARQ processes per carrier (FDD)
pub const FDD_NOF_HARQ: usize = 8;

/// Carriers per terminal, index 0 is the primary cell
pub const MAX_CARRIERS: usize = 5;

/// Dedicated PHY configuration of a terminal
#[derive(Debug, Clone, PartialEq)]
pub struct UePhyConfig {
    /// Downlink transmission mode
    pub tm: TransmissionMode,
    /// PUCCH format 1 resource
    pub pucch_n1: u16,
    /// Periodic CQI period in subframes, 0 when disabled
    pub cqi_period: u16,
    /// Configured carriers (primary included)
    pub nof_carriers: usize,
}

impl Default for UePhyConfig {
    fn default() -> Self {
        Self {
            tm: TransmissionMode::Tm1,
            pucch_n1: 0,
            cqi_period: 0,
            nof_carriers: 1,
        }
    }
}

/// Downlink assignment awaiting HARQ feedback on one carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckInfo {
    /// First CCE of the assignment, selects the PUCCH resource
    pub n_cce: u16,
    /// Transport blocks scheduled
    pub nof_tb: u8,
}

/// HARQ feedback expected in one uplink subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingAck {
    pub cc: [Option<AckInfo>; MAX_CARRIERS],
}

impl PendingAck {
    /// True if any carrier expects feedback
    pub fn is_pending(&self) -> bool {
        self.cc.iter().any(Option::is_some)
    }
}

/// Last uplink transport block of a HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlTb {
    pub tbs: u32,
    pub mcs: u8,
    pub rv: u8,
}

#[derive(Debug)]
struct UeEntry {
    config: UePhyConfig,
    cc_active: [bool; MAX_CARRIERS],
    pending_ack: [PendingAck; TTIMOD_SZ],
    last_ul_tb: [[Option<UlTb>; FDD_NOF_HARQ]; MAX_CARRIERS],
}

impl UeEntry {
    fn new(config: UePhyConfig) -> Self {
        let mut cc_active = [false; MAX_CARRIERS];
        // Primary cell is active from the start, secondary cells on activation
        cc_active[0] = true;
        Self {
            config,
            cc_active,
            pending_ack: [PendingAck::default(); TTIMOD_SZ],
            last_ul_tb: [[None; FDD_NOF_HARQ]; MAX_CARRIERS],
        }
    }

    fn check_active(&self, rnti: Rnti, cc_idx: usize) -> Result<(), LayerError> {
        if cc_idx < self.config.nof_carriers.min(MAX_CARRIERS) && self.cc_active[cc_idx] {
            Ok(())
        } else {
            Err(LayerError::InvalidState(format!("RNTI {} carrier {} is not active", rnti, cc_idx)))
        }
    }
}

/// Terminal database keyed by RNTI
#[derive(Debug, Default)]
pub struct UeDb {
    ues: Mutex<HashMap<Rnti, UeEntry>>,
}

fn unknown(rnti: Rnti) -> LayerError {
    LayerError::InvalidState(format!("RNTI {} not found", rnti))
}

impl UeDb {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminal or replace its configuration
    ///
    /// Secondary carriers beyond the new carrier count are deactivated.
    pub fn addmod_rnti(&self, rnti: Rnti, config: UePhyConfig) -> Result<(), LayerError> {
        if config.nof_carriers == 0 || config.nof_carriers > MAX_CARRIERS {
            return Err(LayerError::InvalidConfiguration(
                format!("RNTI {}: {} carriers not in 1..={}", rnti, config.nof_carriers, MAX_CARRIERS)
            ));
        }

        let mut ues = self.ues.lock();
        match ues.get_mut(&rnti) {
            Some(ue) => {
                for (idx, active) in ue.cc_active.iter_mut().enumerate() {
                    *active &= idx < config.nof_carriers;
                }
                ue.config = config;
                debug!("Modified RNTI {}", rnti);
            }
            None => {
                ues.insert(rnti, UeEntry::new(config));
                info!("Added RNTI {}", rnti);
            }
        }
        Ok(())
    }

    /// Remove a terminal; unknown RNTIs are ignored
    pub fn rem_rnti(&self, rnti: Rnti) {
        if self.ues.lock().remove(&rnti).is_some() {
            info!("Removed RNTI {}", rnti);
        }
    }

    /// True if the terminal is known
    pub fn contains(&self, rnti: Rnti) -> bool {
        self.ues.lock().contains_key(&rnti)
    }

    /// Number of terminals
    pub fn nof_ues(&self) -> usize {
        self.ues.lock().len()
    }

    /// Snapshot of a terminal's configuration
    pub fn get_config(&self, rnti: Rnti) -> Option<UePhyConfig> {
        self.ues.lock().get(&rnti).map(|ue| ue.config.clone())
    }

    /// Activate or deactivate secondary carrier `cc_idx`
    pub fn activate_deactivate_scell(&self, rnti: Rnti, cc_idx: usize, activate: bool) -> Result<(), LayerError> {
        let mut ues = self.ues.lock();
        let ue = ues.get_mut(&rnti).ok_or_else(|| unknown(rnti))?;
        if cc_idx == 0 || cc_idx >= ue.config.nof_carriers {
            return Err(LayerError::InvalidState(format!("RNTI {}: {} is not a configured SCell", rnti, cc_idx)));
        }
        ue.cc_active[cc_idx] = activate;
        Ok(())
    }

    /// Record a downlink assignment in `tti` whose feedback is pending
    pub fn set_ack_pending(&self, tti: Tti, rnti: Rnti, cc_idx: usize, ack: AckInfo) -> Result<(), LayerError> {
        let mut ues = self.ues.lock();
        let ue = ues.get_mut(&rnti).ok_or_else(|| unknown(rnti))?;
        ue.check_active(rnti, cc_idx)?;
        ue.pending_ack[tti.ring_index(TTIMOD_SZ)].cc[cc_idx] = Some(ack);
        Ok(())
    }

    /// Pending feedback recorded for `tti`, if any
    pub fn get_pending_ack(&self, tti: Tti, rnti: Rnti) -> Option<PendingAck> {
        self.ues
            .lock()
            .get(&rnti)
            .map(|ue| ue.pending_ack[tti.ring_index(TTIMOD_SZ)])
            .filter(PendingAck::is_pending)
    }

    /// Forget feedback recorded for `tti` for every terminal
    pub fn clear_tti_pending_ack(&self, tti: Tti) {
        let slot = tti.ring_index(TTIMOD_SZ);
        for ue in self.ues.lock().values_mut() {
            ue.pending_ack[slot] = PendingAck::default();
        }
    }

    /// Store the last uplink transport block of HARQ process `pid`
    pub fn set_last_ul_tb(&self, rnti: Rnti, cc_idx: usize, pid: usize, tb: UlTb) -> Result<(), LayerError> {
        let mut ues = self.ues.lock();
        let ue = ues.get_mut(&rnti).ok_or_else(|| unknown(rnti))?;
        ue.check_active(rnti, cc_idx)?;
        ue.last_ul_tb[cc_idx][pid % FDD_NOF_HARQ] = Some(tb);
        Ok(())
    }

    /// Last uplink transport block of HARQ process `pid`
    pub fn get_last_ul_tb(&self, rnti: Rnti, cc_idx: usize, pid: usize) -> Option<UlTb> {
        let ues = self.ues.lock();
        let ue = ues.get(&rnti)?;
        ue.check_active(rnti, cc_idx).ok()?;
        ue.last_ul_tb[cc_idx][pid % FDD_NOF_HARQ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tti(v: u32) -> Tti {
        Tti::new(v, 10240).unwrap()
    }

    #[test]
    fn test_addmod_and_remove() {
        let db = UeDb::new();
        let rnti = Rnti(0x46);
        db.addmod_rnti(rnti, UePhyConfig::default()).unwrap();
        assert!(db.contains(rnti));
        assert_eq!(db.nof_ues(), 1);

        let config = UePhyConfig { tm: TransmissionMode::Tm3, ..UePhyConfig::default() };
        db.addmod_rnti(rnti, config.clone()).unwrap();
        assert_eq!(db.get_config(rnti), Some(config));
        assert_eq!(db.nof_ues(), 1);

        db.rem_rnti(rnti);
        db.rem_rnti(rnti);
        assert!(db.get_config(rnti).is_none());
    }

    #[test]
    fn test_rejects_bad_carrier_count() {
        let db = UeDb::new();
        let config = UePhyConfig { nof_carriers: 0, ..UePhyConfig::default() };
        assert!(db.addmod_rnti(Rnti(1), config).is_err());
    }

    #[test]
    fn test_pending_ack_ring() {
        let db = UeDb::new();
        let rnti = Rnti(0x47);
        db.addmod_rnti(rnti, UePhyConfig::default()).unwrap();

        let ack = AckInfo { n_cce: 4, nof_tb: 1 };
        db.set_ack_pending(tti(10243), rnti, 0, ack).unwrap();

        // Ring slot is tti % TTIMOD_SZ
        let pending = db.get_pending_ack(tti(3), rnti).unwrap();
        assert_eq!(pending.cc[0], Some(ack));
        assert!(db.get_pending_ack(tti(4), rnti).is_none());

        db.clear_tti_pending_ack(tti(23));
        assert!(db.get_pending_ack(tti(3), rnti).is_none());
    }

    #[test]
    fn test_scell_activation_gates_access() {
        let db = UeDb::new();
        let rnti = Rnti(0x48);
        db.addmod_rnti(rnti, UePhyConfig { nof_carriers: 2, ..UePhyConfig::default() }).unwrap();

        let ack = AckInfo::default();
        assert!(db.set_ack_pending(tti(0), rnti, 1, ack).is_err());

        db.activate_deactivate_scell(rnti, 1, true).unwrap();
        db.set_ack_pending(tti(0), rnti, 1, ack).unwrap();
        assert!(db.activate_deactivate_scell(rnti, 0, false).is_err());
        assert!(db.activate_deactivate_scell(rnti, 2, true).is_err());

        // Shrinking the configuration deactivates dropped carriers
        db.addmod_rnti(rnti, UePhyConfig::default()).unwrap();
        assert!(db.set_ack_pending(tti(1), rnti, 1, ack).is_err());
    }

    #[test]
    fn test_last_ul_tb_per_harq() {
        let db = UeDb::new();
        let rnti = Rnti(0x49);
        db.addmod_rnti(rnti, UePhyConfig::default()).unwrap();

        let tb = UlTb { tbs: 1000, mcs: 10, rv: 0 };
        db.set_last_ul_tb(rnti, 0, 11, tb).unwrap();
        assert_eq!(db.get_last_ul_tb(rnti, 0, 3), Some(tb));
        assert_eq!(db.get_last_ul_tb(rnti, 0, 4), None);
        assert!(db.set_last_ul_tb(Rnti(1), 0, 0, tb).is_err());
    }

    #[test]
    fn test_concurrent_updates() {
        let db = Arc::new(UeDb::new());
        let handles: Vec<_> = (0..8u16)
            .map(|t| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        let rnti = Rnti(t * 1000 + i);
                        db.addmod_rnti(rnti, UePhyConfig::default()).unwrap();
                        db.set_ack_pending(tti(i as u32), rnti, 0, AckInfo::default()).unwrap();
                        if i % 2 == 0 {
                            db.rem_rnti(rnti);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(db.nof_ues(), 400);
    }
}
