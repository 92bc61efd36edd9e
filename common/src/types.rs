//! Common Types for the PHY runtime
//!
//! Defines the correlation keys and timestamps shared by every layer

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use thiserror::Error;

/// Default TTI wrap-around (1024 radio frames of 10 subframes)
pub const DEFAULT_TTI_MODULUS: u32 = 10240;

/// Subframes per radio frame
pub const NOF_SF_PER_FRAME: u32 = 10;

/// Errors raised when building common types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommonError {
    #[error("TTI modulus must be non-zero")]
    ZeroModulus,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Subframe index (TTI), wrapping at a fixed modulus
///
/// The same value identifies the receive subframe, the worker assigned to
/// it and, shifted by the transmit offset, its transmit opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tti {
    value: u32,
    modulus: u32,
}

impl Tti {
    /// Create a TTI, reducing `value` into `[0, modulus)`
    pub fn new(value: u32, modulus: u32) -> Result<Self, CommonError> {
        if modulus == 0 {
            return Err(CommonError::ZeroModulus);
        }
        Ok(Self {
            value: value % modulus,
            modulus,
        })
    }

    /// TTI zero with the default modulus
    pub fn zero() -> Self {
        Self {
            value: 0,
            modulus: DEFAULT_TTI_MODULUS,
        }
    }

    /// Raw subframe counter
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Wrap-around modulus
    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// The following subframe
    pub fn next(self) -> Self {
        self.add(1)
    }

    /// Advance by `n` subframes
    pub fn add(self, n: u32) -> Self {
        let n = n % self.modulus;
        Self {
            value: ((self.value as u64 + n as u64) % self.modulus as u64) as u32,
            modulus: self.modulus,
        }
    }

    /// Go back by `n` subframes
    pub fn sub(self, n: u32) -> Self {
        let n = n % self.modulus;
        Self {
            value: ((self.value as u64 + self.modulus as u64 - n as u64) % self.modulus as u64) as u32,
            modulus: self.modulus,
        }
    }

    /// Number of subframes from `self` forward to `later`
    pub fn distance_to(self, later: Tti) -> u32 {
        ((later.value as u64 + self.modulus as u64 - self.value as u64) % self.modulus as u64) as u32
    }

    /// Index into a ring buffer of `len` slots
    pub fn ring_index(&self, len: usize) -> usize {
        self.value as usize % len
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.value / NOF_SF_PER_FRAME
    }

    /// Subframe index within the radio frame
    pub fn sf_idx(&self) -> u32 {
        self.value % NOF_SF_PER_FRAME
    }
}

impl Default for Tti {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Hardware timestamp as whole plus fractional seconds
///
/// Referenced to the radio clock, never to wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RfTimestamp {
    /// Whole seconds
    pub full_secs: i64,
    /// Fractional seconds in `[0, 1)`
    pub frac_secs: f64,
}

impl RfTimestamp {
    /// Create a normalized timestamp
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let mut ts = Self { full_secs, frac_secs };
        ts.normalize();
        ts
    }

    /// Timestamp from a floating point number of seconds
    pub fn from_secs_f64(secs: f64) -> Self {
        let full = secs.floor();
        Self::new(full as i64, secs - full)
    }

    /// Timestamp of sample `count` at `sample_rate` Hz
    pub fn from_samples(count: u64, sample_rate: f64) -> Result<Self, CommonError> {
        if !(sample_rate > 0.0) {
            return Err(CommonError::InvalidSampleRate(sample_rate));
        }
        let rate = sample_rate.round() as u64;
        if rate > 0 && (rate as f64 - sample_rate).abs() < f64::EPSILON {
            // Integer rates keep full precision for long sessions
            let full = count / rate;
            let frac = (count % rate) as f64 / sample_rate;
            return Ok(Self::new(full as i64, frac));
        }
        Ok(Self::from_secs_f64(count as f64 / sample_rate))
    }

    /// True for the all-zero timestamp
    pub fn is_zero(&self) -> bool {
        self.full_secs == 0 && self.frac_secs == 0.0
    }

    /// Seconds as a single float (loses precision on long sessions)
    pub fn as_secs_f64(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }

    /// Shift forward by `secs`
    pub fn add_secs(self, secs: f64) -> Self {
        let full = secs.floor();
        Self::new(self.full_secs + full as i64, self.frac_secs + (secs - full))
    }

    /// Shift backward by `secs`
    pub fn sub_secs(self, secs: f64) -> Self {
        self.add_secs(-secs)
    }

    fn normalize(&mut self) {
        if self.frac_secs >= 1.0 || self.frac_secs < 0.0 {
            let carry = self.frac_secs.floor();
            self.full_secs += carry as i64;
            self.frac_secs -= carry;
        }
        // Guard against 1.0 produced by rounding of tiny negative fractions
        if self.frac_secs >= 1.0 {
            self.full_secs += 1;
            self.frac_secs = 0.0;
        }
    }
}

impl fmt::Display for RfTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.full_secs, (self.frac_secs * 1e6) as u64)
    }
}

/// Downlink transmission mode configured for a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum TransmissionMode {
    /// Single antenna port
    Tm1 = 1,
    /// Transmit diversity
    Tm2 = 2,
    /// Open-loop spatial multiplexing
    Tm3 = 3,
    /// Closed-loop spatial multiplexing
    Tm4 = 4,
}

impl Default for TransmissionMode {
    fn default() -> Self {
        Self::Tm1
    }
}
