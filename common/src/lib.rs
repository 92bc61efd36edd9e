//! Common Utilities and Types Library
//!
//! This crate provides the subframe counter, radio timestamps and timing
//! helpers shared by the radio interfaces and the PHY pipeline.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
