//! Protocol Stack Layers Library
//!
//! This crate implements the TTI-synchronized PHY worker pipeline and the
//! boundary it exposes to the upper protocol stack.

pub mod phy;
pub mod stack;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
