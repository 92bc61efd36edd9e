//! Radio Interfaces Library
//!
//! This crate defines the boundary between the PHY pipeline and the radio:
//! the `RadioInterface` trait, multi-channel sample buffers, and two radios
//! (ZeroMQ IQ exchange with a reference UE and a sample-clock simulator).

pub mod radio;
pub mod sim_rf;
pub mod zmq_rf;

pub use radio::{RadioInterface, RfBuffer, RfStats, RxMetadata};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("ZMQ error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Receive timeout")]
    Timeout,

    #[error("Buffer full")]
    BufferFull,

    #[error("Channel mismatch: buffer has {buffer} channels, radio has {radio}")]
    ChannelMismatch { buffer: usize, radio: usize },

    #[error(transparent)]
    Common(#[from] common::CommonError),
}
