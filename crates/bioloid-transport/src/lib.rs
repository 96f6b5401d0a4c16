//! bioloid-transport: half-duplex bus plumbing for bioloid/Dynamixel chains
//!
//! This crate provides the wire codec, the blocking bus trait with
//! feature-gated backends, and the transactor that drives one command /
//! status exchange at a time. The default build enables a scripted `testbus`
//! backend so driver behaviour can be verified byte-for-byte without
//! hardware.

mod packet;
pub use packet::{DecodeStep, Decoder, ErrorFlags, Instruction, StatusPacket, BROADCAST_ID};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Bus;

mod transactor;
pub use transactor::{ScanRecord, StatusReturnLevel, Transactor};

#[cfg(feature = "testbus")]
mod testbus;

#[cfg(feature = "testbus")]
pub use testbus::{ExpectedCmd, ScriptedRsp, TestBus};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialBus;
