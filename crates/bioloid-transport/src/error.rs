use thiserror::Error;

use crate::packet::ErrorFlags;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout waiting for status")]
    Timeout,
    #[error("framing error: {0}")]
    Framing(&'static str),
    #[error("checksum mismatch: got 0x{got:02x}, expected 0x{expected:02x}")]
    Checksum { got: u8, expected: u8 },
    #[error("Rcvd Status: {0}")]
    Device(ErrorFlags),
    #[error("unexpected write: [{0}]")]
    UnexpectedWrite(String),
    #[error("unexpected status read")]
    UnexpectedRead,
    #[error("command mismatch: expected [{expected}], wrote [{actual}]")]
    ExpectationMismatch { expected: String, actual: String },
}
