use std::time::Duration;

use crate::{Result, StatusPacket};

/// A minimal blocking bioloid bus interface.
///
/// The bus is half-duplex: one transaction is a single [`Bus::write_packet`]
/// optionally followed by one [`Bus::read_status_packet`], and the transport
/// must not be shared while a transaction is in flight.
pub trait Bus {
    /// Write one complete command frame to the wire.
    fn write_packet(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read one status frame, waiting at most `timeout` for it to complete.
    fn read_status_packet(&mut self, timeout: Duration) -> Result<StatusPacket>;
}
