use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, warn};

use crate::packet::{DecodeStep, Decoder};
use crate::{Bus, Result, StatusPacket, TransportError};

/// Floor on the per-read deadline. The worst-case return delay is
/// 254 x 2 usec, but USB serial adapters batch reads far more coarsely.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Granularity of the underlying serialport reads while we poll toward the
/// transaction deadline.
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Bioloid bus over a serial port (8N1, typically 1 Mbaud).
pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(path, baud, "serial port open");
        Ok(SerialBus { port })
    }

    /// Read one byte, or `None` once `deadline` has passed.
    fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    /// Consume whatever trails a mangled frame, up to the next `0xff 0xff`,
    /// so a late reply cannot be attributed to the next transaction.
    fn drain_to_preamble(&mut self) {
        let deadline = Instant::now() + MIN_READ_TIMEOUT;
        let mut last = 0u8;
        while let Ok(Some(byte)) = self.read_byte(deadline) {
            if last == 0xFF && byte == 0xFF {
                break;
            }
            last = byte;
        }
    }
}

impl Bus for SerialBus {
    fn write_packet(&mut self, bytes: &[u8]) -> Result<()> {
        debug!(len = bytes.len(), "wire write");
        self.port
            .write_all(bytes)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn read_status_packet(&mut self, timeout: Duration) -> Result<StatusPacket> {
        let deadline = Instant::now() + timeout.max(MIN_READ_TIMEOUT);
        let mut decoder = Decoder::new();
        loop {
            let byte = match self.read_byte(deadline)? {
                Some(b) => b,
                None => return Err(TransportError::Timeout),
            };
            match decoder.push(byte) {
                Ok(DecodeStep::NeedMore) => {}
                Ok(DecodeStep::Done(pkt)) => {
                    debug!(id = pkt.id, flags = %pkt.flags, "status");
                    return Ok(pkt);
                }
                Err(err) => {
                    warn!(%err, "bad status frame, resyncing");
                    self.drain_to_preamble();
                    return Err(err);
                }
            }
        }
    }
}
