//! One-at-a-time command/status exchanges over a [`Bus`].

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::packet::{ErrorFlags, Instruction, StatusPacket, BROADCAST_ID};
use crate::{Bus, Result, TransportError};

/// How chatty a device is configured to be (its status-return-level
/// register). Devices always answer PING; beyond that the level decides.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StatusReturnLevel {
    None,
    Read,
    #[default]
    All,
}

impl StatusReturnLevel {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => StatusReturnLevel::None,
            1 => StatusReturnLevel::Read,
            _ => StatusReturnLevel::All,
        }
    }

    /// Whether a device at this level replies to the given instruction.
    fn replies_to(self, instruction: &Instruction) -> bool {
        match self {
            StatusReturnLevel::None => matches!(instruction, Instruction::Ping),
            StatusReturnLevel::Read => {
                matches!(instruction, Instruction::Ping | Instruction::ReadData { .. })
            }
            StatusReturnLevel::All => true,
        }
    }
}

/// One scan hit: id plus the first three control-table bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScanRecord {
    pub id: u8,
    pub model: u16,
    pub firmware: u8,
}

/// Serialises transactions on a half-duplex bus: encode once, write the
/// frame atomically, then await at most one status packet.
///
/// Status-return levels are tracked per id. An unknown device is assumed to
/// reply; a timeout is recoverable, a silently-missed status frame is not.
pub struct Transactor<B: Bus> {
    bus: B,
    timeout: Duration,
    levels: HashMap<u8, StatusReturnLevel>,
}

impl<B: Bus> Transactor<B> {
    /// Default per-transaction response window.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

    pub fn new(bus: B) -> Self {
        Transactor::with_timeout(bus, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(bus: B, timeout: Duration) -> Self {
        Transactor {
            bus,
            timeout,
            levels: HashMap::new(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Record what the driver knows about a device's status-return level.
    pub fn set_status_return_level(&mut self, id: u8, level: StatusReturnLevel) {
        self.levels.insert(id, level);
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    fn transact(&mut self, id: u8, instruction: Instruction) -> Result<Option<StatusPacket>> {
        let await_status = id != BROADCAST_ID
            && self
                .levels
                .get(&id)
                .copied()
                .unwrap_or_default()
                .replies_to(&instruction);
        debug!(id, code = instruction.code(), await_status, "transact");
        let frame = instruction.encode(id);
        self.bus.write_packet(&frame)?;
        if !await_status {
            return Ok(None);
        }
        self.bus.read_status_packet(self.timeout).map(Some)
    }

    fn checked(&mut self, id: u8, instruction: Instruction) -> Result<()> {
        if let Some(status) = self.transact(id, instruction)? {
            if !status.flags.is_normal() {
                return Err(TransportError::Device(status.flags));
            }
        }
        Ok(())
    }

    /// PING the device. Non-zero flags are a successful return here so
    /// callers can surface "OverHeating" and friends verbatim.
    pub fn ping(&mut self, id: u8) -> Result<ErrorFlags> {
        match self.transact(id, Instruction::Ping)? {
            Some(status) => Ok(status.flags),
            // Broadcast pings are never answered.
            None => Err(TransportError::Timeout),
        }
    }

    /// Read `length` bytes of the control table starting at `offset`.
    pub fn read(&mut self, id: u8, offset: u8, length: u8) -> Result<Vec<u8>> {
        match self.transact(id, Instruction::ReadData { offset, length })? {
            Some(status) if !status.flags.is_normal() => {
                Err(TransportError::Device(status.flags))
            }
            Some(status) => Ok(status.params),
            // The device is configured not to answer reads.
            None => Err(TransportError::Timeout),
        }
    }

    pub fn write(&mut self, id: u8, offset: u8, data: &[u8]) -> Result<()> {
        self.checked(
            id,
            Instruction::WriteData {
                offset,
                data: data.to_vec(),
            },
        )
    }

    /// Deferred write: latched by the device until a broadcast ACTION.
    pub fn reg_write(&mut self, id: u8, offset: u8, data: &[u8]) -> Result<()> {
        self.checked(
            id,
            Instruction::RegWrite {
                offset,
                data: data.to_vec(),
            },
        )
    }

    /// Broadcast ACTION, triggering deferred writes everywhere at once.
    pub fn action(&mut self) -> Result<()> {
        self.transact(BROADCAST_ID, Instruction::Action).map(|_| ())
    }

    /// Reset the device's control table to factory defaults.
    pub fn reset(&mut self, id: u8) -> Result<()> {
        self.checked(id, Instruction::Reset)
    }

    /// Write the same register window on several devices in one broadcast
    /// frame. Never answered.
    pub fn sync_write(&mut self, offset: u8, bytes_per_id: u8, targets: &[(u8, Vec<u8>)]) -> Result<()> {
        for (_, data) in targets {
            if data.len() != usize::from(bytes_per_id) {
                return Err(TransportError::Framing("sync-write data width mismatch"));
            }
        }
        self.transact(
            BROADCAST_ID,
            Instruction::SyncWrite {
                offset,
                bytes_per_id,
                targets: targets.to_vec(),
            },
        )
        .map(|_| ())
    }

    /// Ping every id in `ids`, then read model number and firmware version
    /// from each responder. Non-respondents are skipped.
    pub fn scan(&mut self, ids: impl IntoIterator<Item = u8>) -> Result<Vec<ScanRecord>> {
        let mut found = Vec::new();
        for id in ids {
            if id >= BROADCAST_ID {
                break;
            }
            match self.ping(id) {
                Ok(_) => {}
                Err(TransportError::Timeout) => continue,
                Err(err) => return Err(err),
            }
            let data = self.read(id, 0, 3)?;
            if data.len() < 3 {
                return Err(TransportError::Framing("short model/version read"));
            }
            found.push(ScanRecord {
                id,
                model: u16::from_le_bytes([data[0], data[1]]),
                firmware: data[2],
            });
        }
        Ok(found)
    }
}
