//! Wire framing for instruction and status packets.
//!
//! Every frame is `0xff 0xff id len code payload... checksum`, where `len`
//! counts the code byte, the payload bytes, and the checksum. Multi-byte
//! register values travel little-endian.

use std::fmt;

use tracing::trace;

use crate::{Result, TransportError};

/// Commands sent to this id are executed by every device on the chain and
/// never answered.
pub const BROADCAST_ID: u8 = 0xFE;

/// Smallest legal value of the length byte (code + checksum, no payload).
const MIN_LEN: u8 = 2;
/// Largest legal value of the length byte.
const MAX_LEN: u8 = 253;

const INST_PING: u8 = 0x01;
const INST_READ_DATA: u8 = 0x02;
const INST_WRITE_DATA: u8 = 0x03;
const INST_REG_WRITE: u8 = 0x04;
const INST_ACTION: u8 = 0x05;
const INST_RESET: u8 = 0x06;
const INST_SYNC_WRITE: u8 = 0x83;

/// Sum of all frame bytes after the preamble, complemented and truncated.
pub(crate) fn checksum(body: &[u8]) -> u8 {
    let sum: u32 = body.iter().map(|&b| u32::from(b)).sum();
    !(sum as u8)
}

/// An instruction with its fixed payload layout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    Ping,
    ReadData {
        offset: u8,
        length: u8,
    },
    WriteData {
        offset: u8,
        data: Vec<u8>,
    },
    /// Same layout as [`Instruction::WriteData`], but the device latches the
    /// value until a broadcast [`Instruction::Action`].
    RegWrite {
        offset: u8,
        data: Vec<u8>,
    },
    Action,
    Reset,
    /// One write fanned out to several devices: a shared offset, the byte
    /// count per device, then an `(id, data)` tuple per target.
    SyncWrite {
        offset: u8,
        bytes_per_id: u8,
        targets: Vec<(u8, Vec<u8>)>,
    },
}

impl Instruction {
    pub fn code(&self) -> u8 {
        match self {
            Instruction::Ping => INST_PING,
            Instruction::ReadData { .. } => INST_READ_DATA,
            Instruction::WriteData { .. } => INST_WRITE_DATA,
            Instruction::RegWrite { .. } => INST_REG_WRITE,
            Instruction::Action => INST_ACTION,
            Instruction::Reset => INST_RESET,
            Instruction::SyncWrite { .. } => INST_SYNC_WRITE,
        }
    }

    fn push_params(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Ping | Instruction::Action | Instruction::Reset => {}
            Instruction::ReadData { offset, length } => {
                out.push(*offset);
                out.push(*length);
            }
            Instruction::WriteData { offset, data } | Instruction::RegWrite { offset, data } => {
                out.push(*offset);
                out.extend_from_slice(data);
            }
            Instruction::SyncWrite {
                offset,
                bytes_per_id,
                targets,
            } => {
                out.push(*offset);
                out.push(*bytes_per_id);
                for (id, data) in targets {
                    out.push(*id);
                    out.extend_from_slice(data);
                }
            }
        }
    }

    /// Produce the complete frame for this instruction, preamble and
    /// checksum included.
    pub fn encode(&self, id: u8) -> Vec<u8> {
        let mut params = Vec::new();
        self.push_params(&mut params);
        let mut frame = Vec::with_capacity(params.len() + 6);
        frame.extend_from_slice(&[0xFF, 0xFF, id, params.len() as u8 + 2, self.code()]);
        frame.extend_from_slice(&params);
        frame.push(checksum(&frame[2..]));
        frame
    }
}

/// The error bitfield a device reports in its status packets. Zero means the
/// device is operating normally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub const INPUT_VOLTAGE: u8 = 0x01;
    pub const ANGLE_LIMIT: u8 = 0x02;
    pub const OVER_HEATING: u8 = 0x04;
    pub const RANGE: u8 = 0x08;
    pub const CHECKSUM: u8 = 0x10;
    pub const OVERLOAD: u8 = 0x20;
    pub const INSTRUCTION: u8 = 0x40;

    /// Display names, indexed by bit position.
    const NAMES: [&'static str; 7] = [
        "InputVoltage",
        "AngleLimit",
        "OverHeating",
        "Range",
        "Checksum",
        "Overload",
        "Instruction",
    ];

    pub fn new(bits: u8) -> Self {
        ErrorFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_normal(self) -> bool {
        self.0 == 0
    }

    /// Parse "none", "all", or a comma-separated list of flag names,
    /// case-insensitively.
    pub fn parse(text: &str) -> Option<ErrorFlags> {
        if text.eq_ignore_ascii_case("none") {
            return Some(ErrorFlags(0));
        }
        if text.eq_ignore_ascii_case("all") {
            return Some(ErrorFlags(0x7f));
        }
        let mut bits = 0u8;
        for word in text.split(',') {
            let word = word.trim();
            let bit = Self::NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(word))?;
            bits |= 1 << bit;
        }
        Some(ErrorFlags(bits))
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("None");
        }
        if self.0 == 0x7f {
            return f.write_str("All");
        }
        let mut first = true;
        for (bit, name) in Self::NAMES.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A device's reply to an addressed instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusPacket {
    pub id: u8,
    pub flags: ErrorFlags,
    pub params: Vec<u8>,
}

impl StatusPacket {
    /// The frame a device would put on the wire for this status.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.params.len() + 6);
        frame.extend_from_slice(&[
            0xFF,
            0xFF,
            self.id,
            self.params.len() as u8 + 2,
            self.flags.bits(),
        ]);
        frame.extend_from_slice(&self.params);
        frame.push(checksum(&frame[2..]));
        frame
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    WaitPre1,
    WaitPre2,
    ReadId,
    ReadLen,
    ReadError,
    ReadPayload,
    ReadChecksum,
}

/// Result of feeding one byte to the [`Decoder`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeStep {
    NeedMore,
    Done(StatusPacket),
}

/// Byte-by-byte status packet parser.
///
/// The decoder is a pure state machine over the incoming byte stream, so a
/// bus implementation can interleave it with timeout handling. After any
/// error it resets itself; the caller is responsible for draining the stream
/// to the next preamble before the following transaction.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    id: u8,
    len: u8,
    flags: u8,
    params: Vec<u8>,
    sum: u32,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            state: State::WaitPre1,
            id: 0,
            len: 0,
            flags: 0,
            params: Vec::new(),
            sum: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::WaitPre1;
        self.params.clear();
        self.sum = 0;
    }

    pub fn push(&mut self, byte: u8) -> Result<DecodeStep> {
        trace!(byte, state = ?self.state, "decode");
        match self.state {
            State::WaitPre1 => {
                if byte == 0xFF {
                    self.state = State::WaitPre2;
                }
                Ok(DecodeStep::NeedMore)
            }
            State::WaitPre2 => {
                if byte == 0xFF {
                    self.state = State::ReadId;
                    Ok(DecodeStep::NeedMore)
                } else {
                    self.reset();
                    Err(TransportError::Framing("broken preamble"))
                }
            }
            State::ReadId => {
                // A third 0xff is treated as a late start: the last two
                // consecutive 0xff bytes form the preamble.
                if byte != 0xFF {
                    self.id = byte;
                    self.sum = u32::from(byte);
                    self.state = State::ReadLen;
                }
                Ok(DecodeStep::NeedMore)
            }
            State::ReadLen => {
                if !(MIN_LEN..=MAX_LEN).contains(&byte) {
                    self.reset();
                    return Err(TransportError::Framing("length byte out of range"));
                }
                self.len = byte;
                self.sum += u32::from(byte);
                self.state = State::ReadError;
                Ok(DecodeStep::NeedMore)
            }
            State::ReadError => {
                self.flags = byte;
                self.sum += u32::from(byte);
                self.params.clear();
                self.state = if self.len == MIN_LEN {
                    State::ReadChecksum
                } else {
                    State::ReadPayload
                };
                Ok(DecodeStep::NeedMore)
            }
            State::ReadPayload => {
                self.params.push(byte);
                self.sum += u32::from(byte);
                if self.params.len() as u8 == self.len - MIN_LEN {
                    self.state = State::ReadChecksum;
                }
                Ok(DecodeStep::NeedMore)
            }
            State::ReadChecksum => {
                let expected = !(self.sum as u8);
                let params = std::mem::take(&mut self.params);
                self.reset();
                if byte == expected {
                    Ok(DecodeStep::Done(StatusPacket {
                        id: self.id,
                        flags: ErrorFlags::new(self.flags),
                        params,
                    }))
                } else {
                    Err(TransportError::Checksum {
                        got: byte,
                        expected,
                    })
                }
            }
        }
    }
}
