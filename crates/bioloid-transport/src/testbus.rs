//! A deterministic, hardware-free bus for test scripts.
//!
//! Scripts queue the command frames the driver is expected to emit and the
//! status frames (or timeouts) the devices would answer with. Every write is
//! compared byte-for-byte against the head of the expectation queue, and a
//! run is only clean when both queues are empty at the end.

use std::collections::VecDeque;
use std::time::Duration;

use crate::packet::{DecodeStep, Decoder, ErrorFlags, Instruction, StatusPacket};
use crate::{Bus, Result, TransportError};

/// One command frame the driver is expected to emit next.
#[derive(Clone, Debug)]
pub enum ExpectedCmd {
    /// Exact bytes, preamble and checksum included.
    Raw(Vec<u8>),
    /// Re-encoded through the codec before comparison.
    Cmd { id: u8, instruction: Instruction },
}

/// One scripted reaction to a status read.
#[derive(Clone, Debug)]
pub enum ScriptedRsp {
    /// Exact bytes, run through the decoder (may themselves script a
    /// checksum or framing error).
    Raw(Vec<u8>),
    Status {
        id: u8,
        flags: ErrorFlags,
        params: Vec<u8>,
    },
    Timeout,
    /// The preceding write gets no reply at all (broadcast target, or
    /// status returns disabled). Consumed by that write; a status read that
    /// happens anyway fails with [`TransportError::UnexpectedRead`].
    NoResponse,
}

#[derive(Debug, Default)]
pub struct TestBus {
    expected_cmds: VecDeque<ExpectedCmd>,
    scripted_rsps: VecDeque<ScriptedRsp>,
}

impl TestBus {
    pub fn new() -> Self {
        TestBus::default()
    }

    pub fn expect_raw(&mut self, bytes: impl Into<Vec<u8>>) {
        self.expected_cmds.push_back(ExpectedCmd::Raw(bytes.into()));
    }

    pub fn expect(&mut self, id: u8, instruction: Instruction) {
        self.expected_cmds
            .push_back(ExpectedCmd::Cmd { id, instruction });
    }

    pub fn script(&mut self, rsp: ScriptedRsp) {
        self.scripted_rsps.push_back(rsp);
    }

    pub fn script_status(&mut self, id: u8, flags: ErrorFlags, params: impl Into<Vec<u8>>) {
        self.scripted_rsps.push_back(ScriptedRsp::Status {
            id,
            flags,
            params: params.into(),
        });
    }

    pub fn script_timeout(&mut self) {
        self.scripted_rsps.push_back(ScriptedRsp::Timeout);
    }

    /// A run is clean only when every expectation and response was consumed.
    pub fn finish(self) -> Result<()> {
        if self.expected_cmds.is_empty() && self.scripted_rsps.is_empty() {
            Ok(())
        } else {
            Err(TransportError::ExpectationMismatch {
                expected: format!(
                    "{} commands and {} responses still queued",
                    self.expected_cmds.len(),
                    self.scripted_rsps.len()
                ),
                actual: "end of script".to_string(),
            })
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let strs: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    strs.join(" ")
}

fn decode_scripted(bytes: &[u8]) -> Result<StatusPacket> {
    let mut decoder = Decoder::new();
    for &b in bytes {
        if let DecodeStep::Done(pkt) = decoder.push(b)? {
            return Ok(pkt);
        }
    }
    Err(TransportError::Framing("scripted response is incomplete"))
}

impl Bus for TestBus {
    fn write_packet(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = match self.expected_cmds.pop_front() {
            Some(ExpectedCmd::Raw(v)) => v,
            Some(ExpectedCmd::Cmd { id, instruction }) => instruction.encode(id),
            None => return Err(TransportError::UnexpectedWrite(hex(bytes))),
        };
        if expected != bytes {
            return Err(TransportError::ExpectationMismatch {
                expected: hex(&expected),
                actual: hex(bytes),
            });
        }
        // A scripted NoResponse belongs to this write. Consuming it here
        // keeps the queues aligned whether or not the driver reads next.
        if matches!(self.scripted_rsps.front(), Some(ScriptedRsp::NoResponse)) {
            self.scripted_rsps.pop_front();
        }
        Ok(())
    }

    fn read_status_packet(&mut self, _timeout: Duration) -> Result<StatusPacket> {
        match self.scripted_rsps.pop_front() {
            None | Some(ScriptedRsp::NoResponse) => Err(TransportError::UnexpectedRead),
            Some(ScriptedRsp::Timeout) => Err(TransportError::Timeout),
            Some(ScriptedRsp::Status { id, flags, params }) => {
                Ok(StatusPacket { id, flags, params })
            }
            Some(ScriptedRsp::Raw(bytes)) => decode_scripted(&bytes),
        }
    }
}
