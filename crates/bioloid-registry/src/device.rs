//! The device façade: typed register access for one bus address.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use bioloid_transport::{Bus, ErrorFlags, StatusReturnLevel, Transactor};

use crate::kinds::{parse_int, RegisterKind};
use crate::types::{DeviceType, Register};
use crate::{RegistryError, Result};

/// One row of a full register readout.
#[derive(Clone, Debug, Serialize)]
pub struct RegisterReading {
    pub name: String,
    pub raw: u16,
    pub value: String,
}

/// A stateless proxy for one bus address of a known device type.
///
/// Devices borrow the transactor for their lifetime, which keeps the
/// half-duplex bus exclusively owned for the span of each operation. Writing
/// the id register re-addresses the physical device; this proxy keeps
/// talking to the address it was created with.
pub struct Device<'a, B: Bus> {
    xact: &'a mut Transactor<B>,
    dev_type: Arc<DeviceType>,
    id: u8,
}

impl<'a, B: Bus> Device<'a, B> {
    pub fn new(xact: &'a mut Transactor<B>, dev_type: Arc<DeviceType>, id: u8) -> Self {
        Device { xact, dev_type, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.dev_type
    }

    pub fn ping(&mut self) -> Result<ErrorFlags> {
        Ok(self.xact.ping(self.id)?)
    }

    pub fn reset(&mut self) -> Result<()> {
        Ok(self.xact.reset(self.id)?)
    }

    /// Read raw bytes. `name_or_offset` may name a register or address the
    /// control table directly.
    pub fn read_data(&mut self, name_or_offset: &str, length: u8) -> Result<Vec<u8>> {
        let offset = self.resolve_offset(name_or_offset)?;
        Ok(self.xact.read(self.id, offset, length)?)
    }

    pub fn write_data(&mut self, name_or_offset: &str, data: &[u8]) -> Result<()> {
        let offset = self.resolve_offset(name_or_offset)?;
        Ok(self.xact.write(self.id, offset, data)?)
    }

    pub fn reg_write(&mut self, name_or_offset: &str, data: &[u8]) -> Result<()> {
        let offset = self.resolve_offset(name_or_offset)?;
        Ok(self.xact.reg_write(self.id, offset, data)?)
    }

    /// Read a register and format it with its unit. The special name "all"
    /// reads every register in offset order and returns a tabular listing.
    pub fn get(&mut self, name: &str) -> Result<String> {
        if name.eq_ignore_ascii_case("all") {
            let rows: Vec<String> = self
                .get_all()?
                .into_iter()
                .map(|reading| format!("{:<24} {}", reading.name, reading.value))
                .collect();
            return Ok(rows.join("\n"));
        }
        let reg = self.dev_type.register(name)?.clone();
        let raw = self.read_reg(&reg)?;
        Ok(reg.format(raw))
    }

    /// Read a register as its raw integer.
    pub fn get_raw(&mut self, name: &str) -> Result<u16> {
        let reg = self.dev_type.register(name)?.clone();
        self.read_reg(&reg)
    }

    /// Parse `text` for the register's kind, range-check, and write.
    pub fn set(&mut self, name: &str, text: &str) -> Result<()> {
        let reg = self.writable(name)?;
        let raw = reg.parse(text)?;
        self.write_reg(&reg, raw)
    }

    /// Like [`Device::set`] but `text` is a raw integer, bypassing unit
    /// conversion. Range and width checks still apply.
    pub fn set_raw(&mut self, name: &str, text: &str) -> Result<()> {
        let reg = self.writable(name)?;
        let raw = reg.parse_raw(text)?;
        self.write_reg(&reg, raw)
    }

    /// Deferred variant of [`Device::set`]: the device latches the value
    /// until a broadcast ACTION.
    pub fn deferred_set(&mut self, name: &str, text: &str) -> Result<()> {
        let reg = self.writable(name)?;
        let raw = reg.parse(text)?;
        debug!(id = self.id, name = %reg.name, raw, "deferred write");
        Ok(self
            .xact
            .reg_write(self.id, reg.offset, &reg.encode_value(raw))?)
    }

    /// Read every register in offset order.
    pub fn get_all(&mut self) -> Result<Vec<RegisterReading>> {
        let regs: Vec<Register> = self.dev_type.registers().to_vec();
        let mut out = Vec::with_capacity(regs.len());
        for reg in regs {
            let raw = self.read_reg(&reg)?;
            out.push(RegisterReading {
                name: reg.name.clone(),
                raw,
                value: reg.format(raw),
            });
        }
        Ok(out)
    }

    fn writable(&self, name: &str) -> Result<Register> {
        let reg = self.dev_type.register(name)?;
        if !reg.is_writable() {
            return Err(RegistryError::ReadOnly(reg.name.clone()));
        }
        Ok(reg.clone())
    }

    fn resolve_offset(&self, name_or_offset: &str) -> Result<u8> {
        match self.dev_type.register(name_or_offset) {
            Ok(reg) => Ok(reg.offset),
            Err(err) => parse_int(name_or_offset)
                .and_then(|val| u8::try_from(val).ok())
                .ok_or(err),
        }
    }

    fn read_reg(&mut self, reg: &Register) -> Result<u16> {
        let data = self.xact.read(self.id, reg.offset, reg.size)?;
        reg.decode_value(&data)
    }

    fn write_reg(&mut self, reg: &Register, raw: u16) -> Result<()> {
        debug!(id = self.id, name = %reg.name, raw, "write");
        self.xact
            .write(self.id, reg.offset, &reg.encode_value(raw))?;
        // Keep the transactor's picture of the device's chattiness current.
        if reg.kind == RegisterKind::StatusRet {
            self.xact
                .set_status_return_level(self.id, StatusReturnLevel::from_raw(raw as u8));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_str;
    use bioloid_transport::{Instruction, ScriptedRsp, TestBus, TransportError, BROADCAST_ID};

    const TABLE: &str = "\
DeviceType: servo
Model: 12
Register: 0x03 id               1 rw 0 253
Register: 0x10 status-ret-level 1 rw 0 2 StatusRet
Register: 0x19 led              1 rw 0 1 OnOff
Register: 0x1e goal-position    2 rw 0 1023 Angle
Register: 0x2b present-temp     1 ro Temperature
Register: 0x30 punch            2 rw 0 1023
EndDeviceType
";

    fn servo() -> Arc<DeviceType> {
        Arc::new(load_str("table", TABLE).unwrap().remove(0))
    }

    #[test]
    fn set_id_on_broadcast_device() {
        let mut bus = TestBus::new();
        bus.expect_raw(vec![0xFF, 0xFF, 0xFE, 0x04, 0x03, 0x03, 0x01, 0xF6]);
        let mut xact = Transactor::new(bus);
        Device::new(&mut xact, servo(), BROADCAST_ID)
            .set("id", "1")
            .unwrap();
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn get_formats_with_units() {
        let mut bus = TestBus::new();
        bus.expect_raw(vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x2B, 0x01, 0xCC]);
        bus.script(ScriptedRsp::Raw(vec![0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0xDB]));
        let mut xact = Transactor::new(bus);
        let temp = Device::new(&mut xact, servo(), 1).get("present-temp").unwrap();
        assert_eq!(temp, "32C");
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn set_goal_position_in_degrees() {
        let mut bus = TestBus::new();
        bus.expect(
            1,
            Instruction::WriteData {
                offset: 0x1E,
                data: vec![0xFF, 0x03],
            },
        );
        bus.script_status(1, ErrorFlags::default(), vec![]);
        let mut xact = Transactor::new(bus);
        Device::new(&mut xact, servo(), 1)
            .set("goal-position", "300")
            .unwrap();
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn out_of_range_set_never_touches_the_bus() {
        let mut xact = Transactor::new(TestBus::new());
        let err = Device::new(&mut xact, servo(), 1)
            .set("punch", "1024")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Range { .. }));
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn read_only_registers_reject_set() {
        let mut xact = Transactor::new(TestBus::new());
        let err = Device::new(&mut xact, servo(), 1)
            .set("present-temp", "32")
            .unwrap_err();
        assert!(matches!(err, RegistryError::ReadOnly(_)));
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn set_raw_bypasses_units_but_not_range() {
        let mut bus = TestBus::new();
        bus.expect(
            1,
            Instruction::WriteData {
                offset: 0x1E,
                data: vec![0x00, 0x02],
            },
        );
        bus.script_status(1, ErrorFlags::default(), vec![]);
        let mut xact = Transactor::new(bus);
        let mut dev = Device::new(&mut xact, servo(), 1);
        dev.set_raw("goal-position", "0x200").unwrap();
        assert!(dev.set_raw("goal-position", "2000").is_err());
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn writing_status_ret_level_teaches_the_transactor() {
        let mut bus = TestBus::new();
        bus.expect(
            1,
            Instruction::WriteData {
                offset: 0x10,
                data: vec![0x00],
            },
        );
        bus.script_status(1, ErrorFlags::default(), vec![]);
        // After the level write, LED writes get no reply.
        bus.expect(
            1,
            Instruction::WriteData {
                offset: 0x19,
                data: vec![0x01],
            },
        );
        bus.script(ScriptedRsp::NoResponse);
        let mut xact = Transactor::new(bus);
        let mut dev = Device::new(&mut xact, servo(), 1);
        dev.set("status-ret-level", "none").unwrap();
        dev.set("led", "on").unwrap();
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn deferred_set_then_action() {
        let mut bus = TestBus::new();
        bus.expect(
            1,
            Instruction::RegWrite {
                offset: 0x1E,
                data: vec![0x00, 0x00],
            },
        );
        bus.script_status(1, ErrorFlags::default(), vec![]);
        bus.expect(BROADCAST_ID, Instruction::Action);
        let mut xact = Transactor::new(bus);
        Device::new(&mut xact, servo(), 1)
            .deferred_set("goal-position", "0")
            .unwrap();
        xact.action().unwrap();
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn ping_surfaces_flags_as_success() {
        let mut bus = TestBus::new();
        bus.expect(1, Instruction::Ping);
        bus.script_status(1, ErrorFlags::new(ErrorFlags::OVER_HEATING), vec![]);
        let mut xact = Transactor::new(bus);
        let flags = Device::new(&mut xact, servo(), 1).ping().unwrap();
        assert_eq!(flags.to_string(), "OverHeating");
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn get_all_reads_every_register_in_offset_order() {
        let ty = servo();
        let mut bus = TestBus::new();
        for reg in ty.registers() {
            bus.expect(
                1,
                Instruction::ReadData {
                    offset: reg.offset,
                    length: reg.size,
                },
            );
            bus.script_status(1, ErrorFlags::default(), vec![0u8; usize::from(reg.size)]);
        }
        let mut xact = Transactor::new(bus);
        let readings = Device::new(&mut xact, ty.clone(), 1).get_all().unwrap();
        assert_eq!(readings.len(), ty.registers().len());
        assert_eq!(readings[0].name, "id");
        assert_eq!(readings[3].value, "0.0 deg");
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn get_all_by_name_returns_a_listing() {
        let ty = servo();
        let mut bus = TestBus::new();
        for reg in ty.registers() {
            bus.expect(
                1,
                Instruction::ReadData {
                    offset: reg.offset,
                    length: reg.size,
                },
            );
            bus.script_status(1, ErrorFlags::default(), vec![0u8; usize::from(reg.size)]);
        }
        let mut xact = Transactor::new(bus);
        let listing = Device::new(&mut xact, ty.clone(), 1).get("all").unwrap();
        assert_eq!(listing.lines().count(), ty.registers().len());
        assert!(listing.contains("goal-position"));
        assert!(listing.contains("0.0 deg"));
        xact.into_bus().finish().unwrap();
    }

    #[test]
    fn timeouts_pass_through_unchanged() {
        let mut bus = TestBus::new();
        bus.expect(1, Instruction::Ping);
        bus.script_timeout();
        let mut xact = Transactor::new(bus);
        let err = Device::new(&mut xact, servo(), 1).ping().unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Transport(TransportError::Timeout)
        ));
        xact.into_bus().finish().unwrap();
    }
}
