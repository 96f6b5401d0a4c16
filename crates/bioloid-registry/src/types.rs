//! Register and device-type metadata.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::kinds::{parse_int, RegisterKind};
use crate::{RegistryError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Ro,
    Rw,
}

/// One addressable field of a device type's control table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Register {
    pub offset: u8,
    pub name: String,
    /// Width in bytes, 1 or 2.
    pub size: u8,
    pub access: Access,
    pub raw_min: Option<u16>,
    pub raw_max: Option<u16>,
    pub kind: RegisterKind,
}

impl Register {
    pub fn is_writable(&self) -> bool {
        self.access == Access::Rw
    }

    pub fn format(&self, raw: u16) -> String {
        self.kind.format(raw)
    }

    /// Unit-aware parse followed by the range check.
    pub fn parse(&self, text: &str) -> Result<u16> {
        let raw = self.kind.parse(text)?;
        self.check_range(u32::from(raw))
    }

    /// Integer parse (decimal/hex/octal) that bypasses unit conversion but
    /// still enforces range and width.
    pub fn parse_raw(&self, text: &str) -> Result<u16> {
        let val = parse_int(text).ok_or_else(|| RegistryError::Parse {
            kind: self.kind.name(),
            text: text.to_string(),
        })?;
        if !(0..=i64::from(u16::MAX)).contains(&val) {
            return Err(RegistryError::Parse {
                kind: self.kind.name(),
                text: text.to_string(),
            });
        }
        self.check_range(val as u32)
    }

    /// Verify `raw` fits the register width, the kind's domain, and the
    /// per-register bounds; both ends inclusive.
    pub fn check_range(&self, raw: u32) -> Result<u16> {
        let width_max: u32 = if self.size == 1 { 0xFF } else { 0xFFFF };
        let (dom_min, dom_max) = self.kind.domain();
        let min = u32::from(self.raw_min.unwrap_or(dom_min).max(dom_min));
        let max = u32::from(self.raw_max.unwrap_or(dom_max).min(dom_max)).min(width_max);
        if raw < min || raw > max {
            return Err(RegistryError::Range {
                kind: self.kind.name(),
                value: self.kind.format(raw.min(u32::from(u16::MAX)) as u16),
                min: self.kind.format(min as u16),
                max: self.kind.format(max as u16),
            });
        }
        Ok(raw as u16)
    }

    /// Little-endian wire image, one or two bytes.
    pub fn encode_value(&self, raw: u16) -> Vec<u8> {
        let mut data = vec![raw as u8];
        if self.size > 1 {
            data.push((raw >> 8) as u8);
        }
        data
    }

    pub fn decode_value(&self, bytes: &[u8]) -> Result<u16> {
        if bytes.len() != usize::from(self.size) {
            return Err(RegistryError::Parse {
                kind: self.kind.name(),
                text: format!("{} byte reply", bytes.len()),
            });
        }
        let mut raw = u16::from(bytes[0]);
        if self.size > 1 {
            raw |= u16::from(bytes[1]) << 8;
        }
        Ok(raw)
    }
}

/// Immutable schema shared by every device of one model: a name, the model
/// number, and the control-table registers ordered by offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceType {
    name: String,
    model: u16,
    registers: Vec<Register>,
}

impl DeviceType {
    pub(crate) fn new(name: String, model: u16, mut registers: Vec<Register>) -> Self {
        registers.sort_by_key(|reg| reg.offset);
        DeviceType {
            name,
            model,
            registers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> u16 {
        self.model
    }

    /// Registers in offset order.
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Case-insensitive name lookup; a numeric string is tried as an offset.
    pub fn register(&self, name_or_offset: &str) -> Result<&Register> {
        if let Some(reg) = self
            .registers
            .iter()
            .find(|reg| reg.name.eq_ignore_ascii_case(name_or_offset))
        {
            return Ok(reg);
        }
        if let Some(offset) = parse_int(name_or_offset) {
            if let Ok(offset) = u8::try_from(offset) {
                if let Some(reg) = self.register_at(offset) {
                    return Ok(reg);
                }
            }
        }
        Err(RegistryError::UnknownRegister(name_or_offset.to_string()))
    }

    pub fn register_at(&self, offset: u8) -> Option<&Register> {
        self.registers.iter().find(|reg| reg.offset == offset)
    }

    /// Render the register definitions as an aligned table. Min/max values
    /// come out unit-formatted when `cooked`, as plain integers otherwise.
    pub fn dump_regs(&self, cooked: bool) -> String {
        let mut rows = vec![[
            "Addr".to_string(),
            "Size".to_string(),
            "Min".to_string(),
            "Max".to_string(),
            "Type".to_string(),
            "Name".to_string(),
        ]];
        for reg in &self.registers {
            let bound = |raw: Option<u16>| match raw {
                None => String::new(),
                Some(raw) if cooked => reg.format(raw),
                Some(raw) => raw.to_string(),
            };
            rows.push([
                format!("0x{:02x}", reg.offset),
                format!(
                    "{} {}",
                    if reg.is_writable() { "rw" } else { "ro" },
                    reg.size
                ),
                bound(reg.raw_min),
                bound(reg.raw_max),
                reg.kind.name().to_string(),
                reg.name.clone(),
            ]);
        }
        let mut widths = [0usize; 6];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        let mut out = String::new();
        for row in &rows {
            let mut line = String::new();
            for (&width, cell) in widths.iter().zip(row) {
                line.push_str(&format!("{cell:<width$} "));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

/// All device types known to the driver, built once at startup.
#[derive(Debug, Default)]
pub struct DeviceTypeRegistry {
    types: HashMap<String, Arc<DeviceType>>,
}

impl DeviceTypeRegistry {
    pub fn new() -> Self {
        DeviceTypeRegistry::default()
    }

    pub fn add(&mut self, dev_type: DeviceType) {
        self.types
            .insert(dev_type.name.clone(), Arc::new(dev_type));
    }

    pub fn get(&self, name: &str) -> Result<Arc<DeviceType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDeviceType(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceType {
        DeviceType::new(
            "servo".to_string(),
            12,
            vec![
                Register {
                    offset: 0x1E,
                    name: "goal-position".to_string(),
                    size: 2,
                    access: Access::Rw,
                    raw_min: Some(0),
                    raw_max: Some(1023),
                    kind: RegisterKind::Angle,
                },
                Register {
                    offset: 0x03,
                    name: "id".to_string(),
                    size: 1,
                    access: Access::Rw,
                    raw_min: Some(0),
                    raw_max: Some(253),
                    kind: RegisterKind::Raw,
                },
                Register {
                    offset: 0x2B,
                    name: "present-temp".to_string(),
                    size: 1,
                    access: Access::Ro,
                    raw_min: None,
                    raw_max: None,
                    kind: RegisterKind::Temperature,
                },
            ],
        )
    }

    #[test]
    fn lookup_is_case_insensitive_and_accepts_offsets() {
        let ty = sample();
        assert_eq!(ty.register("Goal-Position").unwrap().offset, 0x1E);
        assert_eq!(ty.register("0x2b").unwrap().name, "present-temp");
        assert_eq!(ty.register("3").unwrap().name, "id");
        assert!(matches!(
            ty.register("torque"),
            Err(RegistryError::UnknownRegister(_))
        ));
    }

    #[test]
    fn registers_come_back_offset_ordered() {
        let ty = sample();
        let offsets: Vec<u8> = ty.registers().iter().map(|reg| reg.offset).collect();
        assert_eq!(offsets, [0x03, 0x1E, 0x2B]);
    }

    #[test]
    fn range_check_covers_width_and_bounds() {
        let ty = sample();
        let punch = ty.register("goal-position").unwrap();
        assert_eq!(punch.check_range(1023).unwrap(), 1023);
        assert!(matches!(
            punch.check_range(1024),
            Err(RegistryError::Range { .. })
        ));
        let id = ty.register("id").unwrap();
        assert!(id.check_range(300).is_err());
    }

    #[test]
    fn values_are_little_endian() {
        let ty = sample();
        let goal = ty.register("goal-position").unwrap();
        assert_eq!(goal.encode_value(0x03FF), [0xFF, 0x03]);
        assert_eq!(goal.decode_value(&[0xFF, 0x03]).unwrap(), 0x03FF);
        assert!(goal.decode_value(&[0xFF]).is_err());
    }

    #[test]
    fn dump_lists_every_register() {
        let ty = sample();
        let dump = ty.dump_regs(true);
        assert!(dump.contains("0x1e"));
        assert!(dump.contains("300.0 deg"));
        let raw = ty.dump_regs(false);
        assert!(raw.contains("1023"));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = DeviceTypeRegistry::new();
        registry.add(sample());
        assert_eq!(registry.get("servo").unwrap().model(), 12);
        assert!(registry.get("sensor").is_err());
        assert_eq!(registry.names(), ["servo"]);
    }
}
