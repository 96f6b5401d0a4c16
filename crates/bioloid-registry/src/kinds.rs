//! Semantic register kinds: unit formatting and parsing per kind.
//!
//! Conversions are deterministic integer arithmetic so that formatting a raw
//! value and parsing the result always lands back on the same raw value.

use serde::{Deserialize, Serialize};

use bioloid_transport::ErrorFlags;

use crate::{RegistryError, Result};

/// Integer in decimal, hex (`0x...`), or octal (leading `0`).
pub(crate) fn parse_int(text: &str) -> Option<i64> {
    let t = text.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8).ok()
    } else {
        t.parse().ok()
    }
}

/// Non-negative number with at most one decimal digit, scaled to tenths.
fn parse_tenths(text: &str) -> Option<u32> {
    let t = text.trim();
    let (whole, frac) = match t.split_once('.') {
        Some((w, f)) => (w, f),
        None => (t, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: u32 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let tenth: u32 = match frac {
        "" => 0,
        f if f.len() == 1 => f.parse().ok()?,
        _ => return None,
    };
    whole.checked_mul(10)?.checked_add(tenth)
}

fn strip_unit<'a>(text: &'a str, unit: &str) -> &'a str {
    let t = text.trim();
    if t.is_ascii() && t.len() >= unit.len() && t[t.len() - unit.len()..].eq_ignore_ascii_case(unit)
    {
        t[..t.len() - unit.len()].trim_end()
    } else {
        t
    }
}

fn dec_with_unit(text: &str, unit: &str) -> Option<i64> {
    strip_unit(text, unit).parse().ok()
}

fn tenths_with_unit(text: &str, unit: &str) -> Option<u32> {
    parse_tenths(strip_unit(text, unit))
}

/// Baud rate a divisor register value selects, rounded to whole bps.
fn baud_of(raw: u16) -> u32 {
    let div = u32::from(raw) + 1;
    (2_000_000 + div / 2) / div
}

/// Semantic interpretation of a register's raw value.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegisterKind {
    #[default]
    Raw,
    OnOff,
    Direction,
    BaudRate,
    Rdt,
    Angle,
    AngularVelocity,
    Temperature,
    Voltage,
    StatusRet,
    Alarm,
    Load,
}

impl RegisterKind {
    /// Look a kind up by its table-file name, case-insensitively.
    pub fn from_name(name: &str) -> Option<RegisterKind> {
        let all = [
            RegisterKind::Raw,
            RegisterKind::OnOff,
            RegisterKind::Direction,
            RegisterKind::BaudRate,
            RegisterKind::Rdt,
            RegisterKind::Angle,
            RegisterKind::AngularVelocity,
            RegisterKind::Temperature,
            RegisterKind::Voltage,
            RegisterKind::StatusRet,
            RegisterKind::Alarm,
            RegisterKind::Load,
        ];
        all.into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterKind::Raw => "Raw",
            RegisterKind::OnOff => "OnOff",
            RegisterKind::Direction => "Direction",
            RegisterKind::BaudRate => "BaudRate",
            RegisterKind::Rdt => "RDT",
            RegisterKind::Angle => "Angle",
            RegisterKind::AngularVelocity => "AngularVelocity",
            RegisterKind::Temperature => "Temperature",
            RegisterKind::Voltage => "Voltage",
            RegisterKind::StatusRet => "StatusRet",
            RegisterKind::Alarm => "Alarm",
            RegisterKind::Load => "Load",
        }
    }

    /// Raw values this kind can represent at all, before any per-register
    /// bounds narrow it further.
    pub(crate) fn domain(self) -> (u16, u16) {
        match self {
            RegisterKind::Raw | RegisterKind::Temperature | RegisterKind::Voltage => (0, u16::MAX),
            RegisterKind::OnOff | RegisterKind::Direction => (0, 1),
            RegisterKind::BaudRate | RegisterKind::Rdt => (0, 254),
            RegisterKind::Angle | RegisterKind::AngularVelocity => (0, 1023),
            RegisterKind::StatusRet => (0, 2),
            RegisterKind::Alarm => (0, 0x7f),
            RegisterKind::Load => (0, 0x7ff),
        }
    }

    /// Human-facing text for a raw value, units included.
    pub fn format(self, raw: u16) -> String {
        match self {
            RegisterKind::Raw => raw.to_string(),
            RegisterKind::OnOff => if raw != 0 { "on" } else { "off" }.to_string(),
            RegisterKind::Direction => if raw != 0 { "output" } else { "input" }.to_string(),
            RegisterKind::BaudRate => format!("{} bps", baud_of(raw)),
            RegisterKind::Rdt => format!("{} usec", u32::from(raw) * 2),
            RegisterKind::Angle => {
                let tenths = (u32::from(raw) * 3000 + 511) / 1023;
                format!("{}.{} deg", tenths / 10, tenths % 10)
            }
            RegisterKind::AngularVelocity => {
                let tenths = (u32::from(raw) * 1140 + 511) / 1023;
                format!("{}.{} RPM", tenths / 10, tenths % 10)
            }
            RegisterKind::Temperature => format!("{raw}C"),
            RegisterKind::Voltage => format!("{}.{}V", raw / 10, raw % 10),
            RegisterKind::StatusRet => match raw {
                0 => "none".to_string(),
                1 => "read".to_string(),
                2 => "all".to_string(),
                other => other.to_string(),
            },
            RegisterKind::Alarm => ErrorFlags::new(raw as u8).to_string(),
            RegisterKind::Load => {
                if raw & 0x400 != 0 {
                    format!("CW {}", raw & 0x3ff)
                } else {
                    format!("CCW {}", raw & 0x3ff)
                }
            }
        }
    }

    /// Parse human-facing text back into a raw value. Unit suffixes are
    /// optional; out-of-domain or unrecognised input is rejected.
    pub fn parse(self, text: &str) -> Result<u16> {
        let raw = match self {
            RegisterKind::Raw => {
                let val = parse_int(text).ok_or_else(|| self.bad(text))?;
                if !(0..=i64::from(u16::MAX)).contains(&val) {
                    return Err(self.bad(text));
                }
                val as u16
            }
            RegisterKind::OnOff => match text.trim() {
                t if t.eq_ignore_ascii_case("on") => 1,
                t if t.eq_ignore_ascii_case("off") => 0,
                _ => return Err(self.bad(text)),
            },
            RegisterKind::Direction => match text.trim() {
                t if t.eq_ignore_ascii_case("output") => 1,
                t if t.eq_ignore_ascii_case("input") => 0,
                _ => return Err(self.bad(text)),
            },
            RegisterKind::BaudRate => {
                let bps = dec_with_unit(text, "bps").ok_or_else(|| self.bad(text))?;
                if !(1..=2_000_000).contains(&bps) {
                    return Err(self.bad(text));
                }
                let bps = bps as u32;
                let div = (2 * 2_000_000 + bps) / (2 * bps);
                if !(1..=255).contains(&div) {
                    return Err(self.bad(text));
                }
                let raw = (div - 1) as u16;
                // Reject rates no divisor reproduces exactly.
                if baud_of(raw) != bps {
                    return Err(self.bad(text));
                }
                raw
            }
            RegisterKind::Rdt => {
                let usec = dec_with_unit(text, "usec").ok_or_else(|| self.bad(text))?;
                if usec < 0 || usec % 2 != 0 || usec / 2 > 254 {
                    return Err(self.bad(text));
                }
                (usec / 2) as u16
            }
            RegisterKind::Angle => {
                let tenths = tenths_with_unit(text, "deg").ok_or_else(|| self.bad(text))?;
                if tenths > 3000 {
                    return Err(self.bad(text));
                }
                ((tenths * 1023 + 1500) / 3000) as u16
            }
            RegisterKind::AngularVelocity => {
                let tenths = tenths_with_unit(text, "rpm").ok_or_else(|| self.bad(text))?;
                if tenths > 1140 {
                    return Err(self.bad(text));
                }
                ((tenths * 1023 + 570) / 1140) as u16
            }
            RegisterKind::Temperature => {
                let celsius = dec_with_unit(text, "c").ok_or_else(|| self.bad(text))?;
                if !(0..=i64::from(u16::MAX)).contains(&celsius) {
                    return Err(self.bad(text));
                }
                celsius as u16
            }
            RegisterKind::Voltage => {
                let tenths = tenths_with_unit(text, "v").ok_or_else(|| self.bad(text))?;
                if tenths > u32::from(u16::MAX) {
                    return Err(self.bad(text));
                }
                tenths as u16
            }
            RegisterKind::StatusRet => match text.trim() {
                t if t.eq_ignore_ascii_case("none") => 0,
                t if t.eq_ignore_ascii_case("read") => 1,
                t if t.eq_ignore_ascii_case("all") => 2,
                _ => return Err(self.bad(text)),
            },
            RegisterKind::Alarm => {
                u16::from(ErrorFlags::parse(text).ok_or_else(|| self.bad(text))?.bits())
            }
            RegisterKind::Load => return Err(self.bad(text)),
        };
        let (min, max) = self.domain();
        if raw < min || raw > max {
            return Err(self.bad(text));
        }
        Ok(raw)
    }

    fn bad(self, text: &str) -> RegistryError {
        RegistryError::Parse {
            kind: self.name(),
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_accepts_all_bases() {
        assert_eq!(RegisterKind::Raw.parse("123").unwrap(), 123);
        assert_eq!(RegisterKind::Raw.parse("0x7b").unwrap(), 123);
        assert_eq!(RegisterKind::Raw.parse("0173").unwrap(), 123);
        assert!(RegisterKind::Raw.parse("-1").is_err());
        assert!(RegisterKind::Raw.parse("65536").is_err());
    }

    #[test]
    fn on_off_and_direction_tokens() {
        assert_eq!(RegisterKind::OnOff.format(1), "on");
        assert_eq!(RegisterKind::OnOff.format(0), "off");
        assert_eq!(RegisterKind::OnOff.parse("ON").unwrap(), 1);
        assert!(RegisterKind::OnOff.parse("maybe").is_err());
        assert_eq!(RegisterKind::Direction.format(0), "input");
        assert_eq!(RegisterKind::Direction.parse("Output").unwrap(), 1);
    }

    #[test]
    fn baud_rate_round_trips() {
        assert_eq!(RegisterKind::BaudRate.format(1), "1000000 bps");
        assert_eq!(RegisterKind::BaudRate.parse("1000000 bps").unwrap(), 1);
        assert_eq!(RegisterKind::BaudRate.format(16), "117647 bps");
        assert_eq!(RegisterKind::BaudRate.parse("117647").unwrap(), 16);
        // No divisor lands exactly on this rate.
        assert!(RegisterKind::BaudRate.parse("117648").is_err());
        for raw in 0..=254u16 {
            let text = RegisterKind::BaudRate.format(raw);
            assert_eq!(RegisterKind::BaudRate.parse(&text).unwrap(), raw, "{text}");
        }
    }

    #[test]
    fn rdt_is_exact_inverse() {
        assert_eq!(RegisterKind::Rdt.format(250), "500 usec");
        assert_eq!(RegisterKind::Rdt.parse("500 usec").unwrap(), 250);
        assert!(RegisterKind::Rdt.parse("501").is_err());
        assert!(RegisterKind::Rdt.parse("508").is_ok());
        assert!(RegisterKind::Rdt.parse("510").is_err());
    }

    #[test]
    fn angle_round_trips_and_rejects_past_limit() {
        assert_eq!(RegisterKind::Angle.format(1023), "300.0 deg");
        assert_eq!(RegisterKind::Angle.parse("300.0").unwrap(), 1023);
        assert_eq!(RegisterKind::Angle.parse("300").unwrap(), 1023);
        assert_eq!(RegisterKind::Angle.parse("0").unwrap(), 0);
        assert!(RegisterKind::Angle.parse("300.3").is_err());
        assert!(RegisterKind::Angle.parse("300.1").is_err());
        for raw in 0..=1023u16 {
            let text = RegisterKind::Angle.format(raw);
            assert_eq!(RegisterKind::Angle.parse(&text).unwrap(), raw, "{text}");
        }
    }

    #[test]
    fn angular_velocity_round_trips() {
        assert_eq!(RegisterKind::AngularVelocity.format(1023), "114.0 RPM");
        for raw in 0..=1023u16 {
            let text = RegisterKind::AngularVelocity.format(raw);
            assert_eq!(
                RegisterKind::AngularVelocity.parse(&text).unwrap(),
                raw,
                "{text}"
            );
        }
    }

    #[test]
    fn temperature_and_voltage() {
        assert_eq!(RegisterKind::Temperature.format(32), "32C");
        assert_eq!(RegisterKind::Temperature.parse("32C").unwrap(), 32);
        assert_eq!(RegisterKind::Temperature.parse("32").unwrap(), 32);
        assert_eq!(RegisterKind::Voltage.format(74), "7.4V");
        assert_eq!(RegisterKind::Voltage.parse("7.4V").unwrap(), 74);
        assert_eq!(RegisterKind::Voltage.parse("5.0").unwrap(), 50);
        assert!(RegisterKind::Voltage.parse("7.45").is_err());
    }

    #[test]
    fn status_ret_tokens() {
        assert_eq!(RegisterKind::StatusRet.format(0), "none");
        assert_eq!(RegisterKind::StatusRet.parse("READ").unwrap(), 1);
        assert!(RegisterKind::StatusRet.parse("sometimes").is_err());
    }

    #[test]
    fn alarm_uses_flag_names() {
        assert_eq!(RegisterKind::Alarm.format(0), "None");
        assert_eq!(RegisterKind::Alarm.format(0x7f), "All");
        assert_eq!(RegisterKind::Alarm.format(0x24), "OverHeating,Overload");
        assert_eq!(
            RegisterKind::Alarm.parse("overheating,overload").unwrap(),
            0x24
        );
        assert_eq!(RegisterKind::Alarm.parse("none").unwrap(), 0);
    }

    #[test]
    fn load_is_sign_magnitude_and_read_only() {
        assert_eq!(RegisterKind::Load.format(0x423), "CW 35");
        assert_eq!(RegisterKind::Load.format(0x023), "CCW 35");
        assert!(RegisterKind::Load.parse("CW 35").is_err());
    }

    #[test]
    fn kind_names_resolve_case_insensitively() {
        assert_eq!(RegisterKind::from_name("angle"), Some(RegisterKind::Angle));
        assert_eq!(RegisterKind::from_name("RDT"), Some(RegisterKind::Rdt));
        assert_eq!(RegisterKind::from_name("nonsense"), None);
    }
}
