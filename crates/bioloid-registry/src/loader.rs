//! Loader for line-oriented register-table files.
//!
//! ```text
//! DeviceType: servo
//! Model: 12
//! Register: 0x1e goal-position 2 rw 0 1023 Angle   # offset name size access
//! EndDeviceType
//! ```
//!
//! `#` starts a comment; blank lines are ignored. Offsets and bounds accept
//! decimal, hex, or octal. An omitted or unrecognised kind means Raw.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::kinds::{parse_int, RegisterKind};
use crate::types::{Access, DeviceType, DeviceTypeRegistry, Register};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{file}:{line}: {problem}")]
    Syntax {
        file: String,
        line: usize,
        problem: String,
    },
    #[error("reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

struct Parser<'a> {
    file: &'a str,
    line: usize,
    name: Option<String>,
    model: Option<u16>,
    registers: Vec<Register>,
    done: Vec<DeviceType>,
}

impl<'a> Parser<'a> {
    fn new(file: &'a str) -> Self {
        Parser {
            file,
            line: 0,
            name: None,
            model: None,
            registers: Vec::new(),
            done: Vec::new(),
        }
    }

    fn fail(&self, problem: impl Into<String>) -> LoadError {
        LoadError::Syntax {
            file: self.file.to_string(),
            line: self.line,
            problem: problem.into(),
        }
    }

    fn int_field(&self, word: &str, what: &str) -> Result<u16, LoadError> {
        match parse_int(word) {
            Some(val) if (0..=i64::from(u16::MAX)).contains(&val) => Ok(val as u16),
            _ => Err(self.fail(format!("expecting an integer {what}, found '{word}'"))),
        }
    }

    fn parse_line(&mut self, words: &[&str]) -> Result<(), LoadError> {
        let (keyword, args) = words.split_first().expect("caller skips blank lines");
        if self.name.is_none() {
            if *keyword != "DeviceType:" {
                return Err(self.fail(format!("'{keyword}' outside a device type block")));
            }
            let [name] = args else {
                return Err(self.fail("DeviceType: expecting exactly one name"));
            };
            self.name = Some(name.to_string());
            return Ok(());
        }
        match *keyword {
            "Model:" => {
                let [model] = args else {
                    return Err(self.fail("Model: expecting exactly one number"));
                };
                self.model = Some(self.int_field(model, "model")?);
                Ok(())
            }
            "Register:" => self.parse_register(args),
            "EndDeviceType" => {
                if !args.is_empty() {
                    return Err(self.fail("EndDeviceType takes no arguments"));
                }
                let name = self.name.take().expect("inside a block");
                let model = self
                    .model
                    .take()
                    .ok_or_else(|| self.fail(format!("device type '{name}' has no Model:")))?;
                debug!(%name, model, registers = self.registers.len(), "device type loaded");
                self.done
                    .push(DeviceType::new(name, model, std::mem::take(&mut self.registers)));
                Ok(())
            }
            other => Err(self.fail(format!("unrecognized keyword: {other}"))),
        }
    }

    fn parse_register(&mut self, args: &[&str]) -> Result<(), LoadError> {
        let (&offset, args) = args
            .split_first()
            .ok_or_else(|| self.fail("Register: expecting offset, name, size, and access"))?;
        let (&name, args) = args
            .split_first()
            .ok_or_else(|| self.fail("Register: expecting name, size, and access"))?;
        let (&size, args) = args
            .split_first()
            .ok_or_else(|| self.fail("Register: expecting size and access"))?;
        let (&access, args) = args
            .split_first()
            .ok_or_else(|| self.fail("Register: expecting access"))?;

        let offset = self.int_field(offset, "offset")?;
        let offset = u8::try_from(offset)
            .map_err(|_| self.fail(format!("offset 0x{offset:x} does not fit a byte")))?;
        let size = self.int_field(size, "size")?;
        if !(1..=2).contains(&size) {
            return Err(self.fail(format!("register '{name}' size must be 1 or 2, found {size}")));
        }
        let access = match access {
            "ro" => Access::Ro,
            "rw" => Access::Rw,
            other => {
                return Err(self.fail(format!(
                    "register '{name}' access must be ro or rw, found '{other}'"
                )))
            }
        };

        let (raw_min, raw_max, kind_word) = match args {
            [] => (None, None, None),
            [kind] => (None, None, Some(*kind)),
            [min, max] => (Some(*min), Some(*max), None),
            [min, max, kind] => (Some(*min), Some(*max), Some(*kind)),
            _ => {
                return Err(self.fail(format!(
                    "register '{name}': expecting 'kind' or 'min max kind', found {} arguments",
                    args.len()
                )))
            }
        };
        let raw_min = raw_min.map(|word| self.int_field(word, "min")).transpose()?;
        let raw_max = raw_max.map(|word| self.int_field(word, "max")).transpose()?;
        // Unrecognised kind names fall back to plain integers.
        let kind = kind_word
            .and_then(RegisterKind::from_name)
            .unwrap_or_default();

        if self.registers.iter().any(|reg| reg.offset == offset) {
            return Err(self.fail(format!("duplicate register offset 0x{offset:02x}")));
        }
        if self
            .registers
            .iter()
            .any(|reg| reg.name.eq_ignore_ascii_case(name))
        {
            return Err(self.fail(format!("duplicate register name '{name}'")));
        }

        self.registers.push(Register {
            offset,
            name: name.to_string(),
            size: size as u8,
            access,
            raw_min,
            raw_max,
            kind,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<DeviceType>, LoadError> {
        if let Some(name) = &self.name {
            self.line += 1;
            return Err(self.fail(format!("device type '{name}' is missing EndDeviceType")));
        }
        Ok(std::mem::take(&mut self.done))
    }
}

/// Parse device types out of table text. `file` is only used in diagnostics.
pub fn load_str(file: &str, text: &str) -> Result<Vec<DeviceType>, LoadError> {
    let mut parser = Parser::new(file);
    for line in text.lines() {
        parser.line += 1;
        let line = line.split('#').next().unwrap_or("");
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        parser.parse_line(&words)?;
    }
    parser.finish()
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<DeviceType>, LoadError> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        file: file.clone(),
        source,
    })?;
    load_str(&file, &text)
}

/// Load every `reg-*.bld` file in `dir` into one registry.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<DeviceTypeRegistry, LoadError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
        file: dir.display().to_string(),
        source,
    })?;
    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("reg-") && name.ends_with(".bld"))
        })
        .collect();
    paths.sort();
    let mut registry = DeviceTypeRegistry::new();
    for path in paths {
        for dev_type in load_file(&path)? {
            registry.add(dev_type);
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# a comment
DeviceType: servo
Model: 12

Register: 0x03 id            1 rw 0 253      # the bus address
Register: 0x1e goal-position 2 rw 0 1023 Angle
Register: 0x2b present-temp  1 ro Temperature
EndDeviceType
";

    #[test]
    fn parses_a_device_type() {
        let types = load_str("sample", SAMPLE).unwrap();
        assert_eq!(types.len(), 1);
        let ty = &types[0];
        assert_eq!(ty.name(), "servo");
        assert_eq!(ty.model(), 12);
        assert_eq!(ty.registers().len(), 3);
        let goal = ty.register("goal-position").unwrap();
        assert_eq!(goal.kind, RegisterKind::Angle);
        assert_eq!((goal.raw_min, goal.raw_max), (Some(0), Some(1023)));
        let temp = ty.register("present-temp").unwrap();
        assert_eq!(temp.kind, RegisterKind::Temperature);
        assert!(!temp.is_writable());
    }

    #[test]
    fn duplicate_offset_fails_load() {
        let text = "\
DeviceType: servo
Model: 12
Register: 0x03 id  1 rw 0 253
Register: 0x03 id2 1 rw 0 253
EndDeviceType
";
        let err = load_str("dup", text).unwrap_err();
        assert!(err.to_string().contains("duplicate register offset"));
        assert!(err.to_string().contains("dup:4"));
    }

    #[test]
    fn unterminated_block_fails_load() {
        let err = load_str("open", "DeviceType: servo\nModel: 12\n").unwrap_err();
        assert!(err.to_string().contains("missing EndDeviceType"));
    }

    #[test]
    fn keywords_outside_blocks_fail_load() {
        assert!(load_str("stray", "Model: 12\n").is_err());
        assert!(load_str("stray", "Frobnicate: 1\n").is_err());
    }

    #[test]
    fn unknown_kind_defaults_to_raw() {
        let text = "\
DeviceType: servo
Model: 12
Register: 0x00 mystery 1 rw 0 10 Quaternion
EndDeviceType
";
        let types = load_str("kind", text).unwrap();
        assert_eq!(
            types[0].register("mystery").unwrap().kind,
            RegisterKind::Raw
        );
    }

    #[test]
    fn bad_access_and_size_fail_load() {
        assert!(load_str(
            "bad",
            "DeviceType: x\nModel: 1\nRegister: 0 a 3 rw\nEndDeviceType\n"
        )
        .is_err());
        assert!(load_str(
            "bad",
            "DeviceType: x\nModel: 1\nRegister: 0 a 1 wo\nEndDeviceType\n"
        )
        .is_err());
    }

    #[test]
    fn model_is_required() {
        let err = load_str("nomodel", "DeviceType: x\nEndDeviceType\n").unwrap_err();
        assert!(err.to_string().contains("no Model:"));
    }

    #[test]
    fn two_types_in_one_file() {
        let text = "\
DeviceType: servo
Model: 12
Register: 0x03 id 1 rw 0 253
EndDeviceType
DeviceType: sensor
Model: 13
Register: 0x03 id 1 rw 0 253
EndDeviceType
";
        let types = load_str("two", text).unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[1].name(), "sensor");
    }
}
