//! Test-bus script runner.
//!
//! A script queues the exact frames the driver is expected to write and the
//! status frames devices would answer with, then runs driver commands and
//! asserts on their outcome:
//!
//! ```text
//! echo checking temperature readback
//! test cmd-raw ff ff 01 04 02 2b 01 cc
//! test rsp-raw ff ff 01 03 00 20 db
//! test output "32C" servo 1 get present-temp
//! ```
//!
//! A run is clean only when every line passed and both test-bus queues are
//! empty at the end.

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

use bioloid_registry::{Device, DeviceTypeRegistry};
use bioloid_transport::{ErrorFlags, Instruction, ScriptedRsp, TestBus, Transactor};

pub fn run_script(registry: &DeviceTypeRegistry, text: &str) -> Result<()> {
    let mut runner = Runner {
        registry,
        xact: Transactor::new(TestBus::new()),
    };
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        runner
            .run_line(line)
            .with_context(|| format!("line {}: {line}", idx + 1))?;
    }
    runner.xact.into_bus().finish()?;
    Ok(())
}

struct Runner<'a> {
    registry: &'a DeviceTypeRegistry,
    xact: Transactor<TestBus>,
}

impl Runner<'_> {
    fn run_line(&mut self, line: &str) -> Result<()> {
        let (word, rest) = split_word(line).expect("caller skips blank lines");
        match word {
            "echo" => {
                println!("{rest}");
                Ok(())
            }
            "test" => self.run_test(rest),
            other => bail!("unrecognized directive '{other}'"),
        }
    }

    fn run_test(&mut self, rest: &str) -> Result<()> {
        let (word, rest) = split_word(rest).ok_or_else(|| anyhow!("missing test directive"))?;
        match word {
            "cmd" => {
                let (id, rest) = hex_word(rest).context("device id")?;
                let (instr, rest) =
                    split_word(rest).ok_or_else(|| anyhow!("missing instruction"))?;
                let payload = hex_bytes(rest)?;
                let instruction = build_instruction(instr, &payload)?;
                self.xact.bus_mut().expect(id, instruction);
                Ok(())
            }
            "cmd-raw" => {
                self.xact.bus_mut().expect_raw(hex_bytes(rest)?);
                Ok(())
            }
            "rsp" => {
                let (id, rest) = hex_word(rest).context("device id")?;
                let (error, rest) =
                    split_word(rest).ok_or_else(|| anyhow!("missing error name"))?;
                let flags = ErrorFlags::parse(error)
                    .ok_or_else(|| anyhow!("unknown error name '{error}'"))?;
                let params = hex_bytes(rest)?;
                self.xact.bus_mut().script_status(id, flags, params);
                Ok(())
            }
            "rsp-raw" => {
                let bytes = hex_bytes(rest)?;
                self.xact.bus_mut().script(ScriptedRsp::Raw(bytes));
                Ok(())
            }
            "rsp-timeout" => {
                self.xact.bus_mut().script_timeout();
                Ok(())
            }
            "success" => self.run_command(rest).map(|_| ()),
            "error" => match self.run_command(rest) {
                Ok(_) => bail!("expected the command to fail"),
                Err(err) => {
                    debug!(%err, "command failed as scripted");
                    Ok(())
                }
            },
            "output" => {
                let (expected, command) = parse_quoted(rest)?;
                let output = self.run_command(command)?;
                if output != expected {
                    bail!("expected output \"{expected}\", got \"{output}\"");
                }
                Ok(())
            }
            other => bail!("unrecognized test directive '{other}'"),
        }
    }

    /// Dispatch one driver command and return what it printed.
    fn run_command(&mut self, text: &str) -> Result<String> {
        let (word, rest) = split_word(text).ok_or_else(|| anyhow!("missing command"))?;
        if word == "action" {
            self.xact.action()?;
            return Ok(String::new());
        }
        let dev_type = self
            .registry
            .get(word)
            .map_err(|_| anyhow!("unknown command '{word}'"))?;
        let (id, rest) = split_word(rest).ok_or_else(|| anyhow!("missing device id"))?;
        let id: u8 = id.parse().context("device id")?;
        let mut dev = Device::new(&mut self.xact, dev_type, id);
        let (verb, rest) = split_word(rest).ok_or_else(|| anyhow!("missing verb"))?;
        match verb {
            "ping" => {
                let flags = dev.ping()?;
                Ok(format!("Rcvd Status: {flags}"))
            }
            "reset" => {
                dev.reset()?;
                Ok(String::new())
            }
            "get" => {
                let (name, _) = split_word(rest).ok_or_else(|| anyhow!("missing register"))?;
                Ok(dev.get(name)?)
            }
            "get-raw" => {
                let (name, _) = split_word(rest).ok_or_else(|| anyhow!("missing register"))?;
                Ok(dev.get_raw(name)?.to_string())
            }
            "set" => {
                let (name, value) = split_word(rest).ok_or_else(|| anyhow!("missing register"))?;
                dev.set(name, value.trim())?;
                Ok(String::new())
            }
            "set-raw" => {
                let (name, value) = split_word(rest).ok_or_else(|| anyhow!("missing register"))?;
                dev.set_raw(name, value.trim())?;
                Ok(String::new())
            }
            "deferred-set" => {
                let (name, value) = split_word(rest).ok_or_else(|| anyhow!("missing register"))?;
                dev.deferred_set(name, value.trim())?;
                Ok(String::new())
            }
            other => bail!("unrecognized verb '{other}'"),
        }
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let t = text.trim_start();
    if t.is_empty() {
        return None;
    }
    match t.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim_start())),
        None => Some((t, "")),
    }
}

fn hex_word(text: &str) -> Result<(u8, &str)> {
    let (word, rest) = split_word(text).ok_or_else(|| anyhow!("missing hex byte"))?;
    let byte = u8::from_str_radix(word, 16).with_context(|| format!("hex byte '{word}'"))?;
    Ok((byte, rest))
}

fn hex_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .map(|word| {
            u8::from_str_radix(word, 16).with_context(|| format!("hex byte '{word}'"))
        })
        .collect()
}

fn parse_quoted(text: &str) -> Result<(String, &str)> {
    let t = text.trim_start();
    let rest = t
        .strip_prefix('"')
        .ok_or_else(|| anyhow!("expecting a quoted string"))?;
    let end = rest.find('"').ok_or_else(|| anyhow!("unterminated quote"))?;
    Ok((rest[..end].to_string(), rest[end + 1..].trim_start()))
}

fn build_instruction(instr: &str, payload: &[u8]) -> Result<Instruction> {
    let instruction = match instr {
        "ping" => Instruction::Ping,
        "action" => Instruction::Action,
        "reset" => Instruction::Reset,
        "read" => {
            let [offset, length] = payload else {
                bail!("read expects offset and length bytes");
            };
            Instruction::ReadData {
                offset: *offset,
                length: *length,
            }
        }
        "write" | "reg-write" => {
            let Some((&offset, data)) = payload.split_first() else {
                bail!("{instr} expects an offset byte");
            };
            if instr == "write" {
                Instruction::WriteData {
                    offset,
                    data: data.to_vec(),
                }
            } else {
                Instruction::RegWrite {
                    offset,
                    data: data.to_vec(),
                }
            }
        }
        other => bail!("unrecognized instruction '{other}'"),
    };
    if matches!(
        instruction,
        Instruction::Ping | Instruction::Action | Instruction::Reset
    ) && !payload.is_empty()
    {
        bail!("{instr} takes no payload bytes");
    }
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioloid_registry::load_str;

    fn registry() -> DeviceTypeRegistry {
        let table = include_str!("../../../configs/devices/reg-servo.bld");
        let mut registry = DeviceTypeRegistry::new();
        for dev_type in load_str("reg-servo.bld", table).unwrap() {
            registry.add(dev_type);
        }
        registry
    }

    #[test]
    fn set_id_of_broadcast_device() {
        let script = "\
test cmd-raw ff ff fe 04 03 03 01 f6
test success servo 254 set id 1
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn read_present_temp() {
        let script = "\
test cmd-raw ff ff 01 04 02 2b 01 cc
test rsp-raw ff ff 01 03 00 20 db
test output \"32C\" servo 1 get present-temp
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn ping_with_overheating_is_success() {
        let script = "\
test cmd-raw ff ff 01 02 01 fb
test rsp-raw ff ff 01 02 04 f8
test success servo 1 ping
";
        run_script(&registry(), script).unwrap();
        let script = "\
test cmd 1 ping
test rsp 1 overheating
test output \"Rcvd Status: OverHeating\" servo 1 ping
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn reset_id_zero() {
        let script = "\
test cmd-raw ff ff 00 02 06 f7
test rsp-raw ff ff 00 02 00 fd
test success servo 0 reset
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn set_goal_position_to_full_deflection() {
        let script = "\
test cmd-raw ff ff 01 05 03 1e ff 03 d6
test rsp 1 none
test success servo 1 set goal-position 300
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn out_of_range_punch_leaves_queues_untouched() {
        let script = "\
test error servo 1 set punch 1024
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn scripted_timeout_fails_ping() {
        let script = "\
test cmd 1 ping
test rsp-timeout
test error servo 1 ping
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn voltage_boundary_is_accepted() {
        let script = "\
test cmd 1 write 0c 32
test rsp 1 none
test success servo 1 set low-voltage-limit 5.0
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn leftover_expectations_fail_the_run() {
        let script = "\
test cmd 1 ping
";
        assert!(run_script(&registry(), script).is_err());
    }

    #[test]
    fn structured_and_raw_expectations_agree() {
        let script = "\
test cmd fe action
test success action
";
        run_script(&registry(), script).unwrap();
    }

    #[test]
    fn wrong_output_is_an_error() {
        let script = "\
test cmd 1 read 2b 01
test rsp 1 none 21
test output \"32C\" servo 1 get present-temp
";
        assert!(run_script(&registry(), script).is_err());
    }

    #[test]
    fn device_errors_fail_reads() {
        let script = "\
test cmd 1 read 2b 01
test rsp 1 overload 00
test error servo 1 get present-temp
";
        run_script(&registry(), script).unwrap();
    }
}
