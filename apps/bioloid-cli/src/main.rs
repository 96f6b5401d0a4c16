use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use bioloid_registry::{load_dir, Device};
use bioloid_transport::{SerialBus, Transactor};

mod script;

#[derive(Parser, Debug)]
#[command(
    name = "bioloid",
    version,
    about = "Send commands to bioloid/Dynamixel devices",
    disable_help_subcommand = true
)]
struct Cli {
    /// Serial port (defaults to $BIOLOID_PORT)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true, default_value_t = 1_000_000)]
    baud: u32,

    /// Directory of reg-*.bld device-type files
    #[arg(long, global = true, default_value = "configs/devices")]
    types: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping a range of ids, reading model and firmware from responders
    Scan {
        #[arg(long, default_value_t = 0)]
        start: u8,
        #[arg(long, default_value_t = 32)]
        count: u8,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ping one device
    Ping { id: u8 },
    /// Reset one device's control table to factory defaults
    Reset { id: u8 },
    /// Broadcast ACTION, triggering deferred writes
    Action,
    /// Read a register and print its value ("all" lists every register)
    Get {
        #[arg(long, default_value = "servo")]
        device_type: String,
        id: u8,
        name: String,
    },
    /// Read a register and print its raw integer value
    GetRaw {
        #[arg(long, default_value = "servo")]
        device_type: String,
        id: u8,
        name: String,
    },
    /// Parse a value for a register's kind and write it
    Set {
        #[arg(long, default_value = "servo")]
        device_type: String,
        id: u8,
        name: String,
        value: String,
    },
    /// Write a raw integer value, bypassing unit conversion
    SetRaw {
        #[arg(long, default_value = "servo")]
        device_type: String,
        id: u8,
        name: String,
        value: String,
    },
    /// Write a value the device defers until a broadcast ACTION
    DeferredSet {
        #[arg(long, default_value = "servo")]
        device_type: String,
        id: u8,
        name: String,
        value: String,
    },
    /// Dump the register table of a device type
    Regs {
        name: String,
        /// Show raw min/max instead of unit-formatted values
        #[arg(long)]
        raw: bool,
    },
    /// List loaded device types
    Types {
        #[arg(long)]
        json: bool,
    },
    /// Run a test-bus script; exits non-zero on any failed assertion
    Script { file: String },
}

#[derive(Serialize)]
struct ScanLine {
    id: u8,
    model: u16,
    firmware: u8,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let registry = load_dir(&cli.types)
        .with_context(|| format!("loading device types from '{}'", cli.types))?;

    match cli.command {
        Commands::Script { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading script '{file}'"))?;
            script::run_script(&registry, &text).with_context(|| format!("script '{file}'"))
        }
        Commands::Scan { start, count, json } => {
            if count == 0 {
                return Ok(());
            }
            let mut xact = open_transactor(&cli)?;
            let end = start.saturating_add(count - 1);
            let found = xact.scan(start..=end)?;
            for rec in &found {
                if json {
                    let line = ScanLine {
                        id: rec.id,
                        model: rec.model,
                        firmware: rec.firmware,
                    };
                    println!("{}", serde_json::to_string(&line)?);
                } else {
                    println!("id {}\tmodel {}\tfirmware 0x{:02x}", rec.id, rec.model, rec.firmware);
                }
            }
            if found.is_empty() {
                println!("no devices found in {start}..={end}");
            }
            Ok(())
        }
        Commands::Ping { id } => {
            let mut xact = open_transactor(&cli)?;
            let flags = xact.ping(id)?;
            println!("Rcvd Status: {flags}");
            Ok(())
        }
        Commands::Reset { id } => {
            let mut xact = open_transactor(&cli)?;
            xact.reset(id)?;
            println!("id {id} reset");
            Ok(())
        }
        Commands::Action => {
            let mut xact = open_transactor(&cli)?;
            xact.action()?;
            Ok(())
        }
        Commands::Get {
            ref device_type,
            id,
            ref name,
        } => {
            let dev_type = registry.get(&device_type)?;
            let mut xact = open_transactor(&cli)?;
            println!("{}", Device::new(&mut xact, dev_type, id).get(&name)?);
            Ok(())
        }
        Commands::GetRaw {
            ref device_type,
            id,
            ref name,
        } => {
            let dev_type = registry.get(&device_type)?;
            let mut xact = open_transactor(&cli)?;
            println!("{}", Device::new(&mut xact, dev_type, id).get_raw(&name)?);
            Ok(())
        }
        Commands::Set {
            ref device_type,
            id,
            ref name,
            ref value,
        } => {
            let dev_type = registry.get(&device_type)?;
            let mut xact = open_transactor(&cli)?;
            Device::new(&mut xact, dev_type, id).set(&name, &value)?;
            Ok(())
        }
        Commands::SetRaw {
            ref device_type,
            id,
            ref name,
            ref value,
        } => {
            let dev_type = registry.get(&device_type)?;
            let mut xact = open_transactor(&cli)?;
            Device::new(&mut xact, dev_type, id).set_raw(&name, &value)?;
            Ok(())
        }
        Commands::DeferredSet {
            ref device_type,
            id,
            ref name,
            ref value,
        } => {
            let dev_type = registry.get(&device_type)?;
            let mut xact = open_transactor(&cli)?;
            Device::new(&mut xact, dev_type, id).deferred_set(&name, &value)?;
            Ok(())
        }
        Commands::Regs { name, raw } => {
            let dev_type = registry.get(&name)?;
            print!("{}", dev_type.dump_regs(!raw));
            Ok(())
        }
        Commands::Types { json } => {
            for name in registry.names() {
                if json {
                    let dev_type = registry.get(name)?;
                    println!("{}", serde_json::to_string(&*dev_type)?);
                } else {
                    println!("{name}");
                }
            }
            Ok(())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn open_transactor(cli: &Cli) -> Result<Transactor<SerialBus>> {
    let port = cli
        .port
        .clone()
        .or_else(|| std::env::var("BIOLOID_PORT").ok())
        .context("no serial port; pass --port or set BIOLOID_PORT")?;
    info!(port, baud = cli.baud, "opening bus");
    let bus = SerialBus::open(&port, cli.baud).with_context(|| format!("opening port '{port}'"))?;
    Ok(Transactor::new(bus))
}
