use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use armv6m_sim::cpu::Cpu;
use armv6m_sim::debug::GdbServer;
use armv6m_sim::devices::{ConsoleUart, SysTick};
use armv6m_sim::loader;
use armv6m_sim::memory::Memory;
use armv6m_sim::trace::TraceMask;

const DEFAULT_BASE: u32 = 0x2000_0000;
const DEFAULT_SIZE: u32 = 64 * 1024 * 1024;
const SYSTICK_BASE: u32 = 0xE000_E010;
const SYSTICK_LEN: u32 = 16;
const SYSTICK_IRQ: u32 = 15;
const UART_BASE: u32 = 0x4000_0000;
const UART_LEN: u32 = 4;
const GDB_PORT: u16 = 3333;

fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

/// ARMv6-M Thumb instruction-set simulator.
#[derive(Parser, Debug)]
#[command(name = "armv6m-sim")]
struct Args {
    /// Firmware image to load: `.bin` for a raw binary, anything else is parsed as ELF.
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Enable the instruction trace when non-zero.
    #[arg(short = 't', long = "trace", default_value_t = 0)]
    trace: u32,

    /// Trace category bitmask (see `armv6m_sim::trace::TraceMask`).
    #[arg(short = 'v', long = "trace-mask", value_parser = parse_u32, default_value = "0")]
    trace_mask: u32,

    /// Stop after this many instructions.
    #[arg(short = 'c', long = "max-instructions")]
    max_instructions: Option<u64>,

    /// Stop when PC equals this address.
    #[arg(short = 'r', long = "stop-pc", value_parser = parse_u32)]
    stop_pc: Option<u32>,

    /// Base address for a raw binary load.
    #[arg(short = 'b', long = "base", value_parser = parse_u32, default_value_t = DEFAULT_BASE)]
    base: u32,

    /// Region size in bytes for a raw binary load.
    #[arg(short = 's', long = "size", value_parser = parse_u32, default_value_t = DEFAULT_SIZE)]
    size: u32,

    /// Enable trace only once PC reaches this address.
    #[arg(short = 'e', long = "trace-from", value_parser = parse_u32)]
    trace_from: Option<u32>,

    /// Override the start address after reset.
    #[arg(short = 'X', long = "start", value_parser = parse_u32)]
    start_override: Option<u32>,

    /// Launch the GDB remote-debug server instead of running standalone.
    #[arg(short = 'g', long = "gdb")]
    gdb: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut cpu = Cpu::new(Memory::new());
    cpu.mem
        .map_device(SYSTICK_BASE, SYSTICK_LEN, Box::new(SysTick::new(SYSTICK_IRQ)))
        .context("mapping systick")?;
    cpu.mem
        .map_device(UART_BASE, UART_LEN, Box::new(ConsoleUart::new()))
        .context("mapping console uart")?;

    let is_raw_binary = args
        .file
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("bin"))
        .unwrap_or(false);

    let vector_table_base = if is_raw_binary {
        loader::load_binary(&mut cpu, &args.file, args.base, args.size)?
    } else {
        let entry = loader::load_elf(&mut cpu, &args.file)?;
        loader::find_symbol(&args.file, "vectors")
            .ok()
            .flatten()
            .unwrap_or(entry)
    };

    cpu.reset(vector_table_base).context("resetting cpu from vector table")?;
    if let Some(start) = args.start_override {
        cpu.set_pc(start);
    }

    cpu.trace = if args.trace != 0 {
        TraceMask::from_bits(args.trace_mask)
    } else {
        TraceMask::NONE
    };

    if args.gdb {
        let mut server = GdbServer::bind_and_accept(GDB_PORT)?;
        server.serve(&mut cpu)?;
        return Ok(());
    }

    run_standalone(&mut cpu, args.max_instructions, args.stop_pc, args.trace_from)
}

fn run_standalone(
    cpu: &mut Cpu,
    max_instructions: Option<u64>,
    stop_pc: Option<u32>,
    trace_from: Option<u32>,
) -> anyhow::Result<()> {
    let mut executed: u64 = 0;
    loop {
        if cpu.halted() || cpu.faulted() {
            break;
        }
        if let Some(addr) = stop_pc {
            if cpu.pc == addr {
                info!(pc = cpu.pc, "reached stop address");
                break;
            }
        }
        if let Some(max) = max_instructions {
            if executed >= max {
                info!(executed, "instruction budget exhausted");
                break;
            }
        }
        if let Some(from) = trace_from {
            if cpu.pc == from {
                cpu.trace = TraceMask::ALL;
            }
        }

        cpu.step();
        executed += 1;
    }

    if let Some(fault) = cpu.fault {
        error!(%fault, pc = cpu.pc, "simulation halted on fault");
        std::process::exit(1);
    }

    Ok(())
}
