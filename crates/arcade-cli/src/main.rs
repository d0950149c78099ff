//! CLI entry point for running raw ARM images on the Arcade scheduler.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use arcade_arm::{ArmConfig, ArmCore, ArmRegister};
use arcade_core::{
    CpuClockConfig, CpuConfig, CpuCore, CpuUnit, FlatMemory, FrameOutcome, InputLine,
    InterruptRequest, LineState, Machine, MachineConfig, MemoryBus,
};
#[cfg(test)]
use tempfile as _;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE_TEXT: &str = "\
Usage: arcade-run <image> [options]

Runs a raw little-endian ARM image on one or more cores sharing a machine
timeline, then prints a register and scheduler report.

Options:
  -f, --frames <n>     Video frames to run (default: 60)
  -c, --cpus <n>       Cores, each with its own copy of the image (default: 1)
      --clock <hz>     Clock rate of every core (default: 8000000)
      --load <addr>    Load address of the image (default: 0)
      --vblank-irq     Hold IRQ 0 on every core once per frame
      --trap           Take the SWI and undefined-instruction vectors
  -d, --disasm <n>     Disassemble n instructions from the reset vector first
  -v, --verbose        Log at debug level (RUST_LOG is honored otherwise)
  -h, --help           Show this help message

Numbers accept a 0x prefix for hexadecimal.

Examples:
  arcade-run demo.bin
  arcade-run demo.bin --frames 600 --vblank-irq -d 8
";

/// Top of the 26-bit address space.
const ADDRESS_SPACE: u64 = 1 << 26;
const MIN_ADDRESS_BITS: u8 = 16;

#[derive(Debug, PartialEq, Eq)]
struct RunArgs {
    image: PathBuf,
    frames: u64,
    cpus: usize,
    clock_hz: u32,
    load: u32,
    vblank_irq: bool,
    trap: bool,
    disasm: u32,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Run(RunArgs),
    Help,
}

fn parse_number(value: Option<OsString>, option: &str) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("missing value for {option}"))?;
    let text = value.to_string_lossy();
    let parsed = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(|| text.parse(), |hex| u64::from_str_radix(hex, 16));
    parsed.map_err(|_| format!("invalid value for {option}: {text}"))
}

fn narrow<T: TryFrom<u64>>(value: u64, option: &str) -> Result<T, String> {
    T::try_from(value).map_err(|_| format!("value for {option} is out of range: {value}"))
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut image: Option<PathBuf> = None;
    let mut frames = 60;
    let mut cpus = 1;
    let mut clock_hz = 8_000_000;
    let mut load = 0;
    let mut vblank_irq = false;
    let mut trap = false;
    let mut disasm = 0;
    let mut verbose = false;

    while let Some(arg) = args.next() {
        let flag = arg.to_string_lossy().to_string();
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseResult::Help),
            "-v" | "--verbose" => verbose = true,
            "--vblank-irq" => vblank_irq = true,
            "--trap" => trap = true,
            "-f" | "--frames" => frames = parse_number(args.next(), &flag)?,
            "-c" | "--cpus" => cpus = narrow(parse_number(args.next(), &flag)?, &flag)?,
            "--clock" => clock_hz = narrow(parse_number(args.next(), &flag)?, &flag)?,
            "--load" => load = narrow(parse_number(args.next(), &flag)?, &flag)?,
            "-d" | "--disasm" => disasm = narrow(parse_number(args.next(), &flag)?, &flag)?,
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            _ => {
                if image.is_some() {
                    return Err("multiple image paths provided".to_string());
                }
                image = Some(PathBuf::from(arg));
            }
        }
    }

    if cpus == 0 {
        return Err("--cpus must be at least 1".to_string());
    }
    let image = image.ok_or_else(|| "missing image path".to_string())?;
    Ok(ParseResult::Run(RunArgs {
        image,
        frames,
        cpus,
        clock_hz,
        load,
        vblank_irq,
        trap,
        disasm,
        verbose,
    }))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Smallest address width holding `end` bytes.
fn address_bits(end: u64) -> u8 {
    let mut bits = MIN_ADDRESS_BITS;
    while bits < 26 && (1u64 << bits) < end {
        bits += 1;
    }
    bits
}

fn load_image(args: &RunArgs) -> Result<FlatMemory, String> {
    let image = fs::read(&args.image)
        .map_err(|e| format!("failed to read {}: {e}", args.image.display()))?;
    if image.is_empty() {
        return Err(format!("{} is empty", args.image.display()));
    }
    let end = u64::from(args.load) + image.len() as u64;
    if end > ADDRESS_SPACE {
        return Err(format!(
            "image of {} bytes at 0x{:X} does not fit the 26-bit address space",
            image.len(),
            args.load
        ));
    }
    let mut memory = FlatMemory::new(address_bits(end));
    memory.load(args.load, &image);
    debug!(bytes = image.len(), load = args.load, "image loaded");
    Ok(memory)
}

fn arm_config(args: &RunArgs) -> ArmConfig {
    if args.trap {
        ArmConfig::trapping()
    } else {
        ArmConfig::default()
    }
}

fn machine_config(args: &RunArgs) -> MachineConfig {
    let cpus = (0..args.cpus)
        .map(|index| CpuConfig {
            name: format!("arm{index}"),
            clock: CpuClockConfig::new(args.clock_hz),
            vblank_interrupts_per_frame: u32::from(args.vblank_irq),
            vblank_interrupt: args.vblank_irq.then_some(InterruptRequest {
                line: InputLine::Irq(0),
                state: LineState::Hold,
            }),
            ..CpuConfig::default()
        })
        .collect();
    MachineConfig {
        cpus,
        ..MachineConfig::default()
    }
}

fn print_disassembly(memory: &mut FlatMemory, count: u32) {
    let core = ArmCore::default();
    let mut pc = 0;
    for _ in 0..count {
        let mut text = String::new();
        let word = memory.read32(pc);
        let length = core.disassemble(memory, pc, &mut text);
        println!("{pc:08X}: {word:08X}  {text}");
        pc = pc.wrapping_add(length);
    }
}

fn print_report(machine: &Machine, frames: u64, resets: u64) {
    let fps = machine.config().frames_per_second;
    println!("Ran {frames} frames at {fps} fps on {} core(s)", machine.config().cpus.len());
    if resets > 0 {
        println!("resets: {resets}");
    }
    for (cpu, config) in machine.config().cpus.iter().enumerate() {
        let Some(core) = machine.core(cpu) else {
            continue;
        };
        let cycles = machine.scheduler().total_cycles(cpu).unwrap_or(0);
        let psw = core.register(ArmRegister::Psw.id()).unwrap_or(0);
        println!(
            "cpu{cpu} {}: pc=0x{:08X} psw=0x{psw:08X} cycles={cycles}",
            config.name,
            core.pc()
        );
        for row in 0..4u32 {
            let line: Vec<String> = (0..4u32)
                .map(|col| {
                    let index = row * 4 + col;
                    let value = core.register(ArmRegister::R0.id() + index).unwrap_or(0);
                    format!("R{index}=0x{value:08X}")
                })
                .collect();
            println!("  {}", line.join(" "));
        }
    }
    let sched = machine.scheduler().stats();
    println!(
        "scheduler: slices={} timers={} renormalizations={} preemptions={} stalemates={}",
        sched.slices_granted,
        sched.timers_fired,
        sched.renormalizations,
        sched.preemptions,
        sched.stalemates
    );
    let irq = machine.interrupts().stats();
    println!(
        "interrupts: delivered={} dropped={} acknowledged={}",
        irq.delivered, irq.dropped, irq.acknowledged
    );
}

fn run(args: &RunArgs) -> Result<(), i32> {
    let mut memory = load_image(args).map_err(|error| {
        eprintln!("error: {error}");
        1
    })?;
    if args.disasm > 0 {
        print_disassembly(&mut memory, args.disasm);
    }

    let units = (0..args.cpus)
        .map(|_| {
            CpuUnit::new(
                Box::new(ArmCore::new(arm_config(args))),
                Box::new(memory.clone()),
            )
        })
        .collect();
    let mut machine = Machine::new(machine_config(args), units).map_err(|error| {
        eprintln!("error: {error}");
        1
    })?;

    let mut completed = 0;
    let mut resets = 0;
    while completed < args.frames {
        match machine.run_frame() {
            Ok(FrameOutcome::Completed(_)) => completed += 1,
            Ok(FrameOutcome::Reset) => resets += 1,
            Ok(FrameOutcome::ShutDown) => break,
            Err(error) => {
                eprintln!("error: {error}");
                return Err(1);
            }
        }
    }
    info!(frames = completed, resets, "run finished");
    print_report(&machine, completed, resets);
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(args)) => {
            init_logging(args.verbose);
            run(&args).err().unwrap_or(0)
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
