use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, Result};

use b33::{assemble, AsmOptions, Machine, OutputKind, Program};

/// B33 is an assembler and virtual machine toolchain for the B33 8/16-bit computer.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a text `.asm` or binary `.b33` file and wait for it to halt
    Run {
        /// `.asm` or `.b33` file to run
        name: PathBuf,
        /// Per-instruction delay in milliseconds
        #[arg(short, long)]
        speed: Option<u64>,
    },
    /// Create a binary `.b33` file to run later or view compiled data
    Build {
        /// `.asm` file to assemble
        name: PathBuf,
        /// Destination to output the .b33 file
        dest: Option<PathBuf>,
        /// Base load address of the image
        #[arg(long, default_value_t = 0x1000)]
        origin: u16,
        /// Append a debug table of (address, source line) records
        #[arg(short, long)]
        debug_info: bool,
        /// Mark the image as wanting a second monitor
        #[arg(long)]
        dual_monitor: bool,
        /// Emit code bytes only, without the executable header
        #[arg(long)]
        raw: bool,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(b33::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run { name, speed } => run(&name, speed),
            Command::Build {
                name,
                dest,
                origin,
                debug_info,
                dual_monitor,
                raw,
            } => {
                file_message(Green, "Assembling", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                let output = if raw {
                    OutputKind::Raw
                } else {
                    OutputKind::Executable
                };
                let asm = assemble(
                    &src,
                    AsmOptions {
                        origin,
                        output,
                        debug_info,
                        dual_monitor,
                    },
                )?;

                let out_name =
                    dest.unwrap_or(name.with_extension("b33").file_name().unwrap().into());
                asm.program
                    .write_file(&out_name, asm.output)
                    .into_diagnostic()?;

                message(Green, "Finished", "emit binary");
                file_message(Green, "Saved", &out_name);
                Ok(())
            }
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                let asm = assemble(&src, AsmOptions::default())?;
                message(Green, "Success", "no errors found!");
                message(
                    Cyan,
                    "Labels",
                    &format!("{} resolved", asm.labels.len()),
                );
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, None)
    } else {
        println!("\n~ b33 v{VERSION} ~");
        println!("{SHORT_INFO}");
        std::process::exit(0);
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &PathBuf) {
    let right = format!("target {}", right.to_str().unwrap());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &PathBuf, speed: Option<u64>) -> Result<()> {
    let program = if let Some(ext) = name.extension() {
        match ext.to_str().unwrap() {
            "b33" | "bin" => {
                // Cheap magic gate before the full load path.
                if !Program::is_valid_file(name) {
                    bail!("File is not a B33 executable. Exiting...");
                }
                Program::read_file(name).into_diagnostic()?
            }
            "asm" => {
                file_message(MsgColor::Green, "Assembling", name);
                let src = fs::read_to_string(name).into_diagnostic()?;
                assemble(&src, AsmOptions::default())?.program
            }
            _ => {
                bail!("File has unknown extension. Exiting...")
            }
        }
    } else {
        bail!("File has no extension. Exiting...");
    };

    let mut machine = Machine::new();
    machine.load(&program).into_diagnostic()?;
    if let Some(ms) = speed {
        machine.set_speed(Duration::from_millis(ms));
    }

    message(MsgColor::Green, "Running", "loaded image");
    machine.start();
    machine.wait_finished().into_diagnostic()?;

    let regs = machine.registers();
    message(
        MsgColor::Cyan,
        "Registers",
        &format!(
            "A={:02X} B={:02X} X={:04X} Y={:04X} PC={:04X} CC={}",
            regs.a, regs.b, regs.x, regs.y, regs.pc, regs.cc
        ),
    );
    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

const SHORT_INFO: &str = r"
Welcome to b33, an all-in-one toolchain for working with B33 assembly code.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
