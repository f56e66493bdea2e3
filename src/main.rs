//! Pushle program runner.
//!
//! Runs a compiled `.bin` file, or assembles and runs a `.asm` file, then prints
//! the value left on top of the stack.
//!
//! # Usage
//! ```text
//! pushle <program> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program`: Bytecode file, or assembly source if it ends in `.asm`
//!
//! # Options
//! - `--top <kind>`: Kind to read the result as (defaults to `u64`)
//! - `--stack-size <bytes>`: Operand stack capacity (defaults to 1 MiB)
//! - `--max-steps <n>`: Abort after `n` instructions
//! - `--disasm`: Print a listing instead of running
//! - `-v, --verbose`: Log every instruction and print an execution profile

use pushle::utils::log::{self, Level};
use pushle::virtual_machine::assembler::assemble_file;
use pushle::virtual_machine::disassembler::{disassemble, render_listing};
use pushle::virtual_machine::isa::{Isa, Kind};
use pushle::virtual_machine::vm::budget::ExecProfile;
use pushle::virtual_machine::vm::{DEFAULT_STACK_SIZE, Fault, VM, VmConfig};
use pushle::{error, info, warn};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    if let Err(e) = log::init_from_env() {
        error!("{e}");
        process::exit(1);
    }

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let program_path = &args[1];
    let mut config = VmConfig::default();
    let mut top_kind = Kind::U64;
    let mut listing = false;
    let mut verbose = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--stack-size" | "--max-steps" | "--top") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                let value = &args[i];
                match k {
                    "--stack-size" => {
                        config.stack_size = parse_size(parse_number(k, value)).unwrap_or_else(|| {
                            error!("Invalid value for {k}: '{value}' does not fit in memory");
                            process::exit(1);
                        })
                    }
                    "--max-steps" => config.max_steps = Some(parse_number(k, value)),
                    _ => {
                        top_kind = Kind::from_name(value).unwrap_or_else(|| {
                            error!("Unknown kind '{value}' for {k}");
                            process::exit(1);
                        })
                    }
                }
                i += 1;
            }
            "--disasm" => {
                listing = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                verbose = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if verbose {
        log::set_max_level(Level::Debug);
    }

    let path = Path::new(program_path);
    if !path.exists() {
        error!("Program file does not exist: {}", program_path);
        process::exit(1);
    }

    let bytecode = if path.extension().is_some_and(|ext| ext == "asm") {
        assemble_file(path).unwrap_or_else(|e| {
            error!("Assembly failed: {e}");
            process::exit(1);
        })
    } else {
        fs::read(path).unwrap_or_else(|e| {
            error!("Failed to read {}: {e}", program_path);
            process::exit(1);
        })
    };

    if listing {
        match disassemble(Isa::shared(), &bytecode) {
            Ok(instrs) => print!("{}", render_listing(&instrs)),
            Err(e) => {
                error!("Disassembly failed: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let mut vm = VM::new(config);
    if let Err(e) = vm.run(&bytecode) {
        error!("Execution failed after {} step(s): {e}", vm.steps());
        process::exit(1);
    }

    if let Some(Fault::DivisionByZero { offset }) = vm.fault() {
        warn!("Division by zero at offset {offset}");
    }
    if let Some(code) = vm.signal() {
        info!("Halted by sig {code}");
    }

    match vm.top_value(top_kind) {
        Ok(value) => println!("Result as {top_kind}: {value}"),
        Err(_) => warn!(
            "Stack holds {} byte(s), not enough for a {top_kind} result",
            vm.stack_depth()
        ),
    }

    if verbose {
        print_profile(vm.profile());
    }
}

fn parse_number(flag: &str, value: &str) -> u64 {
    value.parse::<u64>().unwrap_or_else(|_| {
        error!("Invalid value for {flag}: '{value}' is not a valid number");
        process::exit(1);
    })
}

/// Narrows a byte count to `usize`, failing where the target's address space is smaller.
fn parse_size(bytes: u64) -> Option<usize> {
    usize::try_from(bytes).ok()
}

fn print_profile(profile: &ExecProfile) {
    let total_u = profile.total();
    let total = total_u as f64;

    let cat_w = 2 + profile
        .iter()
        .map(|(c, _)| c.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("total".chars().count());

    let amt_w = profile
        .iter()
        .map(|(_, a)| format_with_commas(a).chars().count())
        .max()
        .unwrap_or(0)
        .max(format_with_commas(total_u).chars().count());

    let dash_w = cat_w + 1 + amt_w + 2 + "( 100.0%)".len();

    println!("Execution Profile:");
    println!("{}", "-".repeat(dash_w));

    for (category, amount) in profile.iter() {
        if amount == 0 {
            continue;
        }

        let percent = if total > 0.0 {
            (amount as f64 / total) * 100.0
        } else {
            0.0
        };

        println!(
            "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
            category.as_str(),
            format_with_commas(amount),
            percent,
        );
    }

    println!("{}", "-".repeat(dash_w));
    println!(
        "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
        "total",
        format_with_commas(total_u),
        100.0,
    );
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

const USAGE: &str = "\
Pushle Runner

USAGE:
    {program} <program> [OPTIONS]

ARGS:
    <program>    Bytecode file, or assembly source ending in .asm

OPTIONS:
    --top <kind>            Kind to read the result as (defaults to u64)
    --stack-size <bytes>    Operand stack capacity (defaults to {stack})
    --max-steps <n>         Abort after n instructions
    --disasm                Print a listing instead of running
    -v, --verbose           Log every instruction and print an execution profile
    -h, --help              Print this help message

ENVIRONMENT:
    PUSHLE_LOG              Log level: debug, info, warn or error

EXAMPLES:
    # Assemble and run, reading the result as u8
    {program} fib.asm --top u8

    # Run compiled bytecode with an instruction budget
    {program} fib.bin --max-steps 10000
";

fn print_usage(program: &str) {
    info!(
        "{}",
        USAGE
            .replace("{program}", program)
            .replace("{stack}", &DEFAULT_STACK_SIZE.to_string())
    );
}
