//! Assembly to bytecode compiler CLI.
//!
//! Reads assembly source files and compiles them to flat bytecode.
//!
//! # Usage
//! ```text
//! assembler <input.asm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.asm`: Assembly source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.bin`)
//! - `-d, --disasm`: Print a listing of the compiled bytecode
//!
//! # Examples
//! ```text
//! assembler fib.asm
//! assembler fib.asm -o out/fib.bin
//! assembler fib.asm -d
//! ```

use pushle::utils::log;
use pushle::virtual_machine::assembler::assemble_file;
use pushle::virtual_machine::disassembler::{disassemble, render_listing};
use pushle::virtual_machine::isa::Isa;
use pushle::{error, info};
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

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut listing = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--disasm" | "-d" => {
                listing = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(input_path).exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(input_path);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{}.bin", stem))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let bytecode = match assemble_file(input_path) {
        Ok(b) => b,
        Err(e) => {
            error!("Assembly failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = fs::write(&output_path, &bytecode) {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Compiled {} -> {} ({} bytes)",
        input_path,
        output_path,
        bytecode.len()
    );

    if listing {
        match disassemble(Isa::shared(), &bytecode) {
            Ok(instrs) => print!("{}", render_listing(&instrs)),
            Err(e) => {
                error!("Disassembly failed: {e}");
                process::exit(1);
            }
        }
    }
}

const USAGE: &str = "\
Pushle Assembler

USAGE:
    {program} <input.asm> [OPTIONS]

ARGS:
    <input.asm>    Assembly source file to compile

OPTIONS:
    -o, --output <file>     Output file path (defaults to <input>.bin)
    -d, --disasm            Print a listing of the compiled bytecode
    -h, --help              Print this help message

ENVIRONMENT:
    PUSHLE_LOG              Log level: debug, info, warn or error

EXAMPLES:
    # Compile to default output name
    {program} fib.asm

    # Compile with explicit output
    {program} fib.asm -o out/fib.bin

    # Compile and show what was emitted
    {program} fib.asm -d
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
