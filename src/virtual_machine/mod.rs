//! Stack-based bytecode virtual machine for small numeric programs.
//!
//! Source text is assembled into a flat, header-less byte buffer which the VM
//! then executes from offset 0.
//!
//! # Architecture
//!
//! - **Operand stack**: untyped bytes with a fixed capacity; instructions pick the width
//! - **Locals**: 255 tagged [`vm::value::Value`] slots shared by the whole program
//! - **Comparison register**: -1/0/1 from the last `cmp_T`, read by the conditional jumps
//! - **Fault latch**: records division by zero without stopping the run
//! - **Instruction format**: one opcode byte followed by fixed-width little-endian immediates
//!
//! # Modules
//!
//! - [`isa`]: Value kinds, operations and the opcode table
//! - [`tokenizer`]: Line tokenizer for assembly source
//! - [`assembler`]: Two-pass assembly with label backpatching and diagnostics
//! - [`disassembler`]: Bytecode back to assembly source
//! - [`errors`]: Assembly and execution error types
//! - [`vm`]: The interpreter, its memory model and typed arithmetic

pub mod assembler;
pub mod disassembler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod tokenizer;
pub mod vm;
