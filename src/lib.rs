//! Pushle: a small stack-based bytecode language.
//!
//! Provides an assembler, a disassembler and a virtual machine for size-typed
//! numeric programs.

pub mod utils;
pub mod virtual_machine;
