//! Bytecode to assembly source.
//!
//! Decodes a buffer with the same table the VM uses and renders it back into
//! assembler syntax. Jump targets come out as plain numbers, so the rendered text
//! re-assembles to the same bytes whenever every immediate is non-negative.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Isa, OpInfo};
use crate::virtual_machine::vm::value::Value;
use std::fmt;

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr<'isa> {
    /// Offset of the opcode byte.
    pub offset: usize,
    pub info: &'isa OpInfo,
    pub operands: Vec<Value>,
}

impl Instr<'_> {
    pub fn opcode(&self) -> u8 {
        self.info.opcode
    }

    pub fn mnemonic(&self) -> &str {
        &self.info.mnemonic
    }

    /// Encoded size, opcode included.
    pub fn size(&self) -> usize {
        1 + self.info.immediate_len
    }
}

/// Formats as assembler source: `mnemonic op1 op2`.
impl fmt::Display for Instr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Decodes every instruction in `bytecode`.
///
/// Fails on an unassigned opcode or on immediates cut off by the end of the buffer.
pub fn disassemble<'isa>(isa: &'isa Isa, bytecode: &[u8]) -> Result<Vec<Instr<'isa>>, VMError> {
    let mut instrs = Vec::new();
    let mut ip = 0;
    while ip < bytecode.len() {
        let opcode = bytecode[ip];
        let info = isa
            .get(opcode)
            .ok_or(VMError::InvalidInstruction { opcode, offset: ip })?;
        let operands = info.decode(bytecode, ip + 1)?;
        instrs.push(Instr {
            offset: ip,
            info,
            operands: operands.as_slice().to_vec(),
        });
        ip += 1 + info.immediate_len;
    }
    Ok(instrs)
}

/// Renders instructions one per line, ready to feed back to the assembler.
pub fn render(instrs: &[Instr]) -> String {
    let mut out = String::new();
    for instr in instrs {
        out.push_str(&instr.to_string());
        out.push('\n');
    }
    out
}

/// Renders instructions with their offsets as trailing comments.
pub fn render_listing(instrs: &[Instr]) -> String {
    let width = instrs
        .iter()
        .map(|instr| instr.to_string().len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for instr in instrs {
        out.push_str(&format!(
            "{:<width$}  // {:#06x}\n",
            instr.to_string(),
            instr.offset
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::assembler::Assembler;

    #[test]
    fn round_trip_is_byte_identical() {
        let isa = Isa::new();
        let assembler = Assembler::new(&isa);
        let source = "\
push_u8 7
setl_i16 2 300
pushl_i16 2
push_f64 2.5
push_f32 0.125
push_f128 3.75
push_u128 340282366920938463463374607431768211455
push_bool 1
dupg 3
swap4
popg 2
add_u64
cmp_i32
jnl 0
dbg 5
ret
sig 1
";
        let bytecode = assembler.assemble(source).unwrap();
        let instrs = disassemble(&isa, &bytecode).unwrap();
        assert_eq!(render(&instrs), source);
        assert_eq!(assembler.assemble(&render(&instrs)).unwrap(), bytecode);
    }

    #[test]
    fn labels_come_back_as_addresses() {
        let isa = Isa::new();
        let bytecode = Assembler::new(&isa)
            .assemble("@top\npush_u8 1\njmp @top")
            .unwrap();
        let instrs = disassemble(&isa, &bytecode).unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[1].offset, 2);
        assert_eq!(instrs[1].to_string(), "jmp 0");
        assert_eq!(instrs[1].size(), 9);
    }

    #[test]
    fn unknown_opcode_is_reported_with_offset() {
        let isa = Isa::new();
        let err = disassemble(&isa, &[isa.opcode("pop1").unwrap(), 0xF0]).unwrap_err();
        assert!(matches!(
            err,
            VMError::InvalidInstruction {
                opcode: 0xF0,
                offset: 1
            }
        ));
    }

    #[test]
    fn truncated_immediate_is_reported() {
        let isa = Isa::new();
        let err = disassemble(&isa, &[isa.opcode("push_u32").unwrap(), 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            VMError::UnexpectedEndOfBytecode {
                ip: 1,
                requested: 4,
                available: 2
            }
        ));
    }

    #[test]
    fn listing_adds_offsets() {
        let isa = Isa::new();
        let bytecode = [isa.opcode("push_u8").unwrap(), 9, isa.opcode("pop1").unwrap()];
        let instrs = disassemble(&isa, &bytecode).unwrap();
        assert_eq!(render_listing(&instrs), "push_u8 9  // 0x0000\npop1       // 0x0002\n");
    }
}
