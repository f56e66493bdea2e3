//! Instruction Set Architecture (ISA) definitions.
//!
//! The instruction set is the cross product of a handful of operation families
//! with the value kinds they apply to, plus a few untyped instructions. Rather
//! than spelling every opcode out, [`Isa::new`] walks the families in declaration
//! order and hands out opcodes sequentially, so opcode `0` is `push_i8` and
//! `195` is `sig`. The resulting table is plain data shared by the assembler,
//! the disassembler and the VM.
//!
//! # Bytecode Format
//!
//! Instructions use variable-length encoding:
//! - Opcode: 1 byte
//! - Immediates: zero or more little-endian values whose widths are fixed by the
//!   opcode (see [`OpInfo::operands`])
//! - Jump targets: 8 bytes, absolute offset into the same buffer

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Largest number of immediates any instruction takes (`setl_T`).
pub const MAX_OPERANDS: usize = 2;

/// Value kinds understood by the stack, the locals and the assembler.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    F32,
    I64,
    U64,
    F64,
    I128,
    U128,
    F128,
}

impl Kind {
    /// Every kind, in opcode order.
    pub const ALL: [Kind; 14] = [
        Kind::I8,
        Kind::U8,
        Kind::Bool,
        Kind::I16,
        Kind::U16,
        Kind::I32,
        Kind::U32,
        Kind::F32,
        Kind::I64,
        Kind::U64,
        Kind::F64,
        Kind::I128,
        Kind::U128,
        Kind::F128,
    ];

    /// Kinds that support arithmetic and comparison.
    pub const NUMERIC: [Kind; 13] = [
        Kind::I8,
        Kind::U8,
        Kind::I16,
        Kind::U16,
        Kind::I32,
        Kind::U32,
        Kind::F32,
        Kind::I64,
        Kind::U64,
        Kind::F64,
        Kind::I128,
        Kind::U128,
        Kind::F128,
    ];

    /// Kinds that have an `abs_T` instruction.
    pub const SIGNED: [Kind; 8] = [
        Kind::I8,
        Kind::I16,
        Kind::I32,
        Kind::F32,
        Kind::I64,
        Kind::F64,
        Kind::I128,
        Kind::F128,
    ];

    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            Kind::I8 | Kind::U8 | Kind::Bool => 1,
            Kind::I16 | Kind::U16 => 2,
            Kind::I32 | Kind::U32 | Kind::F32 => 4,
            Kind::I64 | Kind::U64 | Kind::F64 => 8,
            Kind::I128 | Kind::U128 | Kind::F128 => 16,
        }
    }

    /// Suffix used in mnemonics (`push_<name>`).
    pub const fn name(self) -> &'static str {
        match self {
            Kind::I8 => "i8",
            Kind::U8 => "u8",
            Kind::Bool => "bool",
            Kind::I16 => "i16",
            Kind::U16 => "u16",
            Kind::I32 => "i32",
            Kind::U32 => "u32",
            Kind::F32 => "f32",
            Kind::I64 => "i64",
            Kind::U64 => "u64",
            Kind::F64 => "f64",
            Kind::I128 => "i128",
            Kind::U128 => "u128",
            Kind::F128 => "f128",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Kind::F32 | Kind::F64 | Kind::F128)
    }

    /// Looks a kind up by its mnemonic suffix.
    pub fn from_name(name: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch condition evaluated against the comparison register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Condition {
    /// `jz`: last compare was equal.
    Zero,
    /// `jnz`: last compare was not equal.
    NotZero,
    /// `jl`: last compare was less.
    Less,
    /// `jg`: last compare was greater.
    Greater,
    /// `jnl`: last compare was not less.
    NotLess,
    /// `jng`: last compare was not greater.
    NotGreater,
    /// `jmp`: unconditional.
    Always,
}

impl Condition {
    /// Returns true if a jump with this condition is taken for `cmp` (-1, 0 or 1).
    pub const fn holds(self, cmp: i8) -> bool {
        match self {
            Condition::Zero => cmp == 0,
            Condition::NotZero => cmp != 0,
            Condition::Less => cmp == -1,
            Condition::Greater => cmp == 1,
            Condition::NotLess => cmp != -1,
            Condition::NotGreater => cmp != 1,
            Condition::Always => true,
        }
    }
}

/// Byte count of a `dup`/`swap`/`pop` instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Width {
    /// Taken from the instruction's `u8` immediate (`dupg`, `swapg`, `popg`).
    Operand,
    /// Baked into the opcode (`dup4`, `pop8`, ...).
    Fixed(u8),
}

/// What an opcode does, independent of its encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Push(Kind),
    PopLocal(Kind),
    PushLocal(Kind),
    SetLocal(Kind),
    Add(Kind),
    Sub(Kind),
    Mul(Kind),
    Div(Kind),
    Rem(Kind),
    Abs(Kind),
    Dec(Kind),
    Inc(Kind),
    Dup(Width),
    Swap(Width),
    Pop(Width),
    Cmp(Kind),
    Jump(Condition),
    Ret,
    Dbg,
    Sig,
}

/// Descriptor for a single opcode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpInfo {
    pub opcode: u8,
    pub mnemonic: String,
    pub operation: Operation,
    /// Immediate kinds in encoding order.
    pub operands: Vec<Kind>,
    /// Total width of the immediates.
    pub immediate_len: usize,
}

/// Immediates decoded from the bytes following an opcode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Operands {
    values: [Value; MAX_OPERANDS],
    len: usize,
}

impl Operands {
    pub fn as_slice(&self) -> &[Value] {
        &self.values[..self.len]
    }

    /// Returns the `i`th immediate, or [`Value::None`] past the end.
    pub fn get(&self, i: usize) -> Value {
        self.as_slice().get(i).copied().unwrap_or(Value::None)
    }
}

impl OpInfo {
    /// Decodes the immediates that follow this opcode.
    ///
    /// `at` is the offset of the first immediate byte. Fails with
    /// [`VMError::UnexpectedEndOfBytecode`] if the buffer ends early.
    pub fn decode(&self, bytecode: &[u8], at: usize) -> Result<Operands, VMError> {
        let mut operands = Operands {
            values: [Value::None; MAX_OPERANDS],
            len: self.operands.len(),
        };
        let mut cursor = at;
        for (slot, kind) in operands.values.iter_mut().zip(&self.operands) {
            let end = cursor + kind.size();
            let bytes = bytecode
                .get(cursor..end)
                .ok_or(VMError::UnexpectedEndOfBytecode {
                    ip: cursor,
                    requested: kind.size(),
                    available: bytecode.len().saturating_sub(cursor),
                })?;
            *slot = Value::from_le_bytes(*kind, bytes);
            cursor = end;
        }
        Ok(operands)
    }
}

/// The opcode table.
#[derive(Debug)]
pub struct Isa {
    ops: Vec<OpInfo>,
    by_mnemonic: HashMap<String, u8>,
}

impl Default for Isa {
    fn default() -> Self {
        Self::new()
    }
}

impl Isa {
    /// Builds the table.
    pub fn new() -> Self {
        let mut isa = Isa {
            ops: Vec::with_capacity(196),
            by_mnemonic: HashMap::with_capacity(196),
        };

        isa.typed("push", &Kind::ALL, Operation::Push, |k| vec![k]);
        isa.typed("popl", &Kind::ALL, Operation::PopLocal, |_| vec![Kind::U8]);
        isa.typed("pushl", &Kind::ALL, Operation::PushLocal, |_| vec![Kind::U8]);
        isa.typed("setl", &Kind::ALL, Operation::SetLocal, |k| vec![Kind::U8, k]);
        isa.typed("add", &Kind::NUMERIC, Operation::Add, |_| vec![]);
        isa.typed("sub", &Kind::NUMERIC, Operation::Sub, |_| vec![]);
        isa.typed("mul", &Kind::NUMERIC, Operation::Mul, |_| vec![]);
        isa.typed("div", &Kind::NUMERIC, Operation::Div, |_| vec![]);
        isa.typed("rem", &Kind::NUMERIC, Operation::Rem, |_| vec![]);
        isa.typed("abs", &Kind::SIGNED, Operation::Abs, |_| vec![]);
        isa.typed("dec", &Kind::NUMERIC, Operation::Dec, |_| vec![]);
        isa.typed("inc", &Kind::NUMERIC, Operation::Inc, |_| vec![]);
        isa.sized("dup", Operation::Dup);
        isa.sized("swap", Operation::Swap);
        isa.sized("pop", Operation::Pop);
        isa.typed("cmp", &Kind::NUMERIC, Operation::Cmp, |_| vec![]);

        for (mnemonic, condition) in [
            ("jz", Condition::Zero),
            ("jnz", Condition::NotZero),
            ("jl", Condition::Less),
            ("jg", Condition::Greater),
            ("jnl", Condition::NotLess),
            ("jng", Condition::NotGreater),
            ("jmp", Condition::Always),
        ] {
            isa.push(mnemonic.to_string(), Operation::Jump(condition), vec![Kind::U64]);
        }
        isa.push("ret".to_string(), Operation::Ret, vec![]);
        isa.push("dbg".to_string(), Operation::Dbg, vec![Kind::I8]);
        isa.push("sig".to_string(), Operation::Sig, vec![Kind::I8]);

        isa
    }

    /// Process-wide table, built on first use.
    pub fn shared() -> &'static Isa {
        static SHARED: OnceLock<Isa> = OnceLock::new();
        SHARED.get_or_init(Isa::new)
    }

    fn typed(
        &mut self,
        family: &str,
        kinds: &[Kind],
        operation: fn(Kind) -> Operation,
        operands: fn(Kind) -> Vec<Kind>,
    ) {
        for &kind in kinds {
            self.push(format!("{family}_{kind}"), operation(kind), operands(kind));
        }
    }

    fn sized(&mut self, family: &str, operation: fn(Width) -> Operation) {
        self.push(format!("{family}g"), operation(Width::Operand), vec![Kind::U8]);
        for bytes in [1u8, 2, 4, 8, 16] {
            self.push(format!("{family}{bytes}"), operation(Width::Fixed(bytes)), vec![]);
        }
    }

    fn push(&mut self, mnemonic: String, operation: Operation, operands: Vec<Kind>) {
        let opcode = self.ops.len() as u8;
        let immediate_len = operands.iter().map(|k| k.size()).sum();
        self.by_mnemonic.insert(mnemonic.clone(), opcode);
        self.ops.push(OpInfo {
            opcode,
            mnemonic,
            operation,
            operands,
            immediate_len,
        });
    }

    /// Returns the descriptor for `opcode`, if assigned.
    pub fn get(&self, opcode: u8) -> Option<&OpInfo> {
        self.ops.get(opcode as usize)
    }

    /// Returns the descriptor for an exact mnemonic.
    pub fn lookup(&self, mnemonic: &str) -> Option<&OpInfo> {
        self.by_mnemonic
            .get(mnemonic)
            .and_then(|&opcode| self.get(opcode))
    }

    /// Returns the opcode for an exact mnemonic.
    pub fn opcode(&self, mnemonic: &str) -> Option<u8> {
        self.by_mnemonic.get(mnemonic).copied()
    }

    /// Number of assigned opcodes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates descriptors in opcode order.
    pub fn iter(&self) -> impl Iterator<Item = &OpInfo> {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_ranges_follow_family_order() {
        let isa = Isa::new();
        assert_eq!(isa.len(), 196);

        let expected = [
            ("push_i8", 0),
            ("push_f128", 13),
            ("popl_i8", 14),
            ("pushl_i8", 28),
            ("setl_i8", 42),
            ("setl_f128", 55),
            ("add_i8", 56),
            ("add_f128", 68),
            ("sub_i8", 69),
            ("mul_i8", 82),
            ("div_i8", 95),
            ("rem_i8", 108),
            ("abs_i8", 121),
            ("abs_f128", 128),
            ("dec_i8", 129),
            ("inc_i8", 142),
            ("dupg", 155),
            ("dup1", 156),
            ("dup16", 160),
            ("swapg", 161),
            ("swap16", 166),
            ("popg", 167),
            ("pop1", 168),
            ("pop16", 172),
            ("cmp_i8", 173),
            ("cmp_f128", 185),
            ("jz", 186),
            ("jmp", 192),
            ("ret", 193),
            ("dbg", 194),
            ("sig", 195),
        ];
        for (mnemonic, opcode) in expected {
            assert_eq!(isa.opcode(mnemonic), Some(opcode), "{mnemonic}");
        }
    }

    #[test]
    fn bool_has_no_arithmetic() {
        let isa = Isa::new();
        assert!(isa.lookup("push_bool").is_some());
        assert!(isa.lookup("setl_bool").is_some());
        for family in ["add", "sub", "mul", "div", "rem", "abs", "dec", "inc", "cmp"] {
            assert!(isa.lookup(&format!("{family}_bool")).is_none(), "{family}_bool");
        }
        assert!(isa.lookup("abs_u8").is_none());
    }

    #[test]
    fn operand_signatures() {
        let isa = Isa::new();
        let setl = isa.lookup("setl_i16").unwrap();
        assert_eq!(setl.operands, vec![Kind::U8, Kind::I16]);
        assert_eq!(setl.immediate_len, 3);
        assert_eq!(setl.operation, Operation::SetLocal(Kind::I16));

        let jnl = isa.lookup("jnl").unwrap();
        assert_eq!(jnl.operands, vec![Kind::U64]);
        assert_eq!(jnl.operation, Operation::Jump(Condition::NotLess));

        assert_eq!(isa.lookup("dup8").unwrap().operation, Operation::Dup(Width::Fixed(8)));
        assert_eq!(isa.lookup("popg").unwrap().operands, vec![Kind::U8]);
        assert!(isa.lookup("add_u32").unwrap().operands.is_empty());
        assert_eq!(isa.lookup("sig").unwrap().operands, vec![Kind::I8]);
    }

    #[test]
    fn lookup_is_exact() {
        let isa = Isa::new();
        assert!(isa.lookup("PUSH_U8").is_none());
        assert!(isa.lookup("push_u8 ").is_none());
        assert!(isa.get(196).is_none());
        assert!(isa.get(0xFF).is_none());
    }

    #[test]
    fn every_opcode_points_back_at_itself() {
        let isa = Isa::shared();
        for (i, info) in isa.iter().enumerate() {
            assert_eq!(info.opcode as usize, i);
            assert_eq!(isa.opcode(&info.mnemonic), Some(info.opcode));
        }
    }

    #[test]
    fn conditions() {
        assert!(Condition::Zero.holds(0));
        assert!(!Condition::Zero.holds(1));
        assert!(Condition::NotZero.holds(-1));
        assert!(Condition::Less.holds(-1));
        assert!(Condition::Greater.holds(1));
        assert!(Condition::NotLess.holds(0));
        assert!(!Condition::NotLess.holds(-1));
        assert!(Condition::NotGreater.holds(-1));
        assert!(!Condition::NotGreater.holds(1));
        assert!(Condition::Always.holds(0));
    }

    #[test]
    fn decode_reads_little_endian_immediates() {
        let isa = Isa::new();
        let setl = isa.lookup("setl_u16").unwrap();
        let operands = setl.decode(&[0x00, 0x07, 0x34, 0x12], 1).unwrap();
        assert_eq!(operands.as_slice(), &[Value::U8(7), Value::U16(0x1234)]);

        let err = setl.decode(&[0x00, 0x07, 0x34], 1).unwrap_err();
        assert!(matches!(
            err,
            VMError::UnexpectedEndOfBytecode {
                ip: 2,
                requested: 2,
                available: 1
            }
        ));
    }
}
