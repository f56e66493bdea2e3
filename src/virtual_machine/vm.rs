//! Core virtual machine implementation.
//!
//! The VM executes bytecode on an untyped byte stack plus a bank of 255 tagged
//! locals. Binary arithmetic reads both operands in place and overwrites only the
//! top one, leaving the deeper operand behind for an explicit `pop` to discard.
//! Integer arithmetic uses wrapping semantics to prevent overflow panics.

pub mod budget;
pub mod extended;
pub mod numeric;
mod scope;
pub mod sink;
mod stack;
pub mod value;

#[cfg(test)]
mod tests;

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Isa, Kind, OpInfo, Operands, Operation, Width};
use crate::{debug, warn};
use budget::{ExecProfile, StepBudget};
use extended::F128;
use numeric::{Numeric, Signed, StackValue};
use scope::Scope;
use sink::{DebugSink, Event, LogSink, Snapshot};
use stack::Stack;
use value::Value;

pub use scope::LOCALS;

/// Default operand stack capacity (1 MiB).
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Runtime knobs for a [`VM`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmConfig {
    /// Operand stack capacity in bytes.
    pub stack_size: usize,
    /// Instruction budget per run; `None` runs until the program ends.
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_steps: None,
        }
    }
}

/// Soft error recorded in the fault latch instead of aborting the run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    /// `div_T` or `rem_T` with a zero divisor at `offset`. The stack was left untouched.
    DivisionByZero { offset: usize },
}

#[derive(Clone, Copy, Debug)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy, Debug)]
enum UnaryOp {
    Dec,
    Inc,
}

/// Binds `$t` to the Rust type of a numeric [`Kind`] and evaluates `$body`.
/// `bool` evaluates `$fallback`.
macro_rules! with_numeric {
    ($kind:expr, $t:ident => $body:expr, bool => $fallback:expr) => {
        match $kind {
            Kind::I8 => { type $t = i8; $body }
            Kind::U8 => { type $t = u8; $body }
            Kind::I16 => { type $t = i16; $body }
            Kind::U16 => { type $t = u16; $body }
            Kind::I32 => { type $t = i32; $body }
            Kind::U32 => { type $t = u32; $body }
            Kind::F32 => { type $t = f32; $body }
            Kind::I64 => { type $t = i64; $body }
            Kind::U64 => { type $t = u64; $body }
            Kind::F64 => { type $t = f64; $body }
            Kind::I128 => { type $t = i128; $body }
            Kind::U128 => { type $t = u128; $body }
            Kind::F128 => { type $t = F128; $body }
            Kind::Bool => $fallback,
        }
    };
}

/// Same as `with_numeric!` for the kinds with an `abs_T` instruction.
macro_rules! with_signed {
    ($kind:expr, $t:ident => $body:expr, _ => $fallback:expr) => {
        match $kind {
            Kind::I8 => { type $t = i8; $body }
            Kind::I16 => { type $t = i16; $body }
            Kind::I32 => { type $t = i32; $body }
            Kind::F32 => { type $t = f32; $body }
            Kind::I64 => { type $t = i64; $body }
            Kind::F64 => { type $t = f64; $body }
            Kind::I128 => { type $t = i128; $body }
            Kind::F128 => { type $t = F128; $body }
            _ => $fallback,
        }
    };
}

/// Bytecode virtual machine.
///
/// Executes compiled bytecode sequentially, reading instructions from the
/// instruction pointer until it reaches or passes the end of the buffer.
/// State survives a run so the embedder can inspect it; the next run resets it.
pub struct VM<'isa> {
    isa: &'isa Isa,
    /// Operand stack.
    stack: Stack,
    /// Local variable bank.
    scope: Scope,
    /// Instruction pointer (current position in bytecode).
    ip: usize,
    /// Result of the last `cmp_T`: -1, 0 or 1.
    cmp: i8,
    /// Last division outcome.
    fault: Option<Fault>,
    /// Code passed to `sig`, if the program halted through it.
    signal: Option<i8>,
    budget: StepBudget,
    profile: ExecProfile,
}

impl VM<'static> {
    /// Creates a VM over the process-wide instruction table.
    pub fn new(config: VmConfig) -> Self {
        VM::with_isa(Isa::shared(), config)
    }
}

impl Default for VM<'static> {
    fn default() -> Self {
        VM::new(VmConfig::default())
    }
}

impl<'isa> VM<'isa> {
    /// Creates a VM that decodes opcodes through `isa`.
    pub fn with_isa(isa: &'isa Isa, config: VmConfig) -> Self {
        Self {
            isa,
            stack: Stack::new(config.stack_size),
            scope: Scope::new(),
            ip: 0,
            cmp: 0,
            fault: None,
            signal: None,
            budget: StepBudget::new(config.max_steps),
            profile: ExecProfile::new(),
        }
    }

    /// Executes `program` from offset 0, logging `dbg`/`sig`/`ret` snapshots.
    pub fn run(&mut self, program: &[u8]) -> Result<(), VMError> {
        self.run_with(program, &mut LogSink)
    }

    /// Executes `program` from offset 0, handing snapshots to `sink`.
    ///
    /// Resets the stack, locals, comparison register, fault latch and step
    /// count first. Returns once the instruction pointer reaches the end of the
    /// program, or with the first fatal error.
    pub fn run_with<D: DebugSink>(&mut self, program: &[u8], sink: &mut D) -> Result<(), VMError> {
        self.reset();
        while self.ip < program.len() {
            self.budget.charge()?;
            let opcode_offset = self.ip;
            let opcode = program[opcode_offset];
            self.ip += 1;
            let isa = self.isa;
            let info = isa.get(opcode).ok_or(VMError::InvalidInstruction {
                opcode,
                offset: opcode_offset,
            })?;
            let operands = self.read_operands(info, program)?;
            debug!(
                "{opcode_offset:#06x}: {}{}",
                info.mnemonic,
                operands
                    .as_slice()
                    .iter()
                    .map(|v| format!(" {v}"))
                    .collect::<String>()
            );
            self.profile.record(info.operation);
            self.exec(info, &operands, opcode_offset, program.len(), sink)?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.scope.clear();
        self.ip = 0;
        self.cmp = 0;
        self.fault = None;
        self.signal = None;
        self.budget.reset();
        self.profile = ExecProfile::new();
    }

    /// Decodes the immediates of `info` at the current IP.
    ///
    /// Advances the instruction pointer past them.
    fn read_operands(&mut self, info: &OpInfo, program: &[u8]) -> Result<Operands, VMError> {
        let operands = info.decode(program, self.ip)?;
        self.ip += info.immediate_len;
        Ok(operands)
    }

    /// Executes a single decoded instruction.
    fn exec<D: DebugSink>(
        &mut self,
        info: &OpInfo,
        operands: &Operands,
        offset: usize,
        end: usize,
        sink: &mut D,
    ) -> Result<(), VMError> {
        let not_numeric = || VMError::InvalidInstruction {
            opcode: info.opcode,
            offset,
        };
        match info.operation {
            // Stack and locals
            Operation::Push(_) => {
                let (bytes, len) = operands.get(0).encode();
                self.stack.push(&bytes[..len])
            }
            Operation::PopLocal(kind) => self.op_popl(kind, index(operands)),
            Operation::PushLocal(kind) => self.op_pushl(kind, index(operands)),
            Operation::SetLocal(_) => self.scope.set(index(operands), operands.get(1)),
            Operation::Dup(width) => self.stack.dup(byte_count(width, operands)),
            Operation::Swap(width) => self.stack.swap(byte_count(width, operands)),
            Operation::Pop(width) => self.stack.pop(byte_count(width, operands)).map(|_| ()),
            // Arithmetic
            Operation::Add(kind) => self.binary(kind, BinaryOp::Add, offset, not_numeric),
            Operation::Sub(kind) => self.binary(kind, BinaryOp::Sub, offset, not_numeric),
            Operation::Mul(kind) => self.binary(kind, BinaryOp::Mul, offset, not_numeric),
            Operation::Div(kind) => self.binary(kind, BinaryOp::Div, offset, not_numeric),
            Operation::Rem(kind) => self.binary(kind, BinaryOp::Rem, offset, not_numeric),
            Operation::Abs(kind) => {
                with_signed!(kind, T => self.op_abs::<T>(), _ => Err(not_numeric()))
            }
            Operation::Dec(kind) => self.unary(kind, UnaryOp::Dec, not_numeric),
            Operation::Inc(kind) => self.unary(kind, UnaryOp::Inc, not_numeric),
            // Control flow
            Operation::Cmp(kind) => {
                with_numeric!(kind, T => self.op_cmp::<T>(), bool => Err(not_numeric()))
            }
            Operation::Jump(condition) => {
                let target = operands.get(0).as_u64().unwrap_or_default();
                if condition.holds(self.cmp) {
                    self.ip = usize::try_from(target)
                        .map_err(|_| VMError::InvalidJumpTarget { target })?;
                }
                Ok(())
            }
            Operation::Ret => {
                warn!("ret at offset {offset} is not implemented; dumping state");
                sink.snapshot(Event::Return, self.capture(0, offset));
                Ok(())
            }
            Operation::Dbg => {
                sink.snapshot(Event::Debug, self.capture(code(operands), offset));
                Ok(())
            }
            Operation::Sig => {
                let code = code(operands);
                sink.snapshot(Event::Signal, self.capture(code, offset));
                self.signal = Some(code);
                self.ip = end;
                Ok(())
            }
        }
    }

    fn binary(
        &mut self,
        kind: Kind,
        op: BinaryOp,
        offset: usize,
        not_numeric: impl FnOnce() -> VMError,
    ) -> Result<(), VMError> {
        with_numeric!(kind, T => self.op_binary::<T>(op, offset), bool => Err(not_numeric()))
    }

    fn unary(
        &mut self,
        kind: Kind,
        op: UnaryOp,
        not_numeric: impl FnOnce() -> VMError,
    ) -> Result<(), VMError> {
        with_numeric!(kind, T => self.op_unary::<T>(op), bool => Err(not_numeric()))
    }

    fn op_popl(&mut self, kind: Kind, idx: u8) -> Result<(), VMError> {
        let value = Value::from_le_bytes(kind, self.stack.pop(kind.size())?);
        self.scope.set(idx, value)
    }

    fn op_pushl(&mut self, kind: Kind, idx: u8) -> Result<(), VMError> {
        let (bytes, len) = self.scope.get_typed(idx, kind)?.encode();
        self.stack.push(&bytes[..len])
    }

    /// `a op b` with `a` one slot below the top and `b` on top; the result replaces `b`.
    fn op_binary<T: Numeric>(&mut self, op: BinaryOp, offset: usize) -> Result<(), VMError> {
        let a: T = self.stack.read(2 * T::SIZE)?;
        let b: T = self.stack.read(T::SIZE)?;
        let result = match op {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div | BinaryOp::Rem => {
                if b.is_zero() {
                    self.fault = Some(Fault::DivisionByZero { offset });
                    return Ok(());
                }
                self.fault = None;
                if matches!(op, BinaryOp::Div) {
                    a.div(b)
                } else {
                    a.rem(b)
                }
            }
        };
        self.stack.write(T::SIZE, result)
    }

    /// Updates the top value in place.
    fn op_unary<T: Numeric>(&mut self, op: UnaryOp) -> Result<(), VMError> {
        let v: T = self.stack.read(T::SIZE)?;
        let result = match op {
            UnaryOp::Dec => v.dec(),
            UnaryOp::Inc => v.inc(),
        };
        self.stack.write(T::SIZE, result)
    }

    fn op_abs<T: Signed>(&mut self) -> Result<(), VMError> {
        let v: T = self.stack.read(T::SIZE)?;
        self.stack.write(T::SIZE, v.abs())
    }

    fn op_cmp<T: Numeric>(&mut self) -> Result<(), VMError> {
        let a: T = self.stack.read(2 * T::SIZE)?;
        let b: T = self.stack.read(T::SIZE)?;
        self.cmp = if a == b {
            0
        } else if a < b {
            -1
        } else {
            1
        };
        Ok(())
    }

    fn capture(&self, code: i8, offset: usize) -> Snapshot {
        Snapshot {
            code,
            offset,
            stack: self.stack.as_slice().to_vec(),
            locals: self.scope.dense().to_vec(),
        }
    }

    // =========================
    // Inspection
    // =========================

    /// Reads the value on top of the stack as `T`.
    pub fn top<T: StackValue>(&self) -> Result<T, VMError> {
        self.stack.read(T::SIZE)
    }

    pub fn get_i8(&self) -> Result<i8, VMError> {
        self.top()
    }

    pub fn get_u8(&self) -> Result<u8, VMError> {
        self.top()
    }

    pub fn get_bool(&self) -> Result<bool, VMError> {
        self.top()
    }

    pub fn get_i16(&self) -> Result<i16, VMError> {
        self.top()
    }

    pub fn get_u16(&self) -> Result<u16, VMError> {
        self.top()
    }

    pub fn get_i32(&self) -> Result<i32, VMError> {
        self.top()
    }

    pub fn get_u32(&self) -> Result<u32, VMError> {
        self.top()
    }

    pub fn get_f32(&self) -> Result<f32, VMError> {
        self.top()
    }

    pub fn get_i64(&self) -> Result<i64, VMError> {
        self.top()
    }

    pub fn get_u64(&self) -> Result<u64, VMError> {
        self.top()
    }

    pub fn get_f64(&self) -> Result<f64, VMError> {
        self.top()
    }

    pub fn get_i128(&self) -> Result<i128, VMError> {
        self.top()
    }

    pub fn get_u128(&self) -> Result<u128, VMError> {
        self.top()
    }

    /// Top of stack as `f128`, narrowed to `f64`.
    pub fn get_f128(&self) -> Result<f64, VMError> {
        self.top::<F128>().map(F128::to_f64)
    }

    /// Reads the top value as `kind` and tags it.
    pub fn top_value(&self, kind: Kind) -> Result<Value, VMError> {
        self.stack
            .peek(kind.size(), kind.size())
            .map(|bytes| Value::from_le_bytes(kind, bytes))
    }

    /// Fault latch: the outcome of the most recent `div_T`/`rem_T`.
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Code passed to `sig`, if the last run halted through it.
    pub fn signal(&self) -> Option<i8> {
        self.signal
    }

    /// Comparison register.
    pub fn compare(&self) -> i8 {
        self.cmp
    }

    /// Live stack bytes.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Operand stack capacity in bytes.
    pub fn stack_capacity(&self) -> usize {
        self.stack.capacity()
    }

    /// Live stack bytes, bottom first.
    pub fn stack(&self) -> &[u8] {
        self.stack.as_slice()
    }

    /// Value in local slot `index`.
    pub fn local(&self, index: u8) -> Result<Value, VMError> {
        self.scope.get(index)
    }

    /// Instructions executed by the last run.
    pub fn steps(&self) -> u64 {
        self.budget.used()
    }

    /// Per-category instruction counts for the last run.
    pub fn profile(&self) -> &ExecProfile {
        &self.profile
    }

    /// Current stack and locals, as `dbg` would report them.
    pub fn snapshot(&self) -> Snapshot {
        self.capture(0, self.ip)
    }
}

/// Local index operand of `popl`/`pushl`/`setl`.
fn index(operands: &Operands) -> u8 {
    operands.get(0).as_u8().unwrap_or_default()
}

/// Code operand of `dbg`/`sig`.
fn code(operands: &Operands) -> i8 {
    operands.get(0).as_i8().unwrap_or_default()
}

fn byte_count(width: Width, operands: &Operands) -> usize {
    match width {
        Width::Operand => usize::from(operands.get(0).as_u8().unwrap_or_default()),
        Width::Fixed(bytes) => usize::from(bytes),
    }
}
