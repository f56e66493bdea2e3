//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into a flat, header-less bytecode buffer.
//!
//! # Syntax
//!
//! ```text
//! mnemonic operand1 operand2 ...   // optional comment
//! ```
//!
//! - Mnemonics are lowercase (e.g., `push_u8`, `jnl`, `dup4`)
//! - Operands are unsigned decimal literals, parsed by the kind the mnemonic expects
//! - `@name` alone on a line defines a label at the current offset
//! - `@name` in an address operand (the jumps) references a label
//! - `//` comments run to the end of the line, `/* ... */` may span lines
//!
//! Assembly is two passes. The first emits opcodes and immediates, writing an
//! 8-byte `0xFF` placeholder wherever a label is referenced. The second overwrites
//! each placeholder with the label's absolute address.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Isa, Kind};
use crate::virtual_machine::tokenizer::{Token, TokenKind, Tokenizer};
use crate::virtual_machine::vm::extended::F128;
use crate::{debug, error};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Byte written over every label placeholder before backpatching.
const PLACEHOLDER: u8 = 0xFF;
/// Width of an address operand.
const ADDRESS_LEN: usize = 8;

/// Return the line/column/message triple for assembly errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, &str)> {
    match err {
        VMError::AssemblyError {
            line,
            column,
            message,
        } => Some((*line, *column, message.as_str())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
pub fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    column: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(column.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Logs a diagnostic for an assembly error.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    match assembly_error_location(err) {
        Some((line, column, message)) => {
            for diag_line in render_assembly_diagnostic(file, source, line, column, message).lines()
            {
                error!("{diag_line}");
            }
        }
        None => error!("{err}"),
    }
}

/// Attaches a source position to an error.
fn at(line: usize, column: usize, err: VMError) -> VMError {
    VMError::AssemblyError {
        line,
        column,
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
struct LabelDef {
    address: usize,
    line: usize,
}

#[derive(Debug, Clone)]
struct LabelUse {
    label: String,
    line: usize,
    column: usize,
}

/// Assembly state for a single compilation: the growing buffer and label tables.
#[derive(Debug, Default)]
pub struct AsmContext {
    /// Bytecode emitted so far.
    pub bytecode: Vec<u8>,
    /// Label definitions mapping names to bytecode offsets.
    labels: HashMap<String, LabelDef>,
    /// Placeholder offsets mapped to the label they must resolve to.
    usages: BTreeMap<usize, LabelUse>,
}

impl AsmContext {
    /// Creates an empty assembly context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a label at the current bytecode offset.
    pub(crate) fn define_label(&mut self, name: &str, line: usize) -> Result<(), VMError> {
        if let Some(first) = self.labels.get(name) {
            return Err(VMError::DuplicateLabel {
                label: name.to_string(),
                first_line: first.line,
            });
        }
        let address = self.bytecode.len();
        debug!("label '@{name}' defined at {address:#x}");
        self.labels
            .insert(name.to_string(), LabelDef { address, line });
        Ok(())
    }

    /// Emits an address placeholder to be patched with `name`'s address.
    pub(crate) fn reference_label(&mut self, name: &str, line: usize, column: usize) {
        self.usages.insert(
            self.bytecode.len(),
            LabelUse {
                label: name.to_string(),
                line,
                column,
            },
        );
        self.bytecode.extend_from_slice(&[PLACEHOLDER; ADDRESS_LEN]);
    }

    /// Resolves a label to its bytecode offset.
    pub(crate) fn resolve_label(&self, name: &str) -> Result<usize, VMError> {
        self.labels
            .get(name)
            .map(|def| def.address)
            .ok_or(VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }

    /// Second pass: overwrites every placeholder with its label's address.
    fn backpatch(&mut self) -> Result<(), VMError> {
        for (&offset, usage) in &self.usages {
            let address = self
                .resolve_label(&usage.label)
                .map_err(|e| at(usage.line, usage.column, e))?;
            let slot = &mut self.bytecode[offset..offset + ADDRESS_LEN];
            if slot.iter().any(|&b| b != PLACEHOLDER) {
                return Err(at(
                    usage.line,
                    usage.column,
                    VMError::PatchCorrupted { offset },
                ));
            }
            slot.copy_from_slice(&(address as u64).to_le_bytes());
            debug!("patched '@{}' at {offset:#x} -> {address:#x}", usage.label);
        }
        Ok(())
    }
}

/// Two-pass assembler over an injected instruction table.
pub struct Assembler<'isa> {
    isa: &'isa Isa,
}

impl<'isa> Assembler<'isa> {
    pub fn new(isa: &'isa Isa) -> Self {
        Self { isa }
    }

    /// Assembles a whole source text.
    pub fn assemble(&self, source: &str) -> Result<Vec<u8>, VMError> {
        self.assemble_lines(source.lines())
    }

    /// Assembles source given line by line. Lines are numbered from 1.
    pub fn assemble_lines<I, S>(&self, lines: I) -> Result<Vec<u8>, VMError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ctx = AsmContext::new();
        let mut tokenizer = Tokenizer::new();

        for (i, line) in lines.into_iter().enumerate() {
            let line_no = i + 1;
            let tokens = tokenizer
                .tokenize_line(line_no, line.as_ref())
                .map_err(|e| at(line_no, e.column, e.error))?;
            self.assemble_line(&mut ctx, line_no, &tokens)?;
        }
        if let Some(line) = tokenizer.open_comment() {
            return Err(at(line, 1, VMError::UnterminatedComment { line }));
        }

        ctx.backpatch()?;
        Ok(ctx.bytecode)
    }

    /// First pass over one line of tokens.
    fn assemble_line(
        &self,
        ctx: &mut AsmContext,
        line: usize,
        tokens: &[Token],
    ) -> Result<(), VMError> {
        if let [
            Token {
                kind: TokenKind::Label(name),
                column,
            },
        ] = tokens
        {
            if name.is_empty() {
                return Err(at(line, *column, VMError::EmptyLabel));
            }
            return ctx
                .define_label(name, line)
                .map_err(|e| at(line, *column, e));
        }

        let mut pending: VecDeque<Kind> = VecDeque::new();
        let mut instr_column = 1;

        for token in tokens {
            let column = token.column;
            match &token.kind {
                TokenKind::Word(word) => {
                    if let Some(expected) = pending.front() {
                        return Err(at(
                            line,
                            column,
                            VMError::UnexpectedToken {
                                token: word.clone(),
                                expected: expected.name(),
                            },
                        ));
                    }
                    let info = self.isa.lookup(word).ok_or_else(|| {
                        at(
                            line,
                            column,
                            VMError::InvalidInstructionName { name: word.clone() },
                        )
                    })?;
                    ctx.bytecode.push(info.opcode);
                    pending.extend(info.operands.iter().copied());
                    instr_column = column;
                }
                TokenKind::Label(name) => match pending.front() {
                    Some(Kind::U64) if !name.is_empty() => {
                        pending.pop_front();
                        ctx.reference_label(name, line, column);
                    }
                    Some(_) if name.is_empty() => {
                        return Err(at(line, column, VMError::EmptyLabel));
                    }
                    Some(expected) => {
                        return Err(at(
                            line,
                            column,
                            VMError::LabelOperandMismatch {
                                label: name.clone(),
                                expected: expected.name(),
                            },
                        ));
                    }
                    None => {
                        return Err(at(
                            line,
                            column,
                            VMError::MisplacedLabel {
                                label: name.clone(),
                            },
                        ));
                    }
                },
                TokenKind::Number(literal) => {
                    let kind = pending.pop_front().ok_or_else(|| {
                        at(
                            line,
                            column,
                            VMError::UnexpectedNumber {
                                literal: literal.clone(),
                            },
                        )
                    })?;
                    encode_literal(kind, literal, &mut ctx.bytecode)
                        .map_err(|e| at(line, column, e))?;
                }
                TokenKind::Str(text) => {
                    return Err(at(
                        line,
                        column,
                        VMError::StringOperand { text: text.clone() },
                    ));
                }
            }
        }

        if !pending.is_empty() {
            return Err(at(
                line,
                instr_column,
                VMError::MissingOperands {
                    missing: pending.len(),
                },
            ));
        }
        Ok(())
    }
}

/// Parses `literal` as `kind` and appends its little-endian bytes.
///
/// Integer kinds reject anything that does not fit; float kinds reject values
/// that overflow to infinity. `bool` takes any `u8` and stores `0` or `1`.
pub(crate) fn encode_literal(kind: Kind, literal: &str, out: &mut Vec<u8>) -> Result<(), VMError> {
    let invalid = || VMError::InvalidLiteral {
        literal: literal.to_string(),
        kind: kind.name(),
    };

    macro_rules! int {
        ($t:ty) => {
            out.extend_from_slice(&literal.parse::<$t>().map_err(|_| invalid())?.to_le_bytes())
        };
    }

    macro_rules! float {
        ($t:ty) => {{
            let v = literal
                .parse::<$t>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(invalid)?;
            v
        }};
    }

    match kind {
        Kind::I8 => int!(i8),
        Kind::U8 => int!(u8),
        Kind::Bool => {
            let v = literal.parse::<u8>().map_err(|_| invalid())?;
            out.push(u8::from(v != 0))
        }
        Kind::I16 => int!(i16),
        Kind::U16 => int!(u16),
        Kind::I32 => int!(i32),
        Kind::U32 => int!(u32),
        Kind::F32 => out.extend_from_slice(&float!(f32).to_le_bytes()),
        Kind::I64 => int!(i64),
        Kind::U64 => int!(u64),
        Kind::F64 => out.extend_from_slice(&float!(f64).to_le_bytes()),
        Kind::I128 => int!(i128),
        Kind::U128 => int!(u128),
        Kind::F128 => {
            let v = F128::from_decimal(literal)
                .filter(|v| v.is_finite())
                .ok_or_else(invalid)?;
            out.extend_from_slice(&v.to_le_bytes())
        }
    }
    Ok(())
}

/// Assembles source with the shared instruction table.
pub fn assemble_source(source: &str) -> Result<Vec<u8>, VMError> {
    assemble_source_with_name(source, "<source>")
}

/// Assembles source with an associated filename for error diagnostics.
///
/// Logs a compiler-style diagnostic on failure, including source location information.
pub fn assemble_source_with_name(source: &str, source_name: &str) -> Result<Vec<u8>, VMError> {
    let result = Assembler::new(Isa::shared()).assemble(source);
    if let Err(err) = &result {
        log_assembly_error(source_name, source, err);
    }
    result
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        path: path_ref.display().to_string(),
        source: e.to_string(),
    })?;
    assemble_source_with_name(&source, &path_ref.display().to_string())
}
