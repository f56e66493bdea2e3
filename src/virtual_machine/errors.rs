use pushle_derive::Error;

/// Errors raised while assembling source text or executing bytecode.
///
/// Compile-time problems surface from the assembler wrapped in [`VMError::AssemblyError`]
/// with their source position. Runtime variants are fatal: the run that produced them is
/// over. Division by zero is not an error here; it is recorded in the VM's fault latch.
#[derive(Debug, Error)]
pub enum VMError {
    // =========================
    // Assembly
    // =========================
    /// Assembly error with line and column context.
    #[error("line {line}:{column}: {message}")]
    AssemblyError {
        line: usize,
        column: usize,
        message: String,
    },
    /// Unrecognized mnemonic.
    #[error("unknown opcode '{name}'")]
    InvalidInstructionName { name: String },
    /// A bareword showed up while the current instruction still expected operands.
    #[error("unexpected token '{token}' (expected {expected} operand)")]
    UnexpectedToken {
        token: String,
        expected: &'static str,
    },
    /// A numeric literal showed up with no operand left to fill.
    #[error("unexpected number '{literal}' (instruction takes no more operands)")]
    UnexpectedNumber { literal: String },
    /// Numeric literal that does not parse as, or does not fit, its operand kind.
    #[error("invalid {kind} literal '{literal}'")]
    InvalidLiteral {
        literal: String,
        kind: &'static str,
    },
    /// String literals are lexed but cannot be used as operands.
    #[error("string operands are not supported (\"{text}\")")]
    StringOperand { text: String },
    /// Line ended before every declared operand was supplied.
    #[error("unexpected end of instruction ({missing} operand(s) missing)")]
    MissingOperands { missing: usize },
    /// Label used where a non-address operand was expected.
    #[error("label '@{label}' can only be used for an address-sized operand (expected {expected})")]
    LabelOperandMismatch {
        label: String,
        expected: &'static str,
    },
    /// Label reference that is neither an operand nor alone on its line.
    #[error("label '@{label}' must either be alone on its line or fill an address operand")]
    MisplacedLabel { label: String },
    /// `@` with no name after it.
    #[error("empty label name")]
    EmptyLabel,
    /// Label defined more than once.
    #[error("duplicate label '@{label}' (first defined on line {first_line})")]
    DuplicateLabel { label: String, first_line: usize },
    /// Reference to undefined label.
    #[error("undefined label '@{label}'")]
    UndefinedLabel { label: String },
    /// A placeholder was already overwritten when backpatching reached it.
    #[error("label placeholder at offset {offset} was overwritten before backpatching")]
    PatchCorrupted { offset: usize },
    /// Double-quoted string still open at the end of its line.
    #[error("unterminated string literal (missing closing quote)")]
    UnterminatedString,
    /// `/*` comment still open at the end of the source.
    #[error("unterminated block comment (opened on line {line})")]
    UnterminatedComment { line: usize },

    // =========================
    // Execution
    // =========================
    /// Opcode byte with no entry in the instruction table.
    #[error("invalid instruction {opcode:#04x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// Bytecode ended in the middle of an instruction's immediates.
    #[error(
        "unexpected end of bytecode at offset {ip}: requested {requested} byte(s), {available} available"
    )]
    UnexpectedEndOfBytecode {
        ip: usize,
        requested: usize,
        available: usize,
    },
    /// Jump target that cannot be represented as an address on this platform.
    #[error("invalid jump target {target}")]
    InvalidJumpTarget { target: u64 },
    /// Push past the configured stack capacity.
    #[error("stack overflow: pushing {requested} byte(s) onto {depth} of {capacity}")]
    StackOverflow {
        requested: usize,
        depth: usize,
        capacity: usize,
    },
    /// Pop or reference below the stack base.
    #[error("stack underflow: needed {requested} byte(s), only {depth} on the stack")]
    StackUnderflow { requested: usize, depth: usize },
    /// Local slot index outside the scope.
    #[error("local index {index} out of bounds ({available} slots)")]
    InvalidLocalIndex { index: usize, available: usize },
    /// Typed local read of a slot holding a different kind.
    #[error("local #{index} holds {actual}, expected {expected}")]
    LocalTypeMismatch {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
    /// Instruction budget exhausted.
    #[error("step limit of {limit} instructions exceeded")]
    StepLimitExceeded { limit: u64 },

    // =========================
    // Host
    // =========================
    /// File I/O error.
    #[error("io error on {path}: {source}")]
    IoError { path: String, source: String },
}
