use crate::info;
use crate::virtual_machine::vm::value::Value;
use std::fmt;

/// Instruction that produced a [`Snapshot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// `dbg n`.
    Debug,
    /// `sig n`; the run stops after the snapshot.
    Signal,
    /// `ret`, which only reports state.
    Return,
}

impl Event {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Event::Debug => "dbg",
            Event::Signal => "sig",
            Event::Return => "ret",
        }
    }
}

/// Machine state captured by `dbg`, `sig` and `ret`.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Operand of the instruction (`0` for `ret`).
    pub code: i8,
    /// Bytecode offset of the instruction.
    pub offset: usize,
    /// Live stack bytes, bottom first.
    pub stack: Vec<u8>,
    /// Locals from slot 0 up to the first empty slot.
    pub locals: Vec<Value>,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code {} at offset {}", self.code, self.offset)?;
        write!(f, "stack ({} bytes):", self.stack.len())?;
        for byte in &self.stack {
            write!(f, " {byte:02x}")?;
        }
        writeln!(f)?;
        write!(f, "locals ({}):", self.locals.len())?;
        for (i, value) in self.locals.iter().enumerate() {
            write!(f, "\n  #{i} {} = {value}", value.type_name())?;
        }
        Ok(())
    }
}

/// Receives snapshots emitted during a run.
pub trait DebugSink {
    fn snapshot(&mut self, event: Event, snapshot: Snapshot);
}

/// Writes snapshots to the log at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DebugSink for LogSink {
    fn snapshot(&mut self, event: Event, snapshot: Snapshot) {
        for line in snapshot.to_string().lines() {
            info!("[{}] {line}", event.as_str());
        }
    }
}

/// Keeps every snapshot in memory.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    pub events: Vec<(Event, Snapshot)>,
}

impl DebugSink for Recorder {
    fn snapshot(&mut self, event: Event, snapshot: Snapshot) {
        self.events.push((event, snapshot));
    }
}
