use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Kind;
use crate::virtual_machine::vm::value::Value;

/// Number of local slots shared by the whole program.
pub const LOCALS: usize = 0xff;

/// Local variable bank.
///
/// Provides [`LOCALS`] slots, each holding a single tagged [`Value`].
/// Slots start out as [`Value::None`].
pub(super) struct Scope {
    slots: Vec<Value>,
}

impl Scope {
    pub(super) fn new() -> Self {
        Self {
            slots: vec![Value::None; LOCALS],
        }
    }

    /// Returns the value in slot `idx`.
    ///
    /// Returns [`VMError::InvalidLocalIndex`] if `idx` is out of bounds.
    pub(super) fn get(&self, idx: u8) -> Result<Value, VMError> {
        self.slots
            .get(idx as usize)
            .copied()
            .ok_or(VMError::InvalidLocalIndex {
                index: idx as usize,
                available: self.slots.len(),
            })
    }

    /// Returns the value in slot `idx` if it is tagged `kind`.
    ///
    /// Returns [`VMError::LocalTypeMismatch`] for any other tag, empty slots included.
    pub(super) fn get_typed(&self, idx: u8, kind: Kind) -> Result<Value, VMError> {
        let value = self.get(idx)?;
        if value.kind() != Some(kind) {
            return Err(VMError::LocalTypeMismatch {
                index: idx as usize,
                expected: kind.name(),
                actual: value.type_name(),
            });
        }
        Ok(value)
    }

    /// Stores a value into slot `idx`.
    ///
    /// Returns [`VMError::InvalidLocalIndex`] if `idx` is out of bounds.
    pub(super) fn set(&mut self, idx: u8, value: Value) -> Result<(), VMError> {
        let available = self.slots.len();
        let slot = self
            .slots
            .get_mut(idx as usize)
            .ok_or(VMError::InvalidLocalIndex {
                index: idx as usize,
                available,
            })?;
        *slot = value;
        Ok(())
    }

    /// Slots from index 0 up to, not including, the first empty one.
    pub(super) fn dense(&self) -> &[Value] {
        let end = self
            .slots
            .iter()
            .position(|value| *value == Value::None)
            .unwrap_or(self.slots.len());
        &self.slots[..end]
    }

    pub(super) fn clear(&mut self) {
        self.slots.fill(Value::None);
    }
}
