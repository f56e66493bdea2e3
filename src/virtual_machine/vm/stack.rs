use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::numeric::StackValue;
use std::ops::Range;

/// The operand stack: a fixed-capacity byte buffer with a top-of-stack marker.
///
/// Contents are untyped. Offsets passed to [`Stack::read`], [`Stack::write`] and
/// [`Stack::peek`] count bytes down from the top, so offset `4` names the value
/// whose first byte sits four bytes below the top.
pub(super) struct Stack {
    memory: Vec<u8>,
    top: usize,
}

impl Stack {
    /// Allocates a zeroed stack of `capacity` bytes.
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            memory: vec![0; capacity],
            top: 0,
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Number of live bytes.
    pub(super) fn depth(&self) -> usize {
        self.top
    }

    /// Live bytes, bottom first.
    pub(super) fn as_slice(&self) -> &[u8] {
        &self.memory[..self.top]
    }

    /// Drops every live byte and zeroes the region that held them.
    pub(super) fn clear(&mut self) {
        self.memory[..self.top].fill(0);
        self.top = 0;
    }

    /// Copies `bytes` onto the top.
    pub(super) fn push(&mut self, bytes: &[u8]) -> Result<(), VMError> {
        let end = self.reserve(bytes.len())?;
        self.memory[self.top..end].copy_from_slice(bytes);
        self.top = end;
        Ok(())
    }

    /// Removes `count` bytes and returns them.
    ///
    /// The popped bytes stay readable until the next push overwrites them.
    pub(super) fn pop(&mut self, count: usize) -> Result<&[u8], VMError> {
        let start = self.below_top(count)?;
        let end = self.top;
        self.top = start;
        Ok(&self.memory[start..end])
    }

    /// Borrows `len` bytes starting `offset` bytes below the top, without popping.
    pub(super) fn peek(&self, offset: usize, len: usize) -> Result<&[u8], VMError> {
        let range = self.span(offset, len)?;
        Ok(&self.memory[range])
    }

    /// Reads the `T` whose first byte is `offset` bytes below the top.
    pub(super) fn read<T: StackValue>(&self, offset: usize) -> Result<T, VMError> {
        self.peek(offset, T::SIZE).map(T::read_le)
    }

    /// Overwrites the `T` whose first byte is `offset` bytes below the top.
    pub(super) fn write<T: StackValue>(&mut self, offset: usize, value: T) -> Result<(), VMError> {
        let range = self.span(offset, T::SIZE)?;
        value.write_le(&mut self.memory[range]);
        Ok(())
    }

    /// Pushes a copy of the top `count` bytes.
    pub(super) fn dup(&mut self, count: usize) -> Result<(), VMError> {
        let start = self.below_top(count)?;
        let end = self.reserve(count)?;
        self.memory.copy_within(start..self.top, self.top);
        self.top = end;
        Ok(())
    }

    /// Exchanges the top `count` bytes with the `count` bytes beneath them.
    pub(super) fn swap(&mut self, count: usize) -> Result<(), VMError> {
        let start = self.below_top(count.saturating_mul(2))?;
        let (lower, upper) = self.memory[start..self.top].split_at_mut(count);
        lower.swap_with_slice(upper);
        Ok(())
    }

    /// Offset of the first byte `count` bytes below the top.
    fn below_top(&self, count: usize) -> Result<usize, VMError> {
        self.top
            .checked_sub(count)
            .ok_or(VMError::StackUnderflow {
                requested: count,
                depth: self.top,
            })
    }

    /// New top after growing by `count` bytes.
    fn reserve(&self, count: usize) -> Result<usize, VMError> {
        self.top
            .checked_add(count)
            .filter(|&end| end <= self.memory.len())
            .ok_or(VMError::StackOverflow {
                requested: count,
                depth: self.top,
                capacity: self.memory.len(),
            })
    }

    fn span(&self, offset: usize, len: usize) -> Result<Range<usize>, VMError> {
        let start = self.below_top(offset)?;
        if len > offset {
            return Err(VMError::StackUnderflow {
                requested: len,
                depth: offset,
            });
        }
        Ok(start..start + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let mut stack = Stack::new(8);
        stack.push(&[1, 2, 3]).unwrap();
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.pop(2).unwrap(), &[2, 3]);
        assert_eq!(stack.as_slice(), &[1]);
    }

    #[test]
    fn overflow_and_underflow_are_errors() {
        let mut stack = Stack::new(4);
        stack.push(&[0; 4]).unwrap();
        assert!(matches!(
            stack.push(&[0]),
            Err(VMError::StackOverflow {
                requested: 1,
                depth: 4,
                capacity: 4
            })
        ));
        assert!(matches!(
            stack.pop(5),
            Err(VMError::StackUnderflow {
                requested: 5,
                depth: 4
            })
        ));
        assert_eq!(stack.depth(), 4);
    }

    #[test]
    fn typed_access_is_relative_to_top() {
        let mut stack = Stack::new(16);
        stack.push(&7u16.to_le_bytes()).unwrap();
        stack.push(&9u16.to_le_bytes()).unwrap();
        assert_eq!(stack.read::<u16>(2).unwrap(), 9);
        assert_eq!(stack.read::<u16>(4).unwrap(), 7);
        stack.write::<u16>(2, 300).unwrap();
        assert_eq!(stack.as_slice(), &[7, 0, 0x2C, 0x01]);
        assert!(stack.read::<u16>(6).is_err());
        assert!(stack.read::<u32>(2).is_err());
    }

    #[test]
    fn dup_and_swap() {
        let mut stack = Stack::new(8);
        stack.push(&[1, 2, 3]).unwrap();
        stack.dup(2).unwrap();
        assert_eq!(stack.as_slice(), &[1, 2, 3, 2, 3]);
        stack.swap(1).unwrap();
        assert_eq!(stack.as_slice(), &[1, 2, 3, 3, 2]);
        stack.swap(2).unwrap();
        assert_eq!(stack.as_slice(), &[1, 3, 2, 2, 3]);
        assert!(stack.swap(3).is_err());
        assert!(stack.dup(4).is_err());
    }

    #[test]
    fn clear_resets_depth() {
        let mut stack = Stack::new(4);
        stack.push(&[9, 9]).unwrap();
        stack.clear();
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.capacity(), 4);
    }
}
