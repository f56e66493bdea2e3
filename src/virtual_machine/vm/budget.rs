use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Operation;

/// Number of categories tracked by [`ExecProfile`].
const CATEGORY_COUNT: usize = 6;

/// Instruction categories for execution profiling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Category {
    /// Pushes, dups, swaps and pops.
    Stack = 0,
    /// Local reads and writes.
    Locals = 1,
    /// Typed arithmetic.
    Arithmetic = 2,
    /// `cmp_T`.
    Compare = 3,
    /// Jumps.
    Control = 4,
    /// `ret`, `dbg` and `sig`.
    Debug = 5,
}

impl Category {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Stack => "Stack",
            Category::Locals => "Locals",
            Category::Arithmetic => "Arithmetic",
            Category::Compare => "Compare",
            Category::Control => "Control",
            Category::Debug => "Debug",
        }
    }

    /// Category an operation is counted under.
    pub const fn of(operation: Operation) -> Category {
        match operation {
            Operation::Push(_) | Operation::Dup(_) | Operation::Swap(_) | Operation::Pop(_) => {
                Category::Stack
            }
            Operation::PopLocal(_) | Operation::PushLocal(_) | Operation::SetLocal(_) => {
                Category::Locals
            }
            Operation::Add(_)
            | Operation::Sub(_)
            | Operation::Mul(_)
            | Operation::Div(_)
            | Operation::Rem(_)
            | Operation::Abs(_)
            | Operation::Dec(_)
            | Operation::Inc(_) => Category::Arithmetic,
            Operation::Cmp(_) => Category::Compare,
            Operation::Jump(_) => Category::Control,
            Operation::Ret | Operation::Dbg | Operation::Sig => Category::Debug,
        }
    }

    /// All categories in discriminant order.
    const ALL: [Category; CATEGORY_COUNT] = [
        Category::Stack,
        Category::Locals,
        Category::Arithmetic,
        Category::Compare,
        Category::Control,
        Category::Debug,
    ];
}

/// Per-category instruction counts for one run.
///
/// Backed by a flat array indexed by [`Category`] discriminant.
#[derive(Clone, Debug, Default)]
pub struct ExecProfile {
    counts: [u64; CATEGORY_COUNT],
}

impl ExecProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one executed instruction.
    #[inline(always)]
    pub fn record(&mut self, operation: Operation) {
        let slot = &mut self.counts[Category::of(operation) as usize];
        *slot = slot.saturating_add(1);
    }

    /// Total instructions across all categories.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    /// Iterates all categories and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (Category, u64)> {
        Category::ALL.into_iter().zip(self.counts)
    }
}

/// Instruction budget checked once per fetch-decode-execute cycle.
#[derive(Clone, Debug)]
pub(super) struct StepBudget {
    used: u64,
    limit: Option<u64>,
}

impl StepBudget {
    pub(super) fn new(limit: Option<u64>) -> Self {
        Self { used: 0, limit }
    }

    /// Charges one step. Fails once the limit would be exceeded.
    #[inline]
    pub(super) fn charge(&mut self) -> Result<(), VMError> {
        if let Some(limit) = self.limit
            && self.used >= limit
        {
            return Err(VMError::StepLimitExceeded { limit });
        }
        self.used += 1;
        Ok(())
    }

    pub(super) fn used(&self) -> u64 {
        self.used
    }

    pub(super) fn reset(&mut self) {
        self.used = 0;
    }
}
