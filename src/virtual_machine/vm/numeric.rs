//! Typed views over the untyped byte stack.
//!
//! [`StackValue`] knows how to move a Rust value in and out of stack bytes;
//! [`Numeric`] and [`Signed`] carry the arithmetic the `add_T` ... `abs_T` families
//! need. Integer arithmetic wraps. Float kinds use IEEE semantics, with `f128`
//! evaluated in 80-bit extended precision.

use crate::virtual_machine::isa::Kind;
use crate::virtual_machine::vm::extended::F128;
use crate::virtual_machine::vm::value::le;

/// A Rust type that maps onto one [`Kind`].
pub trait StackValue: Copy + PartialEq + PartialOrd {
    const KIND: Kind;

    /// Encoded width in bytes.
    const SIZE: usize = Self::KIND.size();

    /// Decodes from the first `SIZE` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;

    /// Encodes into the first `SIZE` bytes of `out`.
    fn write_le(self, out: &mut [u8]);
}

/// Arithmetic shared by every kind except `bool`.
pub trait Numeric: StackValue {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    /// Caller guarantees `rhs` is not zero.
    fn div(self, rhs: Self) -> Self;
    /// Caller guarantees `rhs` is not zero.
    fn rem(self, rhs: Self) -> Self;
    fn inc(self) -> Self;
    fn dec(self) -> Self;
    fn is_zero(self) -> bool;
}

/// Kinds with an `abs_T` instruction.
pub trait Signed: Numeric {
    fn abs(self) -> Self;
}

macro_rules! stack_value {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl StackValue for $t {
                const KIND: Kind = Kind::$kind;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$t>::from_le_bytes(le(bytes))
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

stack_value!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    f32 => F32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    i128 => I128,
    u128 => U128,
    F128 => F128,
);

impl StackValue for bool {
    const KIND: Kind = Kind::Bool;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}

macro_rules! integer_numeric {
    ($($t:ty),* $(,)?) => {
        $(
            impl Numeric for $t {
                #[inline]
                fn add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
                #[inline]
                fn sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
                #[inline]
                fn mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
                #[inline]
                fn div(self, rhs: Self) -> Self { self.wrapping_div(rhs) }
                #[inline]
                fn rem(self, rhs: Self) -> Self { self.wrapping_rem(rhs) }
                #[inline]
                fn inc(self) -> Self { self.wrapping_add(1) }
                #[inline]
                fn dec(self) -> Self { self.wrapping_sub(1) }
                #[inline]
                fn is_zero(self) -> bool { self == 0 }
            }
        )*
    };
}

integer_numeric!(i8, u8, i16, u16, i32, u32, i64, u64, i128, u128);

macro_rules! float_numeric {
    ($($t:ty),* $(,)?) => {
        $(
            impl Numeric for $t {
                fn add(self, rhs: Self) -> Self { self + rhs }
                fn sub(self, rhs: Self) -> Self { self - rhs }
                fn mul(self, rhs: Self) -> Self { self * rhs }
                fn div(self, rhs: Self) -> Self { self / rhs }
                fn rem(self, rhs: Self) -> Self { self % rhs }
                fn inc(self) -> Self { self + 1.0 }
                fn dec(self) -> Self { self - 1.0 }
                fn is_zero(self) -> bool { self == 0.0 }
            }

            impl Signed for $t {
                fn abs(self) -> Self { <$t>::abs(self) }
            }
        )*
    };
}

float_numeric!(f32, f64);

macro_rules! signed_integer {
    ($($t:ty),* $(,)?) => {
        $(
            impl Signed for $t {
                #[inline]
                fn abs(self) -> Self { self.wrapping_abs() }
            }
        )*
    };
}

signed_integer!(i8, i16, i32, i64, i128);

impl Numeric for F128 {
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn div(self, rhs: Self) -> Self {
        self / rhs
    }

    fn rem(self, rhs: Self) -> Self {
        self % rhs
    }

    fn inc(self) -> Self {
        self + F128::ONE
    }

    fn dec(self) -> Self {
        self - F128::ONE
    }

    fn is_zero(self) -> bool {
        F128::is_zero(self)
    }
}

impl Signed for F128 {
    fn abs(self) -> Self {
        F128::abs(self)
    }
}
