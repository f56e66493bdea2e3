//! 16-byte `f128` values.
//!
//! An `f128` slot holds an x87 80-bit extended-precision float: a 64-bit mantissa
//! with an explicit integer bit in bytes `0..8`, then sign and a 15-bit biased
//! exponent in bytes `8..10`. Bytes `10..16` are zero padding.
//!
//! Arithmetic is done in software on the full 64-bit mantissa with
//! round-to-nearest-even, so results match what an x87 FPU produces in extended
//! precision. Every `f64` converts to the extended form exactly.

use crate::virtual_machine::vm::value::le;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

const EXPONENT_BIAS: i32 = 16383;
const EXPONENT_MAX: u16 = 0x7FFF;
const SIGN_BIT: u16 = 0x8000;
const F64_BIAS: i32 = 1023;
const F64_FRACTION_BITS: u32 = 52;
const INTEGER_BIT: u64 = 1 << 63;
const QUIET_BIT: u64 = 1 << 62;
const ROUND_HALF: u64 = 1 << 63;

/// An `f128` stack or local value, stored as its raw little-endian bytes.
#[derive(Clone, Copy, Default)]
pub struct F128 {
    bytes: [u8; 16],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Class {
    Zero,
    Finite,
    Infinite,
    Nan,
}

/// Decoded sign, class and significand.
///
/// A finite value is `mant * 2^(exp - 63)` with the top bit of `mant` set, so
/// denormals come out normalized with an exponent below the encodable minimum.
#[derive(Clone, Copy, Debug)]
struct Parts {
    negative: bool,
    class: Class,
    exp: i32,
    mant: u64,
}

impl F128 {
    pub const ZERO: F128 = F128::pack(false, 0, 0);
    pub const ONE: F128 = F128::pack(false, EXPONENT_BIAS as u16, INTEGER_BIT);
    pub const INFINITY: F128 = F128::pack(false, EXPONENT_MAX, INTEGER_BIT);
    pub const NAN: F128 = F128::pack(false, EXPONENT_MAX, INTEGER_BIT | QUIET_BIT);

    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    pub const fn to_le_bytes(self) -> [u8; 16] {
        self.bytes
    }

    const fn pack(negative: bool, exponent: u16, mantissa: u64) -> Self {
        let m = mantissa.to_le_bytes();
        let se = ((negative as u16) << 15 | exponent).to_le_bytes();
        let mut bytes = [0u8; 16];
        let mut i = 0;
        while i < 8 {
            bytes[i] = m[i];
            i += 1;
        }
        bytes[8] = se[0];
        bytes[9] = se[1];
        Self { bytes }
    }

    fn mantissa(self) -> u64 {
        u64::from_le_bytes(le(&self.bytes[..8]))
    }

    fn sign_exponent(self) -> u16 {
        u16::from_le_bytes([self.bytes[8], self.bytes[9]])
    }

    fn zero(negative: bool) -> Self {
        F128::pack(negative, 0, 0)
    }

    fn infinity(negative: bool) -> Self {
        F128::pack(negative, EXPONENT_MAX, INTEGER_BIT)
    }

    fn parts(self) -> Parts {
        let mant = self.mantissa();
        let sign_exponent = self.sign_exponent();
        let negative = sign_exponent & SIGN_BIT != 0;
        let exponent = sign_exponent & EXPONENT_MAX;
        let (class, exp, mant) = if exponent == EXPONENT_MAX {
            let class = if mant << 1 == 0 {
                Class::Infinite
            } else {
                Class::Nan
            };
            (class, 0, mant)
        } else if mant == 0 {
            (Class::Zero, 0, 0)
        } else {
            // Denormals share the exponent of the smallest normal.
            let shift = mant.leading_zeros();
            let exp = i32::from(exponent.max(1)) - EXPONENT_BIAS - shift as i32;
            (Class::Finite, exp, mant << shift)
        };
        Parts {
            negative,
            class,
            exp,
            mant,
        }
    }

    /// Same NaN with the quiet bit set.
    fn quiet(self) -> Self {
        let p = self.parts();
        F128::pack(p.negative, EXPONENT_MAX, p.mant | INTEGER_BIT | QUIET_BIT)
    }

    pub fn is_nan(self) -> bool {
        self.parts().class == Class::Nan
    }

    pub fn is_zero(self) -> bool {
        self.parts().class == Class::Zero
    }

    pub fn is_finite(self) -> bool {
        matches!(self.parts().class, Class::Zero | Class::Finite)
    }

    pub fn abs(self) -> Self {
        let mut bytes = self.bytes;
        bytes[9] &= 0x7F;
        Self { bytes }
    }

    /// Exact conversion of an integer, rounded to 64 significant bits.
    pub fn from_u128(value: u128) -> Self {
        if value == 0 {
            return F128::ZERO;
        }
        normalize_round(false, 127, value)
    }

    /// Widens an `f64`. Exact for every input, including subnormals, infinities and NaN.
    pub fn from_f64(value: f64) -> Self {
        let bits = value.to_bits();
        let negative = bits >> 63 != 0;
        let exponent = ((bits >> F64_FRACTION_BITS) & 0x7FF) as i32;
        let fraction = bits & ((1 << F64_FRACTION_BITS) - 1);

        let (exponent, mantissa) = match exponent {
            0 if fraction == 0 => (0, 0),
            0 => {
                // f64 subnormal: normalize so the integer bit is set.
                let shift = fraction.leading_zeros();
                let unbiased = 1 - F64_BIAS - (shift as i32 - 11);
                ((unbiased + EXPONENT_BIAS) as u16, fraction << shift)
            }
            0x7FF => (EXPONENT_MAX, INTEGER_BIT | (fraction << 11)),
            _ => (
                (exponent - F64_BIAS + EXPONENT_BIAS) as u16,
                INTEGER_BIT | (fraction << 11),
            ),
        };
        F128::pack(negative, exponent, mantissa)
    }

    /// Narrows to `f64`, rounding the mantissa to 53 bits.
    pub fn to_f64(self) -> f64 {
        let p = self.parts();
        let magnitude = match p.class {
            Class::Zero => 0.0,
            Class::Infinite => f64::INFINITY,
            Class::Nan => f64::NAN,
            Class::Finite => scale(p.mant as f64, p.exp - 63),
        };
        if p.negative { -magnitude } else { magnitude }
    }

    /// Parses an unsigned decimal literal (`digits[.digits]`).
    ///
    /// Up to 38 significant digits are read exactly. With at most 38 fractional
    /// digits the result is rounded once; longer expansions are scaled in
    /// extended precision. Returns `None` for malformed text.
    pub fn from_decimal(text: &str) -> Option<Self> {
        let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut digits: u128 = 0;
        let mut exp10: i64 = 0;
        let mut full = false;
        let mut dropped_nonzero = false;
        for (b, in_fraction) in whole
            .bytes()
            .map(|b| (b, false))
            .chain(fraction.bytes().map(|b| (b, true)))
        {
            let d = u128::from(b - b'0');
            let next = digits.checked_mul(10).and_then(|v| v.checked_add(d));
            match next {
                Some(v) if !full => {
                    digits = v;
                    if in_fraction {
                        exp10 -= 1;
                    }
                }
                _ => {
                    full = true;
                    dropped_nonzero |= d != 0;
                    if !in_fraction {
                        exp10 += 1;
                    }
                }
            }
        }
        if dropped_nonzero {
            // Sticky bit, far below the 64-bit rounding position.
            digits |= 1;
        }

        if digits == 0 {
            return Some(F128::ZERO);
        }
        let exact_power = u32::try_from(exp10.unsigned_abs())
            .ok()
            .and_then(|n| 10u128.checked_pow(n));
        let value = match exact_power {
            Some(power) if exp10 < 0 => ratio(digits, power),
            Some(power) => match digits.checked_mul(power) {
                Some(product) => F128::from_u128(product),
                None => F128::from_u128(digits) * pow10(exp10.unsigned_abs()),
            },
            None if exp10 < 0 => F128::from_u128(digits) / pow10(exp10.unsigned_abs()),
            None => F128::from_u128(digits) * pow10(exp10.unsigned_abs()),
        };
        Some(value)
    }

    /// Fixed-point decimal rounded to `significant` digits, for exponents whose
    /// expansion fits in 128-bit arithmetic. Integers are always exact.
    fn fixed_digits(self, significant: usize) -> Option<String> {
        let p = self.parts();
        if p.class != Class::Finite {
            return None;
        }
        let e = p.exp - 63;
        if e >= 0 {
            return (e <= 64).then(|| (u128::from(p.mant) << e).to_string());
        }
        let k = e.unsigned_abs();
        if k > 120 {
            return None;
        }
        let one = 1u128 << k;
        let mask = one - 1;
        let whole = u128::from(p.mant) >> k;
        let mut frac = u128::from(p.mant) & mask;

        let mut digits: Vec<u8> = whole.to_string().bytes().map(|b| b - b'0').collect();
        let mut point = digits.len();
        let mut counted = if whole == 0 { 0 } else { digits.len() };
        while frac != 0 && counted < significant {
            frac *= 10;
            let d = (frac >> k) as u8;
            frac &= mask;
            if counted > 0 || d != 0 {
                counted += 1;
            }
            digits.push(d);
        }
        if frac << 1 >= one {
            let mut i = digits.len();
            loop {
                if i == 0 {
                    digits.insert(0, 1);
                    point += 1;
                    break;
                }
                i -= 1;
                if digits[i] == 9 {
                    digits[i] = 0;
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
        while digits.len() > point && digits.last() == Some(&0) {
            digits.pop();
        }

        let mut out: String = digits[..point].iter().map(|d| char::from(b'0' + d)).collect();
        if digits.len() > point {
            out.push('.');
            out.extend(digits[point..].iter().map(|d| char::from(b'0' + d)));
        }
        Some(out)
    }

    /// Shortest candidate text that parses back to exactly this magnitude.
    fn decimal_magnitude(self) -> String {
        let magnitude = self.abs();
        let narrow = magnitude.to_f64().to_string();
        let reparses = |text: &String| {
            F128::from_decimal(text).is_some_and(|v| v.bytes == magnitude.bytes)
        };
        if reparses(&narrow) {
            return narrow;
        }
        (17..=21)
            .filter_map(|significant| magnitude.fixed_digits(significant))
            .find(|text| reparses(text))
            .unwrap_or(narrow)
    }
}

/// `value * 2^exp`, stepping so no intermediate power of two leaves the normal range.
fn scale(mut value: f64, mut exp: i32) -> f64 {
    const STEP: i32 = 1000;
    while exp > STEP {
        value *= pow2(STEP);
        exp -= STEP;
    }
    while exp < -STEP {
        value *= pow2(-STEP);
        exp += STEP;
    }
    value * pow2(exp)
}

/// Exact `2^exp` for `exp` in the normal `f64` range.
fn pow2(exp: i32) -> f64 {
    f64::from_bits(((exp + F64_BIAS) as u64) << F64_FRACTION_BITS)
}

/// `10^n` by square-and-multiply. Exact up to `10^27`.
fn pow10(mut n: u64) -> F128 {
    let mut result = F128::ONE;
    let mut base = F128::from_u128(10);
    while n > 0 {
        if n & 1 == 1 {
            result = result * base;
        }
        n >>= 1;
        if n > 0 {
            base = base * base;
        }
    }
    result
}

/// `num / den` rounded once, by binary long division. Both must be non-zero and
/// `den` must stay below `2^127`.
fn ratio(num: u128, den: u128) -> F128 {
    let mut sig = num / den;
    let mut rest = num % den;
    let mut exp = 127;
    while sig >> 127 == 0 {
        sig <<= 1;
        rest <<= 1;
        exp -= 1;
        if rest >= den {
            rest -= den;
            sig |= 1;
        }
    }
    round_pack(false, exp, sig | u128::from(rest != 0))
}

/// Shifts right, folding every lost bit into bit 0.
fn shift_right_sticky(value: u128, shift: u32) -> u128 {
    match shift {
        0 => value,
        1..=127 => (value >> shift) | u128::from(value & ((1 << shift) - 1) != 0),
        _ => u128::from(value != 0),
    }
}

/// Rounds `sig * 2^(exp - 127)` to the extended format. `sig` must be non-zero.
fn normalize_round(negative: bool, exp: i32, sig: u128) -> F128 {
    let shift = sig.leading_zeros();
    round_pack(negative, exp - shift as i32, sig << shift)
}

/// Rounds a normalized `sig * 2^(exp - 127)` (top bit of `sig` set) to nearest, ties to even.
fn round_pack(negative: bool, exp: i32, mut sig: u128) -> F128 {
    let mut biased = exp + EXPONENT_BIAS;
    if biased < 1 {
        sig = shift_right_sticky(sig, (1 - biased).min(128) as u32);
        biased = 1;
    }

    let mut mant = (sig >> 64) as u64;
    let rest = sig as u64;
    if rest > ROUND_HALF || (rest == ROUND_HALF && mant & 1 == 1) {
        let (next, carry) = mant.overflowing_add(1);
        mant = if carry {
            biased += 1;
            INTEGER_BIT
        } else {
            next
        };
    }

    if biased >= i32::from(EXPONENT_MAX) {
        return F128::infinity(negative);
    }
    let exponent = if mant & INTEGER_BIT == 0 {
        0
    } else {
        biased as u16
    };
    F128::pack(negative, exponent, mant)
}

/// First NaN operand, quieted.
fn propagate_nan(a: F128, b: F128) -> F128 {
    if a.is_nan() { a.quiet() } else { b.quiet() }
}

impl Add for F128 {
    type Output = F128;

    fn add(self, rhs: F128) -> F128 {
        let (a, b) = (self.parts(), rhs.parts());
        match (a.class, b.class) {
            (Class::Nan, _) | (_, Class::Nan) => propagate_nan(self, rhs),
            (Class::Infinite, Class::Infinite) if a.negative != b.negative => F128::NAN,
            (Class::Infinite, _) => self,
            (_, Class::Infinite) => rhs,
            (Class::Zero, Class::Zero) => F128::zero(a.negative && b.negative),
            (Class::Zero, _) => rhs,
            (_, Class::Zero) => self,
            (Class::Finite, Class::Finite) => {
                let (big, small) = if (a.exp, a.mant) >= (b.exp, b.mant) {
                    (a, b)
                } else {
                    (b, a)
                };
                // Two bits of headroom above the mantissa, 62 guard bits below.
                let x = u128::from(big.mant) << 62;
                let y = shift_right_sticky(
                    u128::from(small.mant) << 62,
                    (big.exp - small.exp).min(128) as u32,
                );
                if big.negative == small.negative {
                    normalize_round(big.negative, big.exp + 2, x + y)
                } else if x == y {
                    F128::ZERO
                } else {
                    normalize_round(big.negative, big.exp + 2, x - y)
                }
            }
        }
    }
}

impl Neg for F128 {
    type Output = F128;

    fn neg(self) -> F128 {
        let mut bytes = self.bytes;
        bytes[9] ^= 0x80;
        F128 { bytes }
    }
}

impl Sub for F128 {
    type Output = F128;

    fn sub(self, rhs: F128) -> F128 {
        if rhs.is_nan() {
            return propagate_nan(self, rhs);
        }
        self + -rhs
    }
}

impl Mul for F128 {
    type Output = F128;

    fn mul(self, rhs: F128) -> F128 {
        let (a, b) = (self.parts(), rhs.parts());
        let negative = a.negative != b.negative;
        match (a.class, b.class) {
            (Class::Nan, _) | (_, Class::Nan) => propagate_nan(self, rhs),
            (Class::Infinite, Class::Zero) | (Class::Zero, Class::Infinite) => F128::NAN,
            (Class::Infinite, _) | (_, Class::Infinite) => F128::infinity(negative),
            (Class::Zero, _) | (_, Class::Zero) => F128::zero(negative),
            (Class::Finite, Class::Finite) => {
                let product = u128::from(a.mant) * u128::from(b.mant);
                normalize_round(negative, a.exp + b.exp + 1, product)
            }
        }
    }
}

impl Div for F128 {
    type Output = F128;

    fn div(self, rhs: F128) -> F128 {
        let (a, b) = (self.parts(), rhs.parts());
        let negative = a.negative != b.negative;
        match (a.class, b.class) {
            (Class::Nan, _) | (_, Class::Nan) => propagate_nan(self, rhs),
            (Class::Infinite, Class::Infinite) | (Class::Zero, Class::Zero) => F128::NAN,
            (Class::Infinite, _) | (_, Class::Zero) => F128::infinity(negative),
            (_, Class::Infinite) | (Class::Zero, _) => F128::zero(negative),
            (Class::Finite, Class::Finite) => {
                // 64 quotient bits from the first step, 64 more from the remainder.
                let divisor = u128::from(b.mant);
                let numerator = u128::from(a.mant) << 63;
                let high = numerator / divisor;
                let rest = (numerator % divisor) << 64;
                let low = rest / divisor;
                let sticky = u128::from(rest % divisor != 0);
                normalize_round(negative, a.exp - b.exp, high << 64 | low | sticky)
            }
        }
    }
}

/// Truncated remainder (`fmod`): exact, with the sign of the dividend.
impl Rem for F128 {
    type Output = F128;

    fn rem(self, rhs: F128) -> F128 {
        let (a, b) = (self.parts(), rhs.parts());
        match (a.class, b.class) {
            (Class::Nan, _) | (_, Class::Nan) => propagate_nan(self, rhs),
            (Class::Infinite, _) | (_, Class::Zero) => F128::NAN,
            (Class::Zero, _) | (_, Class::Infinite) => self,
            (Class::Finite, Class::Finite) => {
                if a.exp < b.exp {
                    return self;
                }
                let divisor = u128::from(b.mant);
                let mut r = u128::from(a.mant) % divisor;
                let mut gap = (a.exp - b.exp) as u32;
                while gap > 0 && r != 0 {
                    let step = gap.min(64);
                    r = (r << step) % divisor;
                    gap -= step;
                }
                if r == 0 {
                    return F128::zero(a.negative);
                }
                normalize_round(a.negative, b.exp + 64, r)
            }
        }
    }
}

impl From<f64> for F128 {
    fn from(value: f64) -> Self {
        F128::from_f64(value)
    }
}

impl PartialEq for F128 {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

/// Compares sign, exponent and full mantissa. NaN is unordered; `-0 == +0`.
impl PartialOrd for F128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (a, b) = (self.parts(), other.parts());
        if a.class == Class::Nan || b.class == Class::Nan {
            return None;
        }
        if a.class == Class::Zero && b.class == Class::Zero {
            return Some(Ordering::Equal);
        }
        let magnitude = |p: &Parts| match p.class {
            Class::Zero => (0u8, 0, 0),
            Class::Finite => (1, p.exp, p.mant),
            _ => (2, 0, 0),
        };
        Some(match (a.negative, b.negative) {
            (false, false) => magnitude(&a).cmp(&magnitude(&b)),
            (true, true) => magnitude(&b).cmp(&magnitude(&a)),
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
        })
    }
}

impl fmt::Debug for F128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F128({self})")
    }
}

/// Plain decimal that reads back to the same bits where the literal syntax allows it.
impl fmt::Display for F128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.parts();
        if p.class == Class::Nan {
            return f.write_str("NaN");
        }
        if p.negative {
            f.write_str("-")?;
        }
        if p.class == Class::Infinite {
            return f.write_str("inf");
        }
        f.write_str(&self.decimal_magnitude())
    }
}
