use crate::virtual_machine::isa::Kind;
use crate::virtual_machine::vm::extended::F128;
use std::fmt;

/// A tagged value, as held by a local slot or decoded from an immediate.
///
/// The stack itself is untyped bytes; values only carry a kind once they land
/// in a local or are read back as an instruction operand.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Value {
    /// Empty slot.
    #[default]
    None,
    I8(i8),
    U8(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    I64(i64),
    U64(u64),
    F64(f64),
    I128(i128),
    U128(u128),
    F128(F128),
}

/// Copies the first `N` bytes of `bytes`.
///
/// Panics if `bytes` is shorter than `N`; callers slice by [`Kind::size`].
pub(crate) fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl Value {
    /// Kind tag, or `None` for an empty slot.
    pub fn kind(&self) -> Option<Kind> {
        Some(match self {
            Value::None => return None,
            Value::I8(_) => Kind::I8,
            Value::U8(_) => Kind::U8,
            Value::Bool(_) => Kind::Bool,
            Value::I16(_) => Kind::I16,
            Value::U16(_) => Kind::U16,
            Value::I32(_) => Kind::I32,
            Value::U32(_) => Kind::U32,
            Value::F32(_) => Kind::F32,
            Value::I64(_) => Kind::I64,
            Value::U64(_) => Kind::U64,
            Value::F64(_) => Kind::F64,
            Value::I128(_) => Kind::I128,
            Value::U128(_) => Kind::U128,
            Value::F128(_) => Kind::F128,
        })
    }

    /// Returns the type name for error messages.
    pub fn type_name(&self) -> &'static str {
        self.kind().map_or("none", Kind::name)
    }

    /// Re-tags the first `kind.size()` bytes of `bytes` as `kind`.
    ///
    /// Any non-zero byte reads as `true` for [`Kind::Bool`].
    pub fn from_le_bytes(kind: Kind, bytes: &[u8]) -> Value {
        match kind {
            Kind::I8 => Value::I8(i8::from_le_bytes(le(bytes))),
            Kind::U8 => Value::U8(bytes[0]),
            Kind::Bool => Value::Bool(bytes[0] != 0),
            Kind::I16 => Value::I16(i16::from_le_bytes(le(bytes))),
            Kind::U16 => Value::U16(u16::from_le_bytes(le(bytes))),
            Kind::I32 => Value::I32(i32::from_le_bytes(le(bytes))),
            Kind::U32 => Value::U32(u32::from_le_bytes(le(bytes))),
            Kind::F32 => Value::F32(f32::from_le_bytes(le(bytes))),
            Kind::I64 => Value::I64(i64::from_le_bytes(le(bytes))),
            Kind::U64 => Value::U64(u64::from_le_bytes(le(bytes))),
            Kind::F64 => Value::F64(f64::from_le_bytes(le(bytes))),
            Kind::I128 => Value::I128(i128::from_le_bytes(le(bytes))),
            Kind::U128 => Value::U128(u128::from_le_bytes(le(bytes))),
            Kind::F128 => Value::F128(F128::from_le_bytes(le(bytes))),
        }
    }

    /// Little-endian encoding in a fixed buffer, plus the number of bytes used.
    pub fn encode(&self) -> ([u8; 16], usize) {
        let mut out = [0u8; 16];
        let len = {
            let mut put = |bytes: &[u8]| {
                out[..bytes.len()].copy_from_slice(bytes);
                bytes.len()
            };
            match *self {
                Value::None => 0,
                Value::I8(v) => put(&v.to_le_bytes()),
                Value::U8(v) => put(&[v]),
                Value::Bool(v) => put(&[v as u8]),
                Value::I16(v) => put(&v.to_le_bytes()),
                Value::U16(v) => put(&v.to_le_bytes()),
                Value::I32(v) => put(&v.to_le_bytes()),
                Value::U32(v) => put(&v.to_le_bytes()),
                Value::F32(v) => put(&v.to_le_bytes()),
                Value::I64(v) => put(&v.to_le_bytes()),
                Value::U64(v) => put(&v.to_le_bytes()),
                Value::F64(v) => put(&v.to_le_bytes()),
                Value::I128(v) => put(&v.to_le_bytes()),
                Value::U128(v) => put(&v.to_le_bytes()),
                Value::F128(v) => put(&v.to_le_bytes()),
            }
        };
        (out, len)
    }

    /// Reads an index-like operand (`u8` immediates).
    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }

    /// Reads a signal or debug code (`i8` immediates).
    pub fn as_i8(&self) -> Option<i8> {
        match *self {
            Value::I8(v) => Some(v),
            _ => None,
        }
    }

    /// Reads an address operand (`u64` immediates).
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U64(v) => Some(v),
            _ => None,
        }
    }
}

/// Formats the bare number so it reads back through the assembler; `bool` prints as `0`/`1`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::I8(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{}", *v as u8),
            Value::I16(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::I128(v) => write!(f, "{v}"),
            Value::U128(v) => write!(f, "{v}"),
            Value::F128(v) => write!(f, "{v}"),
        }
    }
}
