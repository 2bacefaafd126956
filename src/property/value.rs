//! Value kinds, wire tags and the typed scalar domain.

use std::cmp::Ordering;
use std::fmt;

use crate::protocol::{ReadBuffer, WireError, WriteBuffer};

use super::ValidationError;

/// Closed set of value kinds; the discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// `0` or `1`
    Bool = 0x01,
    /// Two's complement byte
    Int8 = 0x02,
    /// Unsigned byte
    UInt8 = 0x03,
    /// Little-endian `i32`
    Int32 = 0x04,
    /// Little-endian IEEE-754 `f32`
    Float32 = 0x05,
    /// Fixed number of packed elements
    Array = 0x20,
    /// `varint(count)` + packed elements
    List = 0x21,
    /// Packed fields in schema order
    Object = 0x22,
    /// `u8` alternative index + value
    Variant = 0x23,
    /// `varint(count)` + resource headers
    Resource = 0x24,
}

impl ValueKind {
    /// Convert from a wire tag
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Bool),
            0x02 => Some(Self::Int8),
            0x03 => Some(Self::UInt8),
            0x04 => Some(Self::Int32),
            0x05 => Some(Self::Float32),
            0x20 => Some(Self::Array),
            0x21 => Some(Self::List),
            0x22 => Some(Self::Object),
            0x23 => Some(Self::Variant),
            0x24 => Some(Self::Resource),
            _ => None,
        }
    }

    /// Convert to the wire tag
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// On-wire size of a scalar kind; `None` for composite kinds
    #[must_use]
    pub const fn scalar_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => Some(1),
            Self::Int32 | Self::Float32 => Some(4),
            _ => None,
        }
    }

    /// Whether this is one of the five scalar kinds
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        self.scalar_size().is_some()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "BOOL",
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int32 => "INT32",
            Self::Float32 => "FLOAT32",
            Self::Array => "ARRAY",
            Self::List => "LIST",
            Self::Object => "OBJECT",
            Self::Variant => "VARIANT",
            Self::Resource => "RESOURCE",
        };
        write!(f, "{name}")
    }
}

/// A scalar value tagged with its kind.
///
/// Equality is bit-equality, so `NaN == NaN` when the payloads match and
/// `0.0 != -0.0`.
#[derive(Debug, Clone, Copy)]
pub enum ScalarValue {
    /// BOOL
    Bool(bool),
    /// INT8
    Int8(i8),
    /// UINT8
    UInt8(u8),
    /// INT32
    Int32(i32),
    /// FLOAT32
    Float32(f32),
}

impl ScalarValue {
    /// Kind of the carried value
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int8(_) => ValueKind::Int8,
            Self::UInt8(_) => ValueKind::UInt8,
            Self::Int32(_) => ValueKind::Int32,
            Self::Float32(_) => ValueKind::Float32,
        }
    }

    /// Write the value in its on-wire form
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        match *self {
            Self::Bool(v) => out.write_bool(v),
            Self::Int8(v) => out.write_i8(v),
            Self::UInt8(v) => out.write_u8(v),
            Self::Int32(v) => out.write_i32_le(v),
            Self::Float32(v) => out.write_f32_le(v),
        }
    }

    /// Read a value of `kind`; `None` when `kind` is not scalar.
    ///
    /// Cursor errors are latched on `input` and yield a zero value.
    pub fn decode(kind: ValueKind, input: &mut ReadBuffer<'_>) -> Option<Self> {
        Some(match kind {
            ValueKind::Bool => Self::Bool(input.read_bool()),
            ValueKind::Int8 => Self::Int8(input.read_i8()),
            ValueKind::UInt8 => Self::UInt8(input.read_u8()),
            ValueKind::Int32 => Self::Int32(input.read_i32_le()),
            ValueKind::Float32 => Self::Float32(input.read_f32_le()),
            _ => return None,
        })
    }

    /// Read a value of `kind`, rejecting non-canonical encodings.
    pub fn decode_checked(
        kind: ValueKind,
        input: &mut ReadBuffer<'_>,
    ) -> Result<Self, ValidationError> {
        if kind == ValueKind::Bool {
            return bool::read_checked(input).map(Self::Bool);
        }
        Self::decode(kind, input).ok_or(ValidationError::NotScalar { kind })
    }

    /// Compare two values of the same kind in their typed domain
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (*self, *other) {
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(&b),
            (Self::Int8(a), Self::Int8(b)) => a.partial_cmp(&b),
            (Self::UInt8(a), Self::UInt8(b)) => a.partial_cmp(&b),
            (Self::Int32(a), Self::Int32(b)) => a.partial_cmp(&b),
            (Self::Float32(a), Self::Float32(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }

    /// Integer view used for step checks
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int8(v) => Some(v as i64),
            Self::UInt8(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::Bool(_) | Self::Float32(_) => None,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int8(a), Self::Int8(b)) => a == b,
            (Self::UInt8(a), Self::UInt8(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Float32(a), Self::Float32(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for i8 {}
    impl Sealed for u8 {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
}

/// Native Rust types that map onto a scalar wire kind.
pub trait Scalar:
    sealed::Sealed + Copy + Default + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    /// Wire kind of this type
    const KIND: ValueKind;
    /// On-wire size in bytes
    const SIZE: usize;

    /// Tag the value with its kind
    fn into_value(self) -> ScalarValue;

    /// Extract from a tagged value of the same kind
    fn from_value(value: ScalarValue) -> Option<Self>;

    /// Write in on-wire form
    fn write(self, out: &mut WriteBuffer<'_>) -> Result<(), WireError>;

    /// Read in on-wire form; zero on cursor error
    fn read(input: &mut ReadBuffer<'_>) -> Self;

    /// Read, rejecting encodings that would not re-encode byte-equal
    fn read_checked(input: &mut ReadBuffer<'_>) -> Result<Self, ValidationError> {
        Ok(Self::read(input))
    }

    /// Bit-equality
    fn bit_eq(self, other: Self) -> bool {
        self.into_value() == other.into_value()
    }
}

macro_rules! impl_scalar {
    ($ty:ty, $kind:ident, $size:expr, $write:ident, $read:ident) => {
        impl Scalar for $ty {
            const KIND: ValueKind = ValueKind::$kind;
            const SIZE: usize = $size;

            fn into_value(self) -> ScalarValue {
                ScalarValue::$kind(self)
            }

            fn from_value(value: ScalarValue) -> Option<Self> {
                match value {
                    ScalarValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn write(self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
                out.$write(self)
            }

            fn read(input: &mut ReadBuffer<'_>) -> Self {
                input.$read()
            }
        }

        impl From<$ty> for ScalarValue {
            fn from(value: $ty) -> Self {
                ScalarValue::$kind(value)
            }
        }
    };
}

impl_scalar!(i8, Int8, 1, write_i8, read_i8);
impl_scalar!(u8, UInt8, 1, write_u8, read_u8);
impl_scalar!(i32, Int32, 4, write_i32_le, read_i32_le);
impl_scalar!(f32, Float32, 4, write_f32_le, read_f32_le);

impl Scalar for bool {
    const KIND: ValueKind = ValueKind::Bool;
    const SIZE: usize = 1;

    fn into_value(self) -> ScalarValue {
        ScalarValue::Bool(self)
    }

    fn from_value(value: ScalarValue) -> Option<Self> {
        match value {
            ScalarValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn write(self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        out.write_bool(self)
    }

    fn read(input: &mut ReadBuffer<'_>) -> Self {
        input.read_bool()
    }

    fn read_checked(input: &mut ReadBuffer<'_>) -> Result<Self, ValidationError> {
        match input.read_u8() {
            0 => Ok(false),
            1 => Ok(true),
            byte => Err(ValidationError::InvalidBool { byte }),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}
