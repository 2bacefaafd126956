//! Variant properties: a discriminated union of fixed-size alternatives.

use std::any::Any;

use heapless::Vec as InlineVec;

use crate::protocol::{Error, ReadBuffer, Result, WireError, WriteBuffer};

use super::{
    ChangeLatch, Field, Property, Scalar, TypeDef, ValidationError, ValueConstraints, ValueKind,
};

/// Value is `(index, bytes)`; wire form is `u8 index` then the value in the
/// selected alternative's on-wire form.
///
/// `N` is the encoded size of the largest alternative. The initial value is
/// alternative 0 with zeroed bytes unless [`with_default`](Self::with_default)
/// picks another.
#[derive(Debug, Clone, Default)]
pub struct VariantProperty<const N: usize> {
    alternatives: Vec<Field>,
    index: u8,
    value: InlineVec<u8, N>,
    default_index: u8,
    default: InlineVec<u8, N>,
    latch: ChangeLatch,
}

fn zeroed<const N: usize>(size: usize) -> InlineVec<u8, N> {
    let mut bytes = InlineVec::new();
    // An oversized alternative keeps an empty default; writes to it fail
    let _ = bytes.resize(size, 0);
    bytes
}

impl<const N: usize> VariantProperty<N> {
    /// Variant with no alternatives
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unconstrained scalar alternative
    #[must_use]
    pub fn alternative<T: Scalar>(self, name: &'static str) -> Self {
        self.alternative_def(name, TypeDef::of::<T>())
    }

    /// Append a constrained scalar alternative
    #[must_use]
    pub fn alternative_with<T: Scalar>(self, name: &'static str, constraints: ValueConstraints) -> Self {
        self.alternative_def(name, TypeDef::constrained::<T>(constraints))
    }

    /// Append an alternative with an explicit fixed-size type
    #[must_use]
    pub fn alternative_def(mut self, name: &'static str, ty: TypeDef) -> Self {
        debug_assert!(ty.fixed_size().is_some(), "variant alternatives must be fixed-size");
        let first = self.alternatives.is_empty();
        let size = ty.fixed_size().unwrap_or(0);
        self.alternatives.push(Field::new(name, ty));
        if first {
            self.default = zeroed(size);
            self.value = self.default.clone();
        }
        self
    }

    /// Pick the default alternative and value
    #[must_use]
    pub fn with_default<T: Scalar>(mut self, index: u8, value: T) -> Self {
        let mut bytes = zeroed::<N>(T::SIZE);
        let mut out = WriteBuffer::new(&mut bytes);
        let written = value.write(&mut out);
        debug_assert!(written.is_ok());
        self.default_index = index;
        self.default.clone_from(&bytes);
        self.index = index;
        self.value = bytes;
        self
    }

    /// Declared alternatives
    #[must_use]
    pub fn alternatives(&self) -> &[Field] {
        &self.alternatives
    }

    /// Current alternative index
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Current alternative
    #[must_use]
    pub fn current(&self) -> Option<&Field> {
        self.alternatives.get(usize::from(self.index))
    }

    /// Current value bytes
    #[must_use]
    pub fn value_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Current value as `T`, when the active alternative has kind `T`
    #[must_use]
    pub fn get<T: Scalar>(&self) -> Option<T> {
        if self.current()?.ty.kind() != T::KIND {
            return None;
        }
        let mut input = ReadBuffer::new(&self.value);
        let value = T::read(&mut input);
        input.is_ok().then_some(value)
    }

    fn alternative_at(&self, index: u8) -> Result<&Field> {
        self.alternatives.get(usize::from(index)).ok_or_else(|| {
            ValidationError::UnknownAlternative {
                index,
                count: self.alternatives.len(),
            }
            .into()
        })
    }

    /// Select alternative `index` with a scalar value
    pub fn set<T: Scalar>(&mut self, index: u8, value: T) -> Result<bool> {
        let expected = self.alternative_at(index)?.ty.kind();
        if expected != T::KIND {
            return Err(Error::TypeMismatch {
                expected,
                found: T::KIND,
            });
        }
        let mut bytes = [0u8; 4];
        let mut out = WriteBuffer::new(&mut bytes);
        value.write(&mut out)?;
        self.set_raw(index, &bytes[..T::SIZE])
    }

    /// Select alternative `index` with raw on-wire bytes
    pub fn set_raw(&mut self, index: u8, bytes: &[u8]) -> Result<bool> {
        let alternative = self.alternative_at(index)?;
        let expected = alternative.ty.fixed_size().unwrap_or(0);
        if bytes.len() != expected {
            return Err(ValidationError::SizeMismatch {
                expected,
                found: bytes.len(),
            }
            .into());
        }
        alternative.ty.validate_value(&mut ReadBuffer::new(bytes))?;
        if index == self.index && bytes == self.value.as_slice() {
            return Ok(false);
        }
        let value = InlineVec::from_slice(bytes).map_err(|()| ValidationError::CapacityExceeded {
            len: bytes.len(),
            capacity: N,
        })?;
        self.index = index;
        self.value = value;
        self.latch.raise();
        Ok(true)
    }
}

impl<const N: usize> Property for VariantProperty<N> {
    fn kind(&self) -> ValueKind {
        ValueKind::Variant
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::variant(self.alternatives.clone())
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_u8(self.index)?;
        out.write_bytes(&self.value)
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_u8(self.default_index)?;
        out.write_bytes(&self.default)
    }

    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool> {
        let index = input.read_u8();
        input.status()?;
        let size = self
            .alternative_at(index)?
            .ty
            .fixed_size()
            .unwrap_or(0);
        let bytes = input.read_bytes(size);
        input.status()?;
        self.set_raw(index, bytes)
    }

    fn take_change(&mut self) -> bool {
        self.latch.take()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
