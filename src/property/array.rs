//! Fixed-length array properties.

use std::any::Any;

use crate::protocol::{Error, ReadBuffer, Result, WireError, WriteBuffer};

use super::{ChangeLatch, Property, Scalar, TypeDef, ValidationError, ValueConstraints, ValueKind};

/// `N` packed elements of `T`; only element constraints apply.
#[derive(Debug, Clone)]
pub struct ArrayProperty<T: Scalar, const N: usize> {
    value: [T; N],
    default: [T; N],
    element: ValueConstraints,
    latch: ChangeLatch,
}

impl<T: Scalar, const N: usize> ArrayProperty<T, N> {
    /// Create with a default
    #[must_use]
    pub fn new(default: [T; N]) -> Self {
        Self {
            value: default,
            default,
            element: ValueConstraints::new(),
            latch: ChangeLatch::default(),
        }
    }

    /// Constraints applied to every element
    #[must_use]
    pub fn with_element_constraints(mut self, constraints: ValueConstraints) -> Self {
        self.element = constraints;
        self
    }

    /// Current elements
    #[must_use]
    pub const fn get(&self) -> &[T; N] {
        &self.value
    }

    /// One element
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<T> {
        self.value.get(index).copied()
    }

    /// Element count
    #[must_use]
    pub const fn len(&self) -> usize {
        N
    }

    /// `true` for zero-length arrays
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    fn validate(&self, candidate: &[T; N]) -> std::result::Result<(), ValidationError> {
        candidate.iter().try_for_each(|v| self.element.check(*v))
    }

    /// Replace every element
    pub fn set(&mut self, value: [T; N]) -> std::result::Result<bool, ValidationError> {
        self.validate(&value)?;
        if value.iter().zip(&self.value).all(|(a, b)| a.bit_eq(*b)) {
            return Ok(false);
        }
        self.value = value;
        self.latch.raise();
        Ok(true)
    }

    /// Replace one element
    pub fn set_at(&mut self, index: usize, value: T) -> Result<bool> {
        let mut candidate = self.value;
        let slot = candidate
            .get_mut(index)
            .ok_or(Error::OutOfRange { index, len: N })?;
        *slot = value;
        Ok(self.set(candidate)?)
    }
}

impl<T: Scalar, const N: usize> Property for ArrayProperty<T, N> {
    fn kind(&self) -> ValueKind {
        ValueKind::Array
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::array(N as u32, TypeDef::constrained::<T>(self.element.clone()))
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        self.value.iter().try_for_each(|v| v.write(out))
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        self.default.iter().try_for_each(|v| v.write(out))
    }

    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool> {
        let mut candidate = [T::default(); N];
        for slot in &mut candidate {
            let value = T::read_checked(input);
            input.status()?;
            *slot = value?;
        }
        Ok(self.set(candidate)?)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_decode_and_reencode() {
        let mut rgb = ArrayProperty::new([0u8; 3]);
        let mut input = ReadBuffer::new(&[0xFF, 0x80, 0x40]);
        assert!(rgb.decode_value(&mut input).unwrap());
        assert_eq!(rgb.get(), &[255, 128, 64]);

        let mut storage = [0u8; 3];
        let mut out = WriteBuffer::new(&mut storage);
        rgb.encode_value(&mut out).unwrap();
        assert_eq!(out.written(), &[0xFF, 0x80, 0x40]);
    }

    #[test]
    fn test_element_constraints() {
        let mut arr =
            ArrayProperty::new([1i8; 2]).with_element_constraints(ValueConstraints::new().min(0i8));
        assert!(arr.set([0, -1]).is_err());
        assert_eq!(arr.get(), &[1, 1]);
        assert_eq!(arr.set_at(1, 5).unwrap(), true);
        assert_eq!(arr.get(), &[1, 5]);
    }

    #[test]
    fn test_set_at_out_of_range() {
        let mut arr = ArrayProperty::new([0u8; 3]);
        assert!(matches!(
            arr.set_at(3, 1),
            Err(Error::OutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_truncated_decode_is_atomic() {
        let mut arr = ArrayProperty::new([9i32; 2]);
        let mut input = ReadBuffer::new(&[1, 0, 0, 0, 2]);
        assert!(arr.decode_value(&mut input).is_err());
        assert_eq!(arr.get(), &[9, 9]);
    }
}
