//! Single-value properties.

use std::any::Any;

use crate::protocol::{ReadBuffer, Result, WireError, WriteBuffer};

use super::{ChangeLatch, Property, Scalar, TypeDef, ValidationError, ValueConstraints, ValueKind};

/// A BOOL, INT8, UINT8, INT32 or FLOAT32 property.
///
/// ```
/// use microproto::property::{ScalarProperty, ValueConstraints};
///
/// let mut level = ScalarProperty::new(10u8)
///     .with_constraints(ValueConstraints::new().range(10u8, 20u8));
/// assert!(level.set(5).is_err());
/// assert_eq!(level.set(12), Ok(true));
/// assert_eq!(level.set(12), Ok(false));
/// assert_eq!(level.get(), 12);
/// ```
#[derive(Debug, Clone)]
pub struct ScalarProperty<T: Scalar> {
    value: T,
    default: T,
    constraints: ValueConstraints,
    latch: ChangeLatch,
}

impl<T: Scalar> ScalarProperty<T> {
    /// Create with a default; the default is also the initial value
    #[must_use]
    pub fn new(default: T) -> Self {
        Self {
            value: default,
            default,
            constraints: ValueConstraints::new(),
            latch: ChangeLatch::default(),
        }
    }

    /// Attach value constraints
    #[must_use]
    pub fn with_constraints(mut self, constraints: ValueConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> T {
        self.value
    }

    /// Declared default
    #[must_use]
    pub fn default_value(&self) -> T {
        self.default
    }

    /// Declared constraints
    #[must_use]
    pub fn constraints(&self) -> &ValueConstraints {
        &self.constraints
    }

    /// Validate and store. `Ok(false)` when `value` is bit-equal to the
    /// current value.
    pub fn set(&mut self, value: T) -> std::result::Result<bool, ValidationError> {
        self.constraints.check(value)?;
        if value.bit_eq(self.value) {
            return Ok(false);
        }
        self.value = value;
        self.latch.raise();
        Ok(true)
    }

    /// Restore the declared default
    pub fn reset(&mut self) -> std::result::Result<bool, ValidationError> {
        self.set(self.default)
    }
}

impl<T: Scalar> Property for ScalarProperty<T> {
    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::constrained::<T>(self.constraints.clone())
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        self.value.write(out)
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        self.default.write(out)
    }

    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool> {
        let value = T::read_checked(input);
        input.status()?;
        Ok(self.set(value?)?)
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
    use crate::protocol::Error;

    #[test]
    fn test_idempotent_set_is_silent() {
        let mut prop = ScalarProperty::new(false);
        assert_eq!(prop.set(true), Ok(true));
        assert!(prop.take_change());
        assert_eq!(prop.set(true), Ok(false));
        assert!(!prop.take_change());
    }

    #[test]
    fn test_rejected_write_leaves_value() {
        let mut prop =
            ScalarProperty::new(10u8).with_constraints(ValueConstraints::new().range(10u8, 20u8));
        let mut input = ReadBuffer::new(&[5]);
        assert!(matches!(
            prop.decode_value(&mut input),
            Err(Error::Validation(ValidationError::BelowMin))
        ));
        assert_eq!(prop.get(), 10);
        assert!(!prop.take_change());
    }

    #[test]
    fn test_decode_float() {
        let mut prop = ScalarProperty::new(0.0f32);
        let bytes = 1.5f32.to_le_bytes();
        let mut input = ReadBuffer::new(&bytes);
        assert!(prop.decode_value(&mut input).unwrap());
        assert!((prop.get() - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_truncated_int32() {
        let mut prop = ScalarProperty::new(7i32);
        let mut input = ReadBuffer::new(&[1, 2]);
        assert!(matches!(prop.decode_value(&mut input), Err(Error::Wire(_))));
        assert_eq!(prop.get(), 7);
    }

    #[test]
    fn test_bool_rejects_two() {
        let mut prop = ScalarProperty::new(false);
        let mut input = ReadBuffer::new(&[2]);
        assert!(matches!(
            prop.decode_value(&mut input),
            Err(Error::Validation(ValidationError::InvalidBool { byte: 2 }))
        ));
    }

    #[test]
    fn test_negative_zero_is_a_change() {
        let mut prop = ScalarProperty::new(0.0f32);
        assert_eq!(prop.set(-0.0), Ok(true));
    }
}
