//! Object properties: fixed-size fields packed in declaration order.

use std::any::Any;

use crate::protocol::{Error, ReadBuffer, Result, WireError, WriteBuffer};

use super::{
    ChangeLatch, Field, Property, Scalar, TypeDef, ValidationError, ValueConstraints, ValueKind,
};

/// A struct-like property.
///
/// Fields are scalars or fixed arrays, so every field sits at a fixed
/// offset in the packed value.
///
/// ```
/// use microproto::property::ObjectProperty;
///
/// let mut segment = ObjectProperty::new()
///     .field("start", 0u8)
///     .field("length", 30u8)
///     .array_field("color", [255u8, 0, 0]);
/// assert_eq!(segment.get::<u8>("length"), Some(30));
/// assert!(segment.set("start", 4u8).unwrap());
/// assert_eq!(segment.as_bytes(), &[4, 30, 255, 0, 0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ObjectProperty {
    fields: Vec<Field>,
    value: Vec<u8>,
    default: Vec<u8>,
    latch: ChangeLatch,
}

impl ObjectProperty {
    /// Object with no fields
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unconstrained scalar field
    #[must_use]
    pub fn field<T: Scalar>(self, name: &'static str, default: T) -> Self {
        self.field_with(name, default, ValueConstraints::new())
    }

    /// Append a constrained scalar field
    #[must_use]
    pub fn field_with<T: Scalar>(
        mut self,
        name: &'static str,
        default: T,
        constraints: ValueConstraints,
    ) -> Self {
        self.fields
            .push(Field::new(name, TypeDef::constrained::<T>(constraints)));
        self.append_default(|out| default.write(out));
        self
    }

    /// Append a fixed array field
    #[must_use]
    pub fn array_field<T: Scalar, const N: usize>(mut self, name: &'static str, default: [T; N]) -> Self {
        self.fields
            .push(Field::new(name, TypeDef::array(N as u32, TypeDef::of::<T>())));
        self.append_default(|out| default.iter().try_for_each(|v| v.write(out)));
        self
    }

    fn append_default(
        &mut self,
        write: impl FnOnce(&mut WriteBuffer<'_>) -> std::result::Result<(), WireError>,
    ) {
        let start = self.default.len();
        let size = self
            .fields
            .last()
            .and_then(|f| f.ty.fixed_size())
            .unwrap_or(0);
        self.default.resize(start + size, 0);
        let mut out = WriteBuffer::new(&mut self.default[start..]);
        let written = write(&mut out);
        debug_assert!(written.is_ok(), "field default does not fit its declared size");
        self.value.clone_from(&self.default);
    }

    /// Declared fields
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Packed current value
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    fn locate(&self, name: &str) -> Option<(usize, &Field)> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some((offset, field));
            }
            offset += field.ty.fixed_size().unwrap_or(0);
        }
        None
    }

    /// Read a scalar field; `None` for unknown names or a kind mismatch
    #[must_use]
    pub fn get<T: Scalar>(&self, name: &str) -> Option<T> {
        let (offset, field) = self.locate(name)?;
        if field.ty.kind() != T::KIND {
            return None;
        }
        let mut input = ReadBuffer::new(self.value.get(offset..offset + T::SIZE)?);
        Some(T::read(&mut input))
    }

    /// Read an array field
    #[must_use]
    pub fn get_array<T: Scalar, const N: usize>(&self, name: &str) -> Option<[T; N]> {
        let (offset, field) = self.locate(name)?;
        match &field.ty {
            TypeDef::Array { len, element } if *len as usize == N && element.kind() == T::KIND => {}
            _ => return None,
        }
        let mut input = ReadBuffer::new(self.value.get(offset..offset + N * T::SIZE)?);
        let mut out = [T::default(); N];
        for slot in &mut out {
            *slot = T::read(&mut input);
        }
        Some(out)
    }

    /// Write a scalar field
    pub fn set<T: Scalar>(&mut self, name: &str, value: T) -> Result<bool> {
        let (offset, field) = self.locate(name).ok_or(ValidationError::UnknownField)?;
        if field.ty.kind() != T::KIND {
            return Err(Error::TypeMismatch {
                expected: field.ty.kind(),
                found: T::KIND,
            });
        }
        let mut candidate = self.value.clone();
        let mut out = WriteBuffer::new(&mut candidate[offset..]);
        value.write(&mut out)?;
        self.set_bytes(&candidate)
    }

    /// Write an array field
    pub fn set_array<T: Scalar, const N: usize>(&mut self, name: &str, value: [T; N]) -> Result<bool> {
        let (offset, field) = self.locate(name).ok_or(ValidationError::UnknownField)?;
        if field.ty.fixed_size() != Some(N * T::SIZE) {
            return Err(ValidationError::SizeMismatch {
                expected: field.ty.fixed_size().unwrap_or(0),
                found: N * T::SIZE,
            }
            .into());
        }
        let mut candidate = self.value.clone();
        let mut out = WriteBuffer::new(&mut candidate[offset..]);
        value.iter().try_for_each(|v| v.write(&mut out))?;
        self.set_bytes(&candidate)
    }

    /// Replace the whole packed value
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<bool> {
        if bytes.len() != self.value.len() {
            return Err(ValidationError::SizeMismatch {
                expected: self.value.len(),
                found: bytes.len(),
            }
            .into());
        }
        let mut input = ReadBuffer::new(bytes);
        for field in &self.fields {
            field.ty.validate_value(&mut input)?;
        }
        if bytes == self.value.as_slice() {
            return Ok(false);
        }
        self.value.clear();
        self.value.extend_from_slice(bytes);
        self.latch.raise();
        Ok(true)
    }
}

impl Property for ObjectProperty {
    fn kind(&self) -> ValueKind {
        ValueKind::Object
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::object(self.fields.clone())
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_bytes(&self.value)
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_bytes(&self.default)
    }

    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool> {
        let bytes = input.read_bytes(self.value.len());
        input.status()?;
        self.set_bytes(bytes)
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

    fn segment() -> ObjectProperty {
        ObjectProperty::new()
            .field_with("start", 0i32, ValueConstraints::new().min(0i32))
            .field("enabled", true)
            .array_field("color", [0u8, 0, 255])
    }

    #[test]
    fn test_packed_layout() {
        let obj = segment();
        assert_eq!(obj.as_bytes(), &[0, 0, 0, 0, 1, 0, 0, 255]);
        assert_eq!(obj.type_def().fixed_size(), Some(8));
        assert_eq!(obj.get::<bool>("enabled"), Some(true));
        assert_eq!(obj.get_array::<u8, 3>("color"), Some([0, 0, 255]));
        assert_eq!(obj.get::<u8>("enabled"), None);
        assert_eq!(obj.get::<u8>("missing"), None);
    }

    #[test]
    fn test_field_constraint_rejected() {
        let mut obj = segment();
        assert!(matches!(
            obj.set("start", -4i32),
            Err(Error::Validation(ValidationError::BelowMin))
        ));
        assert_eq!(obj.get::<i32>("start"), Some(0));
        assert!(!obj.take_change());
    }

    #[test]
    fn test_kind_checked_on_set() {
        let mut obj = segment();
        assert!(matches!(
            obj.set("enabled", 1u8),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            obj.set("nope", 1u8),
            Err(Error::Validation(ValidationError::UnknownField))
        ));
    }

    #[test]
    fn test_decode_value() {
        let mut obj = segment();
        let mut input = ReadBuffer::new(&[10, 0, 0, 0, 0, 1, 2, 3]);
        assert!(obj.decode_value(&mut input).unwrap());
        assert_eq!(obj.get::<i32>("start"), Some(10));
        assert_eq!(obj.get::<bool>("enabled"), Some(false));

        let mut bad_bool = ReadBuffer::new(&[10, 0, 0, 0, 7, 1, 2, 3]);
        assert!(obj.decode_value(&mut bad_bool).is_err());
        assert_eq!(obj.get_array::<u8, 3>("color"), Some([1, 2, 3]));
    }

    #[test]
    fn test_set_array() {
        let mut obj = segment();
        assert!(obj.set_array("color", [9u8, 9, 9]).unwrap());
        assert!(obj.set_array("color", [9u8, 9]).is_err());
        assert_eq!(obj.get_array::<u8, 3>("color"), Some([9, 9, 9]));
    }
}
