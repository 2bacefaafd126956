//! Bounded list properties.

use std::any::Any;

use heapless::Vec as InlineVec;

use crate::protocol::{Error, ReadBuffer, Result, WireError, WriteBuffer};

use super::{
    ChangeLatch, ContainerConstraints, Property, Scalar, TypeDef, ValidationError,
    ValueConstraints, ValueKind,
};

/// Up to `MAX` elements of `T` stored inline, with an active count.
///
/// Every mutator validates the whole candidate list (capacity, container
/// shape, element constraints) before committing, so a rejected call leaves
/// the list untouched.
#[derive(Debug, Clone)]
pub struct ListProperty<T: Scalar, const MAX: usize> {
    items: InlineVec<T, MAX>,
    default: InlineVec<T, MAX>,
    constraints: ContainerConstraints,
    element: ValueConstraints,
    latch: ChangeLatch,
}

impl<T: Scalar, const MAX: usize> Default for ListProperty<T, MAX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, const MAX: usize> ListProperty<T, MAX> {
    /// Empty list with an empty default
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: InlineVec::new(),
            default: InlineVec::new(),
            constraints: ContainerConstraints::new(),
            element: ValueConstraints::new(),
            latch: ChangeLatch::default(),
        }
    }

    /// Set the default (and initial) contents; excess elements are dropped
    #[must_use]
    pub fn with_default(mut self, items: &[T]) -> Self {
        debug_assert!(items.len() <= MAX, "default exceeds list capacity");
        self.default = items.iter().take(MAX).copied().collect();
        self.items = self.default.clone();
        self
    }

    /// Attach container constraints
    #[must_use]
    pub fn with_constraints(mut self, constraints: ContainerConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Attach constraints applied to each element
    #[must_use]
    pub fn with_element_constraints(mut self, constraints: ValueConstraints) -> Self {
        self.element = constraints;
        self
    }

    /// Active elements
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Element at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).copied()
    }

    /// Active count
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when the list has no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Storage capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        MAX
    }

    /// Check a candidate list without storing it
    pub fn validate(&self, candidate: &[T]) -> std::result::Result<(), ValidationError> {
        if candidate.len() > MAX {
            return Err(ValidationError::CapacityExceeded {
                len: candidate.len(),
                capacity: MAX,
            });
        }
        self.constraints.validate(candidate)?;
        candidate.iter().try_for_each(|v| self.element.check(*v))
    }

    /// Replace the contents with `items`
    pub fn assign(&mut self, items: &[T]) -> std::result::Result<bool, ValidationError> {
        self.validate(items)?;
        if items.len() == self.items.len() && items.iter().zip(&self.items).all(|(a, b)| a.bit_eq(*b))
        {
            return Ok(false);
        }
        self.items = items.iter().copied().collect();
        self.latch.raise();
        Ok(true)
    }

    /// Append one element
    pub fn push(&mut self, value: T) -> std::result::Result<bool, ValidationError> {
        let mut candidate = self.items.clone();
        candidate.push(value).map_err(|_| ValidationError::CapacityExceeded {
            len: MAX + 1,
            capacity: MAX,
        })?;
        self.assign(&candidate)
    }

    /// Remove and return the last element
    pub fn pop(&mut self) -> std::result::Result<Option<T>, ValidationError> {
        let Some((last, rest)) = self.items.split_last() else {
            return Ok(None);
        };
        let last = *last;
        let rest: InlineVec<T, MAX> = rest.iter().copied().collect();
        self.assign(&rest)?;
        Ok(Some(last))
    }

    /// Remove every element
    pub fn clear(&mut self) -> std::result::Result<bool, ValidationError> {
        self.assign(&[])
    }

    /// Grow with `fill` or shrink to `len`
    pub fn resize(&mut self, len: usize, fill: T) -> std::result::Result<bool, ValidationError> {
        if len > MAX {
            return Err(ValidationError::CapacityExceeded { len, capacity: MAX });
        }
        let mut candidate = self.items.clone();
        candidate.truncate(len);
        while candidate.len() < len {
            // capacity checked above
            let _ = candidate.push(fill);
        }
        self.assign(&candidate)
    }

    /// Replace the element at `index`
    pub fn set(&mut self, index: usize, value: T) -> Result<bool> {
        let mut candidate = self.items.clone();
        let len = candidate.len();
        let slot = candidate
            .get_mut(index)
            .ok_or(Error::OutOfRange { index, len })?;
        *slot = value;
        Ok(self.assign(&candidate)?)
    }

    fn write_items(items: &[T], out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_varint(items.len() as u32)?;
        items.iter().try_for_each(|v| v.write(out))
    }
}

/// String mode for byte lists.
impl<const MAX: usize> ListProperty<u8, MAX> {
    /// Contents up to the first NUL, when valid UTF-8
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        let end = self.items.iter().position(|&b| b == 0).unwrap_or(self.items.len());
        std::str::from_utf8(&self.items[..end]).ok()
    }

    /// Store `text` up to its first NUL
    pub fn set_str(&mut self, text: &str) -> std::result::Result<bool, ValidationError> {
        let bytes = text.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.assign(&bytes[..end])
    }

    /// Copy the string into `buf` with a NUL terminator, truncating to fit.
    /// Returns the string length written, excluding the terminator.
    pub fn copy_str_into(&self, buf: &mut [u8]) -> usize {
        let Some(room) = buf.len().checked_sub(1) else {
            return 0;
        };
        let end = self.items.iter().position(|&b| b == 0).unwrap_or(self.items.len());
        let len = end.min(room);
        buf[..len].copy_from_slice(&self.items[..len]);
        buf[len] = 0;
        len
    }
}

impl<T: Scalar, const MAX: usize> Property for ListProperty<T, MAX> {
    fn kind(&self) -> ValueKind {
        ValueKind::List
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::list(
            self.constraints,
            TypeDef::constrained::<T>(self.element.clone()),
        )
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        Self::write_items(&self.items, out)
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        Self::write_items(&self.default, out)
    }

    /// A count above `MAX` keeps the first `MAX` elements and skips the rest.
    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool> {
        let count = input.read_varint() as usize;
        input.status()?;
        let kept = count.min(MAX);
        let mut candidate: InlineVec<T, MAX> = InlineVec::new();
        for _ in 0..kept {
            let value = T::read_checked(input);
            input.status()?;
            let _ = candidate.push(value?);
        }
        input.skip((count - kept).saturating_mul(T::SIZE));
        input.status()?;
        Ok(self.assign(&candidate)?)
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

    fn encoded<T: Scalar, const MAX: usize>(list: &ListProperty<T, MAX>) -> Vec<u8> {
        let mut storage = [0u8; 256];
        let mut out = WriteBuffer::new(&mut storage);
        list.encode_value(&mut out).unwrap();
        out.written().to_vec()
    }

    #[test]
    fn test_push_pop() {
        let mut list: ListProperty<u8, 3> = ListProperty::new();
        assert_eq!(list.push(1), Ok(true));
        assert_eq!(list.push(2), Ok(true));
        assert_eq!(list.push(3), Ok(true));
        assert!(matches!(
            list.push(4),
            Err(ValidationError::CapacityExceeded { capacity: 3, .. })
        ));
        assert_eq!(list.pop(), Ok(Some(3)));
        assert_eq!(list.as_slice(), &[1, 2]);
        assert_eq!(encoded(&list), vec![2, 1, 2]);
    }

    #[test]
    fn test_rejected_push_is_atomic() {
        let mut list: ListProperty<i32, 8> = ListProperty::new()
            .with_default(&[1, 2])
            .with_constraints(ContainerConstraints::new().sorted());
        assert!(list.push(0).is_err());
        assert_eq!(list.as_slice(), &[1, 2]);
        assert!(!list.take_change());
    }

    #[test]
    fn test_min_len_blocks_pop() {
        let mut list: ListProperty<u8, 4> = ListProperty::new()
            .with_default(&[7])
            .with_constraints(ContainerConstraints::new().min_len(1));
        assert!(list.pop().is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_decode_truncates_to_capacity() {
        let mut list: ListProperty<u8, 2> = ListProperty::new();
        let mut input = ReadBuffer::new(&[4, 10, 20, 30, 40]);
        assert!(list.decode_value(&mut input).unwrap());
        assert_eq!(list.as_slice(), &[10, 20]);
        assert!(input.is_empty());
    }

    #[test]
    fn test_decode_same_value_is_silent() {
        let mut list: ListProperty<u8, 4> = ListProperty::new().with_default(&[1, 2]);
        let mut input = ReadBuffer::new(&[2, 1, 2]);
        assert!(!list.decode_value(&mut input).unwrap());
        assert!(!list.take_change());
    }

    #[test]
    fn test_resize_and_set() {
        let mut list: ListProperty<i8, 4> = ListProperty::new();
        list.resize(3, -1).unwrap();
        assert_eq!(list.as_slice(), &[-1, -1, -1]);
        list.set(1, 5).unwrap();
        assert_eq!(list.as_slice(), &[-1, 5, -1]);
        assert!(list.set(3, 0).is_err());
        list.resize(1, 0).unwrap();
        assert_eq!(list.as_slice(), &[-1]);
        assert!(list.resize(5, 0).is_err());
    }

    #[test]
    fn test_string_mode() {
        let mut name: ListProperty<u8, 16> = ListProperty::new();
        name.set_str("rainbow").unwrap();
        assert_eq!(name.as_str(), Some("rainbow"));

        let mut buf = [0xAAu8; 5];
        assert_eq!(name.copy_str_into(&mut buf), 4);
        assert_eq!(&buf, b"rain\0");

        name.set_str("ab\0cd").unwrap();
        assert_eq!(name.as_str(), Some("ab"));
        assert_eq!(name.len(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_valid_encoding_roundtrips(items in proptest::collection::vec(any::<i32>(), 0..=8)) {
                let mut bytes = Vec::new();
                bytes.push(items.len() as u8);
                for item in &items {
                    bytes.extend_from_slice(&item.to_le_bytes());
                }

                let mut list: ListProperty<i32, 8> = ListProperty::new();
                let mut input = ReadBuffer::new(&bytes);
                list.decode_value(&mut input).unwrap();
                prop_assert!(input.is_empty());
                prop_assert_eq!(list.as_slice(), items.as_slice());
                prop_assert_eq!(encoded(&list), bytes);
            }
        }
    }
}
