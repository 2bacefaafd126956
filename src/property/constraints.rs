//! Value and container constraints.
//!
//! Validation is pure: it inspects a candidate value and either accepts it
//! or names the first violated rule.

use std::cmp::Ordering;

use heapless::Vec as InlineVec;
use thiserror::Error;

use crate::protocol::{ReadBuffer, WireError, WriteBuffer};

use super::value::{Scalar, ScalarValue, ValueKind};

/// Maximum number of entries in an allow-list.
pub const MAX_ONE_OF: usize = 16;

/// Reasons a candidate value is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    /// Value is below the declared minimum
    #[error("value below minimum")]
    BelowMin,

    /// Value is above the declared maximum
    #[error("value above maximum")]
    AboveMax,

    /// `(value - min)` is not a multiple of the step
    #[error("value is not on the declared step")]
    OffStep,

    /// Value is not in the allow-list
    #[error("value not in allow-list")]
    NotAllowed,

    /// BOOL byte other than 0 or 1
    #[error("invalid BOOL byte {byte:#04x}")]
    InvalidBool {
        /// Received byte
        byte: u8,
    },

    /// Composite kind used where a scalar is required
    #[error("{kind} is not a scalar kind")]
    NotScalar {
        /// Offending kind
        kind: ValueKind,
    },

    /// Value kind disagrees with the declared kind
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        /// Declared kind
        expected: ValueKind,
        /// Supplied kind
        found: ValueKind,
    },

    /// List shorter than `min_len`
    #[error("length {len} below minimum {min}")]
    TooShort {
        /// Candidate length
        len: usize,
        /// Declared minimum
        min: u32,
    },

    /// List longer than `max_len`
    #[error("length {len} above maximum {max}")]
    TooLong {
        /// Candidate length
        len: usize,
        /// Declared maximum
        max: u32,
    },

    /// List longer than its storage capacity
    #[error("length {len} exceeds capacity {capacity}")]
    CapacityExceeded {
        /// Candidate length
        len: usize,
        /// Storage capacity
        capacity: usize,
    },

    /// Element repeats an earlier one in a `unique` list
    #[error("duplicate element at index {index}")]
    Duplicate {
        /// Index of the repeat
        index: usize,
    },

    /// Ascending order broken
    #[error("element {index} breaks ascending order")]
    NotSorted {
        /// Index of the out-of-order element
        index: usize,
    },

    /// Descending order broken
    #[error("element {index} breaks descending order")]
    NotReverseSorted {
        /// Index of the out-of-order element
        index: usize,
    },

    /// Variant index outside the alternative list
    #[error("alternative {index} out of {count}")]
    UnknownAlternative {
        /// Requested index
        index: u8,
        /// Alternative count
        count: usize,
    },

    /// Encoded value size does not match the declared size
    #[error("expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// Declared size
        expected: usize,
        /// Supplied size
        found: usize,
    },

    /// Object has no field with the requested name
    #[error("no such field")]
    UnknownField,
}

const HAS_MIN: u8 = 1 << 0;
const HAS_MAX: u8 = 1 << 1;
const HAS_STEP: u8 = 1 << 2;
const HAS_ONE_OF: u8 = 1 << 3;

/// Constraints on a scalar value or on each element of a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueConstraints {
    min: Option<ScalarValue>,
    max: Option<ScalarValue>,
    step: Option<ScalarValue>,
    one_of: InlineVec<ScalarValue, MAX_ONE_OF>,
}

impl ValueConstraints {
    /// No constraints
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive lower bound
    #[must_use]
    pub fn min<T: Scalar>(mut self, value: T) -> Self {
        self.min = Some(value.into_value());
        self
    }

    /// Inclusive upper bound
    #[must_use]
    pub fn max<T: Scalar>(mut self, value: T) -> Self {
        self.max = Some(value.into_value());
        self
    }

    /// Inclusive bounds
    #[must_use]
    pub fn range<T: Scalar>(self, min: T, max: T) -> Self {
        self.min(min).max(max)
    }

    /// Values must sit on `min + k * step`
    #[must_use]
    pub fn step<T: Scalar>(mut self, value: T) -> Self {
        self.step = Some(value.into_value());
        self
    }

    /// Enumerated allow-list; entries past [`MAX_ONE_OF`] are ignored
    #[must_use]
    pub fn one_of<T: Scalar>(mut self, values: &[T]) -> Self {
        debug_assert!(values.len() <= MAX_ONE_OF, "allow-list too long");
        self.one_of = values
            .iter()
            .take(MAX_ONE_OF)
            .map(|v| v.into_value())
            .collect();
        self
    }

    /// Declared minimum
    #[must_use]
    pub const fn min_value(&self) -> Option<ScalarValue> {
        self.min
    }

    /// Declared maximum
    #[must_use]
    pub const fn max_value(&self) -> Option<ScalarValue> {
        self.max
    }

    /// Declared step
    #[must_use]
    pub const fn step_value(&self) -> Option<ScalarValue> {
        self.step
    }

    /// Allow-list entries
    #[must_use]
    pub fn allowed(&self) -> &[ScalarValue] {
        &self.one_of
    }

    /// `true` when nothing is constrained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.step.is_none() && self.one_of.is_empty()
    }

    /// Whether every declared value has kind `kind`
    #[must_use]
    pub fn conforms_to(&self, kind: ValueKind) -> bool {
        [self.min, self.max, self.step]
            .iter()
            .flatten()
            .chain(self.one_of.iter())
            .all(|v| v.kind() == kind)
    }

    /// Check `value` against every declared rule
    pub fn validate(&self, value: &ScalarValue) -> Result<(), ValidationError> {
        if let Some(min) = &self.min {
            check_kind(min, value)?;
            if matches!(value.compare(min), Some(Ordering::Less) | None) {
                return Err(ValidationError::BelowMin);
            }
        }
        if let Some(max) = &self.max {
            check_kind(max, value)?;
            if matches!(value.compare(max), Some(Ordering::Greater) | None) {
                return Err(ValidationError::AboveMax);
            }
        }
        if let Some(step) = &self.step {
            check_kind(step, value)?;
            let base = self.min.unwrap_or_else(|| zero_of(value.kind()));
            if !on_step(value, &base, step) {
                return Err(ValidationError::OffStep);
            }
        }
        if !self.one_of.is_empty() && !self.one_of.iter().any(|v| v == value) {
            return Err(ValidationError::NotAllowed);
        }
        Ok(())
    }

    /// Typed convenience over [`validate`](Self::validate)
    pub fn check<T: Scalar>(&self, value: T) -> Result<(), ValidationError> {
        self.validate(&value.into_value())
    }

    /// Write the constraint block: flags byte, then min, max, step and the
    /// allow-list (`u8` count + values) for each present rule
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        let mut flags = 0u8;
        if self.min.is_some() {
            flags |= HAS_MIN;
        }
        if self.max.is_some() {
            flags |= HAS_MAX;
        }
        if self.step.is_some() {
            flags |= HAS_STEP;
        }
        if !self.one_of.is_empty() {
            flags |= HAS_ONE_OF;
        }
        out.write_u8(flags)?;
        for value in [self.min, self.max, self.step].iter().flatten() {
            value.encode(out)?;
        }
        if !self.one_of.is_empty() {
            out.write_u8(self.one_of.len() as u8)?;
            for value in &self.one_of {
                value.encode(out)?;
            }
        }
        Ok(())
    }

    /// Read a constraint block for values of `kind`
    pub fn decode(kind: ValueKind, input: &mut ReadBuffer<'_>) -> Self {
        let flags = input.read_u8();
        let min = read_if(flags & HAS_MIN != 0, kind, input);
        let max = read_if(flags & HAS_MAX != 0, kind, input);
        let step = read_if(flags & HAS_STEP != 0, kind, input);
        let mut one_of = InlineVec::new();
        if flags & HAS_ONE_OF != 0 {
            let count = input.read_u8();
            for _ in 0..count {
                if let Some(value) = ScalarValue::decode(kind, input) {
                    // entries past the inline capacity are read and dropped
                    let _ = one_of.push(value);
                }
            }
        }
        Self {
            min,
            max,
            step,
            one_of,
        }
    }
}

fn read_if(present: bool, kind: ValueKind, input: &mut ReadBuffer<'_>) -> Option<ScalarValue> {
    if present {
        ScalarValue::decode(kind, input)
    } else {
        None
    }
}

fn check_kind(declared: &ScalarValue, value: &ScalarValue) -> Result<(), ValidationError> {
    if declared.kind() == value.kind() {
        Ok(())
    } else {
        Err(ValidationError::KindMismatch {
            expected: declared.kind(),
            found: value.kind(),
        })
    }
}

fn zero_of(kind: ValueKind) -> ScalarValue {
    match kind {
        ValueKind::Bool => ScalarValue::Bool(false),
        ValueKind::Int8 => ScalarValue::Int8(0),
        ValueKind::Int32 => ScalarValue::Int32(0),
        ValueKind::Float32 => ScalarValue::Float32(0.0),
        _ => ScalarValue::UInt8(0),
    }
}

fn on_step(value: &ScalarValue, base: &ScalarValue, step: &ScalarValue) -> bool {
    if let (Some(v), Some(b), Some(s)) = (value.as_i64(), base.as_i64(), step.as_i64()) {
        return s == 0 || (v - b) % s == 0;
    }
    match (*value, *base, *step) {
        (ScalarValue::Float32(v), ScalarValue::Float32(b), ScalarValue::Float32(s)) => {
            if s == 0.0 {
                return true;
            }
            let quotient = (v - b) / s;
            (quotient - quotient.round()).abs() <= 1e-4
        }
        _ => true,
    }
}

const HAS_MIN_LEN: u8 = 1 << 0;
const HAS_MAX_LEN: u8 = 1 << 1;
const UNIQUE: u8 = 1 << 2;
const SORTED: u8 = 1 << 3;
const REVERSE_SORTED: u8 = 1 << 4;

/// Shape constraints on a LIST.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerConstraints {
    min_len: Option<u32>,
    max_len: Option<u32>,
    unique: bool,
    sorted: bool,
    reverse_sorted: bool,
}

impl ContainerConstraints {
    /// No constraints
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_len: None,
            max_len: None,
            unique: false,
            sorted: false,
            reverse_sorted: false,
        }
    }

    /// Minimum element count
    #[must_use]
    pub const fn min_len(mut self, len: u32) -> Self {
        self.min_len = Some(len);
        self
    }

    /// Maximum element count
    #[must_use]
    pub const fn max_len(mut self, len: u32) -> Self {
        self.max_len = Some(len);
        self
    }

    /// Elements must be pairwise distinct
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Elements must be non-decreasing; clears `reverse_sorted`
    #[must_use]
    pub const fn sorted(mut self) -> Self {
        self.sorted = true;
        self.reverse_sorted = false;
        self
    }

    /// Elements must be non-increasing; clears `sorted`
    #[must_use]
    pub const fn reverse_sorted(mut self) -> Self {
        self.reverse_sorted = true;
        self.sorted = false;
        self
    }

    /// Declared minimum length
    #[must_use]
    pub const fn min_len_value(&self) -> Option<u32> {
        self.min_len
    }

    /// Declared maximum length
    #[must_use]
    pub const fn max_len_value(&self) -> Option<u32> {
        self.max_len
    }

    /// Whether elements must be distinct
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether elements must ascend
    #[must_use]
    pub const fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Whether elements must descend
    #[must_use]
    pub const fn is_reverse_sorted(&self) -> bool {
        self.reverse_sorted
    }

    /// Length bounds only
    pub fn validate_len(&self, len: usize) -> Result<(), ValidationError> {
        if let Some(min) = self.min_len {
            if len < min as usize {
                return Err(ValidationError::TooShort { len, min });
            }
        }
        if let Some(max) = self.max_len {
            if len > max as usize {
                return Err(ValidationError::TooLong { len, max });
            }
        }
        Ok(())
    }

    /// Length bounds plus shape flags over a typed slice
    pub fn validate<T: Scalar>(&self, items: &[T]) -> Result<(), ValidationError> {
        self.validate_by(items, |a, b| a.bit_eq(*b), |a, b| a.partial_cmp(b))
    }

    /// Length bounds plus shape flags over tagged values
    pub fn validate_values(&self, items: &[ScalarValue]) -> Result<(), ValidationError> {
        self.validate_by(items, |a, b| a == b, ScalarValue::compare)
    }

    fn validate_by<T>(
        &self,
        items: &[T],
        same: impl Fn(&T, &T) -> bool,
        order: impl Fn(&T, &T) -> Option<Ordering>,
    ) -> Result<(), ValidationError> {
        self.validate_len(items.len())?;
        if self.unique {
            for (index, item) in items.iter().enumerate().skip(1) {
                if items[..index].iter().any(|earlier| same(earlier, item)) {
                    return Err(ValidationError::Duplicate { index });
                }
            }
        }
        if self.sorted || self.reverse_sorted {
            for (index, pair) in items.windows(2).enumerate() {
                let ord = order(&pair[0], &pair[1]);
                if self.sorted && matches!(ord, Some(Ordering::Greater) | None) {
                    return Err(ValidationError::NotSorted { index: index + 1 });
                }
                if self.reverse_sorted && matches!(ord, Some(Ordering::Less) | None) {
                    return Err(ValidationError::NotReverseSorted { index: index + 1 });
                }
            }
        }
        Ok(())
    }

    /// Write the container block: flags byte, then varint min and max length
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        let mut flags = 0u8;
        if self.min_len.is_some() {
            flags |= HAS_MIN_LEN;
        }
        if self.max_len.is_some() {
            flags |= HAS_MAX_LEN;
        }
        if self.unique {
            flags |= UNIQUE;
        }
        if self.sorted {
            flags |= SORTED;
        }
        if self.reverse_sorted {
            flags |= REVERSE_SORTED;
        }
        out.write_u8(flags)?;
        if let Some(min) = self.min_len {
            out.write_varint(min)?;
        }
        if let Some(max) = self.max_len {
            out.write_varint(max)?;
        }
        Ok(())
    }

    /// Read a container block
    pub fn decode(input: &mut ReadBuffer<'_>) -> Self {
        let flags = input.read_u8();
        let min_len = (flags & HAS_MIN_LEN != 0).then(|| input.read_varint());
        let max_len = (flags & HAS_MAX_LEN != 0).then(|| input.read_varint());
        Self {
            min_len,
            max_len,
            unique: flags & UNIQUE != 0,
            sorted: flags & SORTED != 0,
            reverse_sorted: flags & REVERSE_SORTED != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        let c = ValueConstraints::new().range(10u8, 20u8);
        assert_eq!(c.check(5u8), Err(ValidationError::BelowMin));
        assert_eq!(c.check(21u8), Err(ValidationError::AboveMax));
        assert!(c.check(10u8).is_ok());
        assert!(c.check(20u8).is_ok());
    }

    #[test]
    fn test_step_is_relative_to_min() {
        let c = ValueConstraints::new().min(1i32).step(5i32);
        assert!(c.check(6i32).is_ok());
        assert_eq!(c.check(5i32), Err(ValidationError::OffStep));

        let f = ValueConstraints::new().step(0.25f32);
        assert!(f.check(1.75f32).is_ok());
        assert_eq!(f.check(1.3f32), Err(ValidationError::OffStep));
    }

    #[test]
    fn test_one_of() {
        let c = ValueConstraints::new().one_of(&[1u8, 3, 5]);
        assert!(c.check(3u8).is_ok());
        assert_eq!(c.check(4u8), Err(ValidationError::NotAllowed));
    }

    #[test]
    fn test_nan_fails_bounds() {
        let c = ValueConstraints::new().min(0.0f32);
        assert_eq!(c.check(f32::NAN), Err(ValidationError::BelowMin));
    }

    #[test]
    fn test_kind_mismatch() {
        let c = ValueConstraints::new().min(1u8);
        assert!(matches!(
            c.check(1i8),
            Err(ValidationError::KindMismatch { .. })
        ));
        assert!(c.conforms_to(ValueKind::UInt8));
        assert!(!c.conforms_to(ValueKind::Int32));
    }

    #[test]
    fn test_value_block_layout() {
        let c = ValueConstraints::new().range(10u8, 20u8).one_of(&[10u8, 20]);
        let mut storage = [0u8; 16];
        let mut out = WriteBuffer::new(&mut storage);
        c.encode(&mut out).unwrap();
        assert_eq!(out.written(), &[0x0B, 10, 20, 2, 10, 20]);

        let bytes = out.written().to_vec();
        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(ValueConstraints::decode(ValueKind::UInt8, &mut input), c);
        assert!(input.is_empty());
    }

    #[test]
    fn test_container_shape() {
        let c = ContainerConstraints::new().min_len(1).max_len(3).unique().sorted();
        assert_eq!(
            c.validate::<u8>(&[]),
            Err(ValidationError::TooShort { len: 0, min: 1 })
        );
        assert_eq!(
            c.validate(&[1u8, 2, 3, 4]),
            Err(ValidationError::TooLong { len: 4, max: 3 })
        );
        assert_eq!(
            c.validate(&[1u8, 1]),
            Err(ValidationError::Duplicate { index: 1 })
        );
        assert_eq!(
            c.validate(&[2u8, 1]),
            Err(ValidationError::NotSorted { index: 1 })
        );
        assert!(c.validate(&[1u8, 2, 3]).is_ok());
    }

    #[test]
    fn test_sorted_flags_are_exclusive() {
        let c = ContainerConstraints::new().sorted().reverse_sorted();
        assert!(c.is_reverse_sorted());
        assert!(!c.is_sorted());
        assert!(c.validate(&[3i8, 2, 2, -1]).is_ok());
        assert_eq!(
            c.validate(&[3i8, 4]),
            Err(ValidationError::NotReverseSorted { index: 1 })
        );
    }

    #[test]
    fn test_container_block_layout() {
        let c = ContainerConstraints::new().max_len(300).unique();
        let mut storage = [0u8; 8];
        let mut out = WriteBuffer::new(&mut storage);
        c.encode(&mut out).unwrap();
        assert_eq!(out.written(), &[0x06, 0xAC, 0x02]);

        let bytes = out.written().to_vec();
        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(ContainerConstraints::decode(&mut input), c);
    }
}
