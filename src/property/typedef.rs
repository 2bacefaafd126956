//! Data type definitions (DTD).
//!
//! A [`TypeDef`] is the self-contained description of a property's value
//! type: the wire tag, kind-specific type data and constraints. The same
//! tree drives schema encoding, value skipping in the update decoder, and
//! generic validation for OBJECT and VARIANT payloads.
//!
//! # Wire Format
//!
//! ```text
//! scalar    tag, value-constraints block
//! ARRAY     tag, varint N, element DTD
//! LIST      tag, container-constraints block, element DTD
//! OBJECT    tag, u8 count, count x (ident name, DTD)
//! VARIANT   tag, u8 count, count x (ident name, DTD)
//! RESOURCE  tag, header DTD, body DTD
//! ```

use std::borrow::Cow;

use crate::protocol::{Error, ReadBuffer, Result, WireError, WriteBuffer};

use super::constraints::{ContainerConstraints, ValidationError, ValueConstraints};
use super::value::{Scalar, ScalarValue, ValueKind};

/// Maximum nesting depth accepted when decoding a DTD.
pub const MAX_TYPE_DEPTH: usize = 8;

/// A named member of an OBJECT or an alternative of a VARIANT.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Identifier, sent only in the schema
    pub name: Cow<'static, str>,
    /// Member type
    pub ty: TypeDef,
}

impl Field {
    /// Create a field
    #[must_use]
    pub fn new(name: &'static str, ty: TypeDef) -> Self {
        Self {
            name: Cow::Borrowed(name),
            ty,
        }
    }
}

/// Type descriptor tree
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    /// One of the five scalar kinds
    Scalar {
        /// Scalar kind
        kind: ValueKind,
        /// Value constraints
        constraints: ValueConstraints,
    },
    /// Fixed-length packed sequence
    Array {
        /// Element count
        len: u32,
        /// Element type
        element: Box<TypeDef>,
    },
    /// Count-prefixed bounded sequence
    List {
        /// Shape constraints
        constraints: ContainerConstraints,
        /// Element type
        element: Box<TypeDef>,
    },
    /// Packed fields in declaration order
    Object {
        /// Field list
        fields: Vec<Field>,
    },
    /// Discriminated union
    Variant {
        /// Alternatives; the index is the wire discriminant
        alternatives: Vec<Field>,
    },
    /// Resource collection headers
    Resource {
        /// Per-slot header payload type
        header: Box<TypeDef>,
        /// Body type, advisory
        body: Box<TypeDef>,
    },
}

impl TypeDef {
    /// Unconstrained scalar of type `T`
    #[must_use]
    pub fn of<T: Scalar>() -> Self {
        Self::Scalar {
            kind: T::KIND,
            constraints: ValueConstraints::new(),
        }
    }

    /// Scalar of type `T` with constraints
    #[must_use]
    pub fn constrained<T: Scalar>(constraints: ValueConstraints) -> Self {
        Self::Scalar {
            kind: T::KIND,
            constraints,
        }
    }

    /// ARRAY of `len` elements
    #[must_use]
    pub fn array(len: u32, element: Self) -> Self {
        Self::Array {
            len,
            element: Box::new(element),
        }
    }

    /// LIST of `element`
    #[must_use]
    pub fn list(constraints: ContainerConstraints, element: Self) -> Self {
        Self::List {
            constraints,
            element: Box::new(element),
        }
    }

    /// OBJECT with `fields`
    #[must_use]
    pub const fn object(fields: Vec<Field>) -> Self {
        Self::Object { fields }
    }

    /// VARIANT over `alternatives`
    #[must_use]
    pub const fn variant(alternatives: Vec<Field>) -> Self {
        Self::Variant { alternatives }
    }

    /// RESOURCE with header and body types
    #[must_use]
    pub fn resource(header: Self, body: Self) -> Self {
        Self::Resource {
            header: Box::new(header),
            body: Box::new(body),
        }
    }

    /// Wire kind of the described value
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar { kind, .. } => *kind,
            Self::Array { .. } => ValueKind::Array,
            Self::List { .. } => ValueKind::List,
            Self::Object { .. } => ValueKind::Object,
            Self::Variant { .. } => ValueKind::Variant,
            Self::Resource { .. } => ValueKind::Resource,
        }
    }

    /// Encoded size when every value of this type has the same size
    #[must_use]
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Scalar { kind, .. } => kind.scalar_size(),
            Self::Array { len, element } => element
                .fixed_size()
                .and_then(|size| size.checked_mul(*len as usize)),
            Self::Object { fields } => fields
                .iter()
                .try_fold(0usize, |acc, f| acc.checked_add(f.ty.fixed_size()?)),
            Self::List { .. } | Self::Variant { .. } | Self::Resource { .. } => None,
        }
    }

    /// Check the definition itself: constraint kinds, identifier lengths
    /// and nesting depth
    pub fn check(&self) -> Result<()> {
        self.check_at(1)
    }

    fn check_at(&self, depth: usize) -> Result<()> {
        if depth > MAX_TYPE_DEPTH {
            return Err(Error::InvalidSchema {
                reason: "type nesting too deep",
            });
        }
        match self {
            Self::Scalar { kind, constraints } => {
                if !kind.is_scalar() {
                    return Err(Error::InvalidSchema {
                        reason: "scalar definition with composite kind",
                    });
                }
                if !constraints.conforms_to(*kind) {
                    return Err(Error::InvalidSchema {
                        reason: "constraint kind differs from value kind",
                    });
                }
                Ok(())
            }
            Self::Array { element, .. } | Self::List { element, .. } => element.check_at(depth + 1),
            Self::Object { fields } | Self::Variant { alternatives: fields } => {
                if fields.is_empty() || fields.len() > usize::from(u8::MAX) {
                    return Err(Error::InvalidSchema {
                        reason: "member count outside 1..=255",
                    });
                }
                for field in fields {
                    if field.name.is_empty() || field.name.len() > usize::from(u8::MAX) {
                        return Err(Error::InvalidSchema {
                            reason: "member name must be 1..=255 bytes",
                        });
                    }
                    field.ty.check_at(depth + 1)?;
                }
                Ok(())
            }
            Self::Resource { header, body } => {
                header.check_at(depth + 1)?;
                body.check_at(depth + 1)
            }
        }
    }

    /// Write the DTD
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_u8(self.kind().as_u8())?;
        match self {
            Self::Scalar { constraints, .. } => constraints.encode(out),
            Self::Array { len, element } => {
                out.write_varint(*len)?;
                element.encode(out)
            }
            Self::List {
                constraints,
                element,
            } => {
                constraints.encode(out)?;
                element.encode(out)
            }
            Self::Object { fields } | Self::Variant { alternatives: fields } => {
                out.write_u8(fields.len() as u8)?;
                for field in fields {
                    out.write_ident(&field.name)?;
                    field.ty.encode(out)?;
                }
                Ok(())
            }
            Self::Resource { header, body } => {
                header.encode(out)?;
                body.encode(out)
            }
        }
    }

    /// Read a DTD; names are copied out of the frame
    pub fn decode(input: &mut ReadBuffer<'_>) -> Result<Self> {
        let def = Self::decode_at(input, 1)?;
        input.status()?;
        Ok(def)
    }

    fn decode_at(input: &mut ReadBuffer<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_TYPE_DEPTH {
            return Err(Error::InvalidSchema {
                reason: "type nesting too deep",
            });
        }
        let tag = input.read_u8();
        input.status()?;
        let kind = ValueKind::from_u8(tag).ok_or(Error::InvalidSchema {
            reason: "unknown type tag",
        })?;
        let def = match kind {
            ValueKind::Array => {
                let len = input.read_varint();
                Self::array(len, Self::decode_at(input, depth + 1)?)
            }
            ValueKind::List => {
                let constraints = ContainerConstraints::decode(input);
                Self::list(constraints, Self::decode_at(input, depth + 1)?)
            }
            ValueKind::Object => Self::Object {
                fields: Self::decode_fields(input, depth)?,
            },
            ValueKind::Variant => Self::Variant {
                alternatives: Self::decode_fields(input, depth)?,
            },
            ValueKind::Resource => {
                let header = Self::decode_at(input, depth + 1)?;
                Self::resource(header, Self::decode_at(input, depth + 1)?)
            }
            scalar => Self::Scalar {
                kind: scalar,
                constraints: ValueConstraints::decode(scalar, input),
            },
        };
        input.status()?;
        Ok(def)
    }

    fn decode_fields(input: &mut ReadBuffer<'_>, depth: usize) -> Result<Vec<Field>> {
        let count = input.read_u8();
        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = Cow::Owned(input.read_ident().to_owned());
            input.status()?;
            let ty = Self::decode_at(input, depth + 1)?;
            fields.push(Field { name, ty });
        }
        Ok(fields)
    }

    /// Advance `input` past one encoded value of this type
    pub fn skip_value(&self, input: &mut ReadBuffer<'_>) -> Result<()> {
        if let Some(size) = self.fixed_size() {
            input.skip(size);
            input.status()?;
            return Ok(());
        }
        match self {
            Self::Scalar { .. } => {}
            Self::Array { len, element } => {
                for _ in 0..*len {
                    element.skip_value(input)?;
                }
            }
            Self::List { element, .. } => {
                let count = input.read_varint();
                input.status()?;
                match element.fixed_size() {
                    Some(size) => input.skip(size.saturating_mul(count as usize)),
                    None => {
                        for _ in 0..count {
                            element.skip_value(input)?;
                        }
                    }
                }
            }
            Self::Object { fields } => {
                for field in fields {
                    field.ty.skip_value(input)?;
                }
            }
            Self::Variant { alternatives } => {
                let index = input.read_u8();
                input.status()?;
                let alternative =
                    alternatives
                        .get(usize::from(index))
                        .ok_or(ValidationError::UnknownAlternative {
                            index,
                            count: alternatives.len(),
                        })?;
                alternative.ty.skip_value(input)?;
            }
            Self::Resource { header, .. } => {
                let count = input.read_varint();
                for _ in 0..count {
                    input.read_varint();
                    input.read_varint();
                    input.read_varint();
                    input.status()?;
                    header.skip_value(input)?;
                }
            }
        }
        input.status()?;
        Ok(())
    }

    /// Read one value of this type and check every declared constraint
    pub fn validate_value(&self, input: &mut ReadBuffer<'_>) -> Result<()> {
        match self {
            Self::Scalar { kind, constraints } => {
                let value = ScalarValue::decode_checked(*kind, input)?;
                input.status()?;
                constraints.validate(&value)?;
            }
            Self::Array { len, element } => {
                for _ in 0..*len {
                    element.validate_value(input)?;
                }
            }
            Self::List {
                constraints,
                element,
            } => {
                let count = input.read_varint() as usize;
                input.status()?;
                constraints.validate_len(count)?;
                if let Self::Scalar { kind, .. } = element.as_ref() {
                    let mut values = Vec::with_capacity(count.min(256));
                    for _ in 0..count {
                        let start = input.position();
                        element.validate_value(input)?;
                        let mut again = ReadBuffer::new(input.consumed_since(start));
                        values.push(ScalarValue::decode_checked(*kind, &mut again)?);
                    }
                    constraints.validate_values(&values)?;
                } else {
                    for _ in 0..count {
                        element.validate_value(input)?;
                    }
                }
            }
            Self::Object { fields } => {
                for field in fields {
                    field.ty.validate_value(input)?;
                }
            }
            Self::Variant { alternatives } => {
                let index = input.read_u8();
                input.status()?;
                let alternative =
                    alternatives
                        .get(usize::from(index))
                        .ok_or(ValidationError::UnknownAlternative {
                            index,
                            count: alternatives.len(),
                        })?;
                alternative.ty.validate_value(input)?;
            }
            Self::Resource { .. } => self.skip_value(input)?,
        }
        input.status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(def: &TypeDef) -> Vec<u8> {
        let mut storage = [0u8; 128];
        let mut out = WriteBuffer::new(&mut storage);
        def.encode(&mut out).unwrap();
        out.written().to_vec()
    }

    fn rgb() -> TypeDef {
        TypeDef::array(3, TypeDef::of::<u8>())
    }

    #[test]
    fn test_scalar_dtd() {
        let def = TypeDef::constrained::<u8>(ValueConstraints::new().range(10u8, 20u8));
        assert_eq!(encode(&def), vec![0x03, 0x03, 10, 20]);
        assert_eq!(def.fixed_size(), Some(1));
    }

    #[test]
    fn test_array_dtd() {
        assert_eq!(encode(&rgb()), vec![0x20, 0x03, 0x03, 0x00]);
        assert_eq!(rgb().fixed_size(), Some(3));
    }

    #[test]
    fn test_object_dtd_roundtrip() {
        let def = TypeDef::object(vec![
            Field::new("x", TypeDef::of::<i32>()),
            Field::new("color", rgb()),
            Field::new("on", TypeDef::of::<bool>()),
        ]);
        assert_eq!(def.fixed_size(), Some(8));
        assert!(def.check().is_ok());

        let bytes = encode(&def);
        let mut input = ReadBuffer::new(&bytes);
        assert_eq!(TypeDef::decode(&mut input).unwrap(), def);
        assert!(input.is_empty());
    }

    #[test]
    fn test_unknown_tag() {
        let mut input = ReadBuffer::new(&[0x10]);
        assert!(matches!(
            TypeDef::decode(&mut input),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_depth_cap() {
        let mut def = TypeDef::of::<u8>();
        for _ in 0..MAX_TYPE_DEPTH {
            def = TypeDef::array(1, def);
        }
        assert!(def.check().is_err());

        let bytes = encode(&def);
        let mut input = ReadBuffer::new(&bytes);
        assert!(matches!(
            TypeDef::decode(&mut input),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_constraint_kind_checked() {
        let def = TypeDef::Scalar {
            kind: ValueKind::Int32,
            constraints: ValueConstraints::new().min(1u8),
        };
        assert!(def.check().is_err());
    }

    #[test]
    fn test_skip_list_of_objects() {
        let def = TypeDef::list(
            ContainerConstraints::new(),
            TypeDef::object(vec![
                Field::new("a", TypeDef::of::<u8>()),
                Field::new("b", TypeDef::of::<i32>()),
            ]),
        );
        let bytes = [2, 1, 1, 0, 0, 0, 2, 2, 0, 0, 0, 0xFF];
        let mut input = ReadBuffer::new(&bytes);
        def.skip_value(&mut input).unwrap();
        assert_eq!(input.remaining(), 1);
    }

    #[test]
    fn test_validate_list_shape() {
        let def = TypeDef::list(
            ContainerConstraints::new().max_len(3).sorted(),
            TypeDef::constrained::<u8>(ValueConstraints::new().max(9u8)),
        );
        let mut ok = ReadBuffer::new(&[3, 1, 2, 3]);
        assert!(def.validate_value(&mut ok).is_ok());

        let mut unsorted = ReadBuffer::new(&[2, 3, 1]);
        assert!(matches!(
            def.validate_value(&mut unsorted),
            Err(Error::Validation(ValidationError::NotSorted { index: 1 }))
        ));

        let mut too_big = ReadBuffer::new(&[1, 10]);
        assert!(matches!(
            def.validate_value(&mut too_big),
            Err(Error::Validation(ValidationError::AboveMax))
        ));
    }

    #[test]
    fn test_variant_unknown_alternative() {
        let def = TypeDef::variant(vec![
            Field::new("off", TypeDef::of::<bool>()),
            Field::new("level", TypeDef::of::<u8>()),
        ]);
        let mut input = ReadBuffer::new(&[2, 0]);
        assert!(matches!(
            def.skip_value(&mut input),
            Err(Error::Validation(ValidationError::UnknownAlternative {
                index: 2,
                count: 2
            }))
        ));
    }
}
