//! SCHEMA_UPSERT and SCHEMA_DELETE messages
//!
//! # Item layout
//!
//! ```text
//! u8   item type   kind (bits 0-3) | readonly << 4 | persistent << 5 | hidden << 6
//! u8   level       code (bits 0-1) | ble_exposed << 2
//! [u8  group id]   level == GROUP only
//! propid id
//! propid namespace
//! ident  name
//! utf8   description
//! DTD
//! value  default   raw bytes, extent given by the DTD
//! UI hints block
//! ```

use std::borrow::Cow;

use super::buffer::{ReadBuffer, WireError, WriteBuffer};
use super::{Error, Flags, MAX_BATCH_ITEMS, OpCode, OpHeader, Result};
use crate::property::{Level, PropertyFlags, TypeDef, UiHints};

const READONLY_BIT: u8 = 1 << 4;
const PERSISTENT_BIT: u8 = 1 << 5;
const HIDDEN_BIT: u8 = 1 << 6;
const BLE_EXPOSED_BIT: u8 = 1 << 2;

/// Schema item kind (low nibble of the item-type byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemKind {
    /// Property grouping
    Namespace = 0,
    /// Registered property
    Property = 1,
    /// RPC function
    Function = 2,
}

impl ItemKind {
    /// Convert from the item-type nibble
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Namespace),
            1 => Some(Self::Property),
            2 => Some(Self::Function),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One schema entry
///
/// Decoded items borrow their strings and default bytes from the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaItem<'a> {
    /// Item kind
    pub kind: ItemKind,
    /// Property id
    pub id: u16,
    /// Namespace id
    pub namespace: u16,
    /// Identifier
    pub name: &'a str,
    /// Human description, empty when absent
    pub description: &'a str,
    /// Distribution level
    pub level: Level,
    /// Persistent, readonly, hidden and BLE flags
    pub flags: PropertyFlags,
    /// Value type
    pub type_def: Cow<'a, TypeDef>,
    /// Encoded default value
    pub default_value: Cow<'a, [u8]>,
    /// Rendering hints
    pub ui: Cow<'a, UiHints>,
}

impl<'a> SchemaItem<'a> {
    /// Write the item without a message header
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        let mut item_type = self.kind.as_u8();
        if self.flags.has(PropertyFlags::READONLY) {
            item_type |= READONLY_BIT;
        }
        if self.flags.has(PropertyFlags::PERSISTENT) {
            item_type |= PERSISTENT_BIT;
        }
        if self.flags.has(PropertyFlags::HIDDEN) {
            item_type |= HIDDEN_BIT;
        }
        out.write_u8(item_type)?;

        let mut level = self.level.code();
        if self.flags.has(PropertyFlags::BLE_EXPOSED) {
            level |= BLE_EXPOSED_BIT;
        }
        out.write_u8(level)?;
        if let Level::Group(group) = self.level {
            out.write_u8(group)?;
        }

        out.write_propid(self.id)?;
        out.write_propid(self.namespace)?;
        out.write_ident(self.name)?;
        out.write_utf8(self.description)?;
        self.type_def.encode(out)?;
        out.write_bytes(&self.default_value)?;
        self.ui.encode(out)
    }

    /// Read one item
    pub fn decode(input: &mut ReadBuffer<'a>) -> Result<Self> {
        let item_type = input.read_u8();
        let level_byte = input.read_u8();
        input.status()?;

        let kind = ItemKind::from_u8(item_type & 0x0F).ok_or(Error::InvalidSchema {
            reason: "unknown schema item kind",
        })?;
        if kind != ItemKind::Property {
            return Err(Error::InvalidSchema {
                reason: "only property items carry a schema body",
            });
        }

        let level = match level_byte & 0x03 {
            0 => Level::Local,
            1 => Level::Group(input.read_u8()),
            2 => Level::Global,
            _ => {
                return Err(Error::InvalidSchema {
                    reason: "unknown property level",
                });
            }
        };

        let mut flags = PropertyFlags::new();
        for (bit, flag) in [
            (READONLY_BIT, PropertyFlags::READONLY),
            (PERSISTENT_BIT, PropertyFlags::PERSISTENT),
            (HIDDEN_BIT, PropertyFlags::HIDDEN),
        ] {
            if item_type & bit != 0 {
                flags = flags.with(flag);
            }
        }
        if level_byte & BLE_EXPOSED_BIT != 0 {
            flags = flags.with(PropertyFlags::BLE_EXPOSED);
        }

        let id = input.read_propid();
        let namespace = input.read_propid();
        let name = input.read_ident();
        let description = input.read_utf8();
        input.status()?;

        let type_def = TypeDef::decode(input)?;
        let start = input.position();
        type_def.skip_value(input)?;
        let default_value = input.consumed_since(start);
        let ui = UiHints::decode(input);
        input.status()?;

        Ok(Self {
            kind,
            id,
            namespace,
            name,
            description,
            level,
            flags,
            type_def: Cow::Owned(type_def),
            default_value: Cow::Borrowed(default_value),
            ui: Cow::Owned(ui),
        })
    }
}

/// SCHEMA_UPSERT: create or update one or more items
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaUpsert<'a> {
    /// Encoded with the batch flag
    pub batched: bool,
    /// Items in wire order
    pub items: Vec<SchemaItem<'a>>,
}

impl<'a> SchemaUpsert<'a> {
    /// Non-batched message for one item
    #[must_use]
    pub fn single(item: SchemaItem<'a>) -> Self {
        Self {
            batched: false,
            items: vec![item],
        }
    }

    /// Batched message
    #[must_use]
    pub const fn batch(items: Vec<SchemaItem<'a>>) -> Self {
        Self {
            batched: true,
            items,
        }
    }

    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let batched = self.batched || self.items.len() > 1;
        let count = batch_count(self.items.len(), batched)?;
        OpHeader::new(OpCode::SchemaUpsert, Flags::new().with_if(Flags::BATCH, batched)).write(out)?;
        if let Some(count) = count {
            out.write_u8(count)?;
        }
        for item in &self.items {
            item.encode(out)?;
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'a>) -> Result<Self> {
        let batched = flags.has(Flags::BATCH);
        let count = read_count(input, batched);
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(SchemaItem::decode(input)?);
        }
        input.status()?;
        Ok(Self { batched, items })
    }
}

/// Item named by a SCHEMA_DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteItem {
    /// Item kind
    pub kind: ItemKind,
    /// Item id
    pub id: u16,
}

/// SCHEMA_DELETE: remove one or more items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDelete {
    /// Encoded with the batch flag
    pub batched: bool,
    /// Items to remove
    pub items: Vec<DeleteItem>,
}

impl SchemaDelete {
    /// Write the full message
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let batched = self.batched || self.items.len() > 1;
        let count = batch_count(self.items.len(), batched)?;
        OpHeader::new(OpCode::SchemaDelete, Flags::new().with_if(Flags::BATCH, batched)).write(out)?;
        if let Some(count) = count {
            out.write_u8(count)?;
        }
        for item in &self.items {
            out.write_u8(item.kind.as_u8())?;
            out.write_propid(item.id)?;
        }
        Ok(())
    }

    pub(crate) fn decode(flags: Flags, input: &mut ReadBuffer<'_>) -> Result<Self> {
        let batched = flags.has(Flags::BATCH);
        let count = read_count(input, batched);
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = input.read_u8();
            let id = input.read_propid();
            input.status()?;
            let kind = ItemKind::from_u8(kind & 0x0F).ok_or(Error::InvalidSchema {
                reason: "unknown schema item kind",
            })?;
            items.push(DeleteItem { kind, id });
        }
        Ok(Self { batched, items })
    }
}

/// Count byte for a batch of `len` items, `None` for a single message.
pub(crate) fn batch_count(len: usize, batched: bool) -> Result<Option<u8>> {
    match len {
        0 => Err(Error::EmptyBatch),
        n if n > MAX_BATCH_ITEMS => Err(Error::BatchTooLarge {
            count: n,
            max: MAX_BATCH_ITEMS,
        }),
        n if batched => Ok(u8::try_from(n - 1).ok()),
        _ => Ok(None),
    }
}

/// Item count of a possibly batched body
pub(crate) fn read_count(input: &mut ReadBuffer<'_>, batched: bool) -> usize {
    if batched {
        usize::from(input.read_u8()) + 1
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{ValueConstraints, Widget};
    use crate::protocol::encode_to_vec;

    fn brightness() -> SchemaItem<'static> {
        SchemaItem {
            kind: ItemKind::Property,
            id: 3,
            namespace: 0,
            name: "brightness",
            description: "",
            level: Level::Local,
            flags: PropertyFlags::new().with(PropertyFlags::PERSISTENT),
            type_def: Cow::Owned(TypeDef::constrained::<u8>(ValueConstraints::new().range(10u8, 20u8))),
            default_value: Cow::Borrowed(&[10]),
            ui: Cow::Owned(UiHints::new().widget(Widget::SLIDER)),
        }
    }

    #[test]
    fn test_single_item_layout() {
        let bytes = encode_to_vec(|out| {
            SchemaUpsert::single(brightness())
                .encode(out)
                .map_err(|_| WireError::Overflow)
        })
        .unwrap();
        assert_eq!(bytes[0], 0x03);
        // persistent property, local level, id 3, namespace 0
        assert_eq!(&bytes[1..5], &[0x21, 0x00, 0x03, 0x00]);
        assert_eq!(bytes[5], 10);
        assert_eq!(&bytes[6..16], b"brightness");
        // empty description, then the DTD tag of UINT8
        assert_eq!(bytes[16], 0);
        assert_eq!(bytes[17], 0x03);
    }

    #[test]
    fn test_upsert_roundtrip() {
        let mut second = brightness();
        second.id = 200;
        second.name = "speed";
        second.description = "animation speed";
        second.level = Level::Group(7);
        second.flags = PropertyFlags::new()
            .with(PropertyFlags::READONLY)
            .with(PropertyFlags::BLE_EXPOSED);
        let upsert = SchemaUpsert::batch(vec![brightness(), second]);

        let bytes = encode_to_vec(|out| upsert.encode(out).map_err(|_| WireError::Overflow)).unwrap();
        assert_eq!(bytes[0], 0x13);
        assert_eq!(bytes[1], 1);

        let mut input = ReadBuffer::new(&bytes[1..]);
        let decoded = SchemaUpsert::decode(Flags::new().with(Flags::BATCH), &mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(decoded, upsert);
    }

    #[test]
    fn test_non_property_items_rejected() {
        let mut input = ReadBuffer::new(&[0x02, 0x00]);
        assert!(matches!(
            SchemaItem::decode(&mut input),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_delete_roundtrip() {
        let delete = SchemaDelete {
            batched: true,
            items: vec![
                DeleteItem { kind: ItemKind::Property, id: 1 },
                DeleteItem { kind: ItemKind::Property, id: 300 },
            ],
        };
        let bytes = encode_to_vec(|out| delete.encode(out).map_err(|_| WireError::Overflow)).unwrap();
        assert_eq!(bytes, vec![0x14, 0x01, 0x01, 0x01, 0x01, 0xAC, 0x02]);

        let decoded =
            SchemaDelete::decode(Flags::new().with(Flags::BATCH), &mut ReadBuffer::new(&bytes[1..]))
                .unwrap();
        assert_eq!(decoded, delete);
    }

    #[test]
    fn test_batch_bounds() {
        assert!(matches!(batch_count(0, true), Err(Error::EmptyBatch)));
        assert_eq!(batch_count(1, true).unwrap(), Some(0));
        assert_eq!(batch_count(256, true).unwrap(), Some(255));
        assert_eq!(batch_count(1, false).unwrap(), None);
        assert!(matches!(
            batch_count(257, true),
            Err(Error::BatchTooLarge { count: 257, max: 256 })
        ));
    }
}
