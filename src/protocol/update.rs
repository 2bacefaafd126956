//! PROPERTY_UPDATE message and batch packing
//!
//! # Wire Format
//!
//! ```text
//! single   header, [varint timestamp], propid, value
//! batched  header, u8 (count - 1), [varint timestamp], count x (propid, value)
//! ```
//!
//! Values carry no length prefix. The decoder learns each value's extent
//! from the receiver's schema through [`SchemaLookup`].

use tracing::trace;

use super::buffer::{ReadBuffer, WireError, WriteBuffer};
use super::schema::{batch_count, read_count};
use super::{Error, Flags, MAX_BATCH_ITEMS, OpCode, OpHeader, Result};
use crate::property::TypeDef;

/// Type information the update decoder needs
pub trait SchemaLookup {
    /// Type of property `id`, `None` when unknown
    fn type_def(&self, id: u16) -> Option<&TypeDef>;
}

/// One (property, value) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateItem<'a> {
    /// Property id
    pub id: u16,
    /// Encoded value
    pub value: &'a [u8],
}

/// PROPERTY_UPDATE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyUpdate<'a> {
    /// Encoded with the batch flag
    pub batched: bool,
    /// Batch timestamp
    pub timestamp: Option<u32>,
    /// Items decoded in wire order
    pub items: Vec<UpdateItem<'a>>,
    /// First id the schema did not know. Decoding stops there since the
    /// value extent is unknown; later items are lost.
    pub unresolved: Option<u16>,
}

impl<'a> PropertyUpdate<'a> {
    /// Non-batched update of one property
    #[must_use]
    pub fn single(id: u16, value: &'a [u8]) -> Self {
        Self {
            batched: false,
            timestamp: None,
            items: vec![UpdateItem { id, value }],
            unresolved: None,
        }
    }

    /// Batched update
    #[must_use]
    pub const fn batch(timestamp: Option<u32>, items: Vec<UpdateItem<'a>>) -> Self {
        Self {
            batched: true,
            timestamp,
            items,
            unresolved: None,
        }
    }

    /// Write the full message
    ///
    /// # Errors
    ///
    /// [`Error::EmptyBatch`] for zero items, [`Error::BatchTooLarge`] above
    /// [`MAX_BATCH_ITEMS`].
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<()> {
        let batched = self.batched || self.items.len() > 1;
        let count = batch_count(self.items.len(), batched)?;
        let flags = Flags::new()
            .with_if(Flags::BATCH, batched)
            .with_if(Flags::HAS_TIMESTAMP, self.timestamp.is_some());
        OpHeader::new(OpCode::PropertyUpdate, flags).write(out)?;
        if let Some(count) = count {
            out.write_u8(count)?;
        }
        if let Some(timestamp) = self.timestamp {
            out.write_varint(timestamp)?;
        }
        for item in &self.items {
            out.write_propid(item.id)?;
            out.write_bytes(item.value)?;
        }
        Ok(())
    }

    pub(crate) fn decode(
        flags: Flags,
        input: &mut ReadBuffer<'a>,
        schema: &dyn SchemaLookup,
    ) -> Result<Self> {
        let batched = flags.has(Flags::BATCH);
        let count = read_count(input, batched);
        let timestamp = flags.has(Flags::HAS_TIMESTAMP).then(|| input.read_varint());
        input.status()?;

        let mut items = Vec::with_capacity(count);
        let mut unresolved = None;
        for _ in 0..count {
            let id = input.read_propid();
            input.status()?;
            let Some(type_def) = schema.type_def(id) else {
                trace!(id, "update names unknown property");
                unresolved = Some(id);
                break;
            };
            let start = input.position();
            type_def.skip_value(input)?;
            items.push(UpdateItem {
                id,
                value: input.consumed_since(start),
            });
        }

        Ok(Self {
            batched,
            timestamp,
            items,
            unresolved,
        })
    }
}

/// Incremental encoder for one batched PROPERTY_UPDATE frame.
///
/// Items that do not fit are rolled back, so the frame always holds whole
/// items and never exceeds the buffer it was given.
#[derive(Debug)]
pub struct UpdateBatch<'b> {
    out: WriteBuffer<'b>,
    count_pos: usize,
    count: usize,
}

impl<'b> UpdateBatch<'b> {
    /// Start a batch in `buf`
    pub fn new(buf: &'b mut [u8], timestamp: Option<u32>) -> Result<Self> {
        let mut out = WriteBuffer::new(buf);
        let flags = Flags::new()
            .with(Flags::BATCH)
            .with_if(Flags::HAS_TIMESTAMP, timestamp.is_some());
        OpHeader::new(OpCode::PropertyUpdate, flags).write(&mut out)?;
        let count_pos = out.position();
        out.write_u8(0)?;
        if let Some(timestamp) = timestamp {
            out.write_varint(timestamp)?;
        }
        Ok(Self {
            out,
            count_pos,
            count: 0,
        })
    }

    /// Items written so far
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// `true` before the first item
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `true` once the count byte cannot grow
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.count >= MAX_BATCH_ITEMS
    }

    /// Append property `id`, its value written by `encode`.
    ///
    /// Returns `Ok(false)` and leaves the batch untouched when the item does
    /// not fit.
    pub fn push(
        &mut self,
        id: u16,
        encode: impl FnOnce(&mut WriteBuffer<'_>) -> std::result::Result<(), WireError>,
    ) -> Result<bool> {
        if self.is_full() {
            return Err(Error::BatchTooLarge {
                count: self.count + 1,
                max: MAX_BATCH_ITEMS,
            });
        }
        let start = self.out.position();
        let written = self.out.write_propid(id).and_then(|()| encode(&mut self.out));
        match written {
            Ok(()) => {
                self.count += 1;
                Ok(true)
            }
            Err(WireError::Overflow) => {
                self.out.truncate(start);
                Ok(false)
            }
            Err(err) => {
                self.out.truncate(start);
                Err(err.into())
            }
        }
    }

    /// Patch the count byte and return the frame
    pub fn finish(mut self) -> Result<&'b [u8]> {
        let count = batch_count(self.count, true)?.unwrap_or_default();
        self.out.patch_u8(self.count_pos, count)?;
        Ok(self.out.finish()?)
    }
}

/// Outcome of [`pack_updates`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackReport {
    /// Frames emitted
    pub frames: usize,
    /// Items emitted across all frames
    pub items: usize,
    /// Ids whose value alone does not fit one frame
    pub oversized: Vec<u16>,
}

/// Pack the values of `ids` into as few batched frames as fit `scratch`.
///
/// `encode_value` writes one value; `emit` receives each finished frame.
/// An id whose value cannot fit even an empty frame is skipped and listed
/// in the report.
pub fn pack_updates(
    ids: impl IntoIterator<Item = u16>,
    timestamp: Option<u32>,
    scratch: &mut [u8],
    mut encode_value: impl FnMut(u16, &mut WriteBuffer<'_>) -> std::result::Result<(), WireError>,
    mut emit: impl FnMut(&[u8]) -> Result<()>,
) -> Result<PackReport> {
    let mut report = PackReport::default();
    let mut ids = ids.into_iter().peekable();
    while ids.peek().is_some() {
        let mut batch = UpdateBatch::new(&mut *scratch, timestamp)?;
        while let Some(&id) = ids.peek() {
            if batch.is_full() {
                break;
            }
            if batch.push(id, |out| encode_value(id, out))? {
                ids.next();
            } else if batch.is_empty() {
                report.oversized.push(id);
                ids.next();
            } else {
                break;
            }
        }
        if batch.is_empty() {
            continue;
        }
        report.items += batch.len();
        emit(batch.finish()?)?;
        report.frames += 1;
    }
    Ok(report)
}
