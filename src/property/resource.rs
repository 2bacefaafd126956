//! Resource collections.
//!
//! A RESOURCE property keeps a fixed table of header slots in memory and
//! delegates bodies to a [`ResourceBodyStore`]. Bodies are written before a
//! slot is populated, so a failed write never leaves a header behind.
//!
//! # Wire value
//!
//! ```text
//! varint count
//! count x (varint id, varint version, varint body_size, HEADER_SIZE bytes)
//! ```
//!
//! # Persistence blob
//!
//! ```text
//! u16 count, u32 next_id
//! count x (u8 slot, u32 id, u32 version, u32 body_size, HEADER_SIZE bytes)
//! ```

use std::any::Any;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{Error, ReadBuffer, ResourceStatus, Result, WireError, WriteBuffer};
use crate::store::{BodyStoreError, ResourceBodyStore};

use super::{
    ChangeLatch, ContainerConstraints, Property, PropertyId, PropertyMeta, TypeDef, ValueKind,
};

/// Resource operation failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// No resource with this id
    #[error("resource {id} not found")]
    NotFound {
        /// Requested id
        id: u32,
    },

    /// Header payload has the wrong size
    #[error("invalid resource data")]
    InvalidData,

    /// Every slot is taken, or the body store is full
    #[error("out of space")]
    OutOfSpace,

    /// Body store failure
    #[error("body storage failure")]
    Storage,
}

impl ResourceError {
    /// Status byte for RESOURCE_* error responses
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        match self {
            Self::NotFound { .. } => ResourceStatus::NotFound,
            Self::InvalidData => ResourceStatus::InvalidData,
            Self::OutOfSpace => ResourceStatus::OutOfSpace,
            Self::Storage => ResourceStatus::Error,
        }
    }
}

impl From<BodyStoreError> for ResourceError {
    fn from(err: BodyStoreError) -> Self {
        match err {
            BodyStoreError::OutOfSpace => Self::OutOfSpace,
            BodyStoreError::Io => Self::Storage,
        }
    }
}

/// Implicit per-resource header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceHeader {
    /// Per-property id, never reused
    pub id: u32,
    /// Bumped on every body update; 1 after create
    pub version: u32,
    /// Body length in bytes
    pub body_size: u32,
}

/// Object-safe view of a resource collection used by the server and the
/// registry.
pub trait ResourceCollection {
    /// Name used to key bodies
    fn name(&self) -> &str;

    /// Fixed header payload size
    fn header_size(&self) -> usize;

    /// Slot count
    fn capacity(&self) -> usize;

    /// Number of valid slots
    fn len(&self) -> usize;

    /// `true` when no slot is valid
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of valid slots in slot order
    fn ids(&self) -> Vec<u32>;

    /// Header of resource `id`
    fn header(&self, id: u32) -> Option<ResourceHeader>;

    /// Header payload of resource `id`
    fn header_data(&self, id: u32) -> Option<&[u8]>;

    /// Store a body, then claim the lowest empty slot. Returns the new id.
    fn create(
        &mut self,
        header: &[u8],
        body: &[u8],
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<u32, ResourceError>;

    /// Replace the header payload; in memory only
    fn update_header(&mut self, id: u32, header: &[u8]) -> std::result::Result<(), ResourceError>;

    /// Replace the body and bump the version
    fn update_body(
        &mut self,
        id: u32,
        body: &[u8],
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<(), ResourceError>;

    /// Remove the body (best effort) and clear the slot
    fn delete(
        &mut self,
        id: u32,
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<(), ResourceError>;

    /// Copy the body into `buf`; `0` on a miss
    fn read_body(&self, id: u32, buf: &mut [u8], store: &dyn ResourceBodyStore) -> usize;

    /// Clear slots whose body is missing; returns how many were cleared
    fn remove_orphans(&mut self, store: &dyn ResourceBodyStore) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Slot<const HDR: usize> {
    header: ResourceHeader,
    data: [u8; HDR],
}

/// RESOURCE property with `MAX` slots of `HDR`-byte header payloads.
#[derive(Debug, Clone)]
pub struct ResourceProperty<const MAX: usize, const HDR: usize> {
    id: PropertyId,
    name: &'static str,
    slots: [Option<Slot<HDR>>; MAX],
    next_id: u32,
    header_type: TypeDef,
    body_type: TypeDef,
    latch: ChangeLatch,
}

impl<const MAX: usize, const HDR: usize> Default for ResourceProperty<MAX, HDR> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX: usize, const HDR: usize> ResourceProperty<MAX, HDR> {
    /// Empty collection; header type is `ARRAY<UINT8, HDR>`, body type is
    /// `LIST<UINT8>`
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: 0,
            name: "",
            slots: std::array::from_fn(|_| None),
            next_id: 1,
            header_type: TypeDef::array(HDR as u32, TypeDef::of::<u8>()),
            body_type: TypeDef::list(ContainerConstraints::new(), TypeDef::of::<u8>()),
            latch: ChangeLatch::default(),
        }
    }

    /// Describe the header payload with a richer type of the same size
    #[must_use]
    pub fn with_header_type(mut self, ty: TypeDef) -> Self {
        debug_assert_eq!(ty.fixed_size(), Some(HDR), "header type size differs from HDR");
        self.header_type = ty;
        self
    }

    /// Describe the body type
    #[must_use]
    pub fn with_body_type(mut self, ty: TypeDef) -> Self {
        self.body_type = ty;
        self
    }

    /// Next id `create` will assign
    #[must_use]
    pub const fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Valid headers in slot order
    pub fn headers(&self) -> impl Iterator<Item = &ResourceHeader> {
        self.slots.iter().flatten().map(|slot| &slot.header)
    }

    fn slot(&self, id: u32) -> Option<&Slot<HDR>> {
        self.slots.iter().flatten().find(|slot| slot.header.id == id)
    }

    fn slot_mut(&mut self, id: u32) -> std::result::Result<&mut Slot<HDR>, ResourceError> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.header.id == id)
            .ok_or(ResourceError::NotFound { id })
    }

    fn header_payload(header: &[u8]) -> std::result::Result<[u8; HDR], ResourceError> {
        header.try_into().map_err(|_| ResourceError::InvalidData)
    }

    fn body_len(body: &[u8]) -> std::result::Result<u32, ResourceError> {
        u32::try_from(body.len()).map_err(|_| ResourceError::OutOfSpace)
    }
}

impl<const MAX: usize, const HDR: usize> ResourceCollection for ResourceProperty<MAX, HDR> {
    fn name(&self) -> &str {
        self.name
    }

    fn header_size(&self) -> usize {
        HDR
    }

    fn capacity(&self) -> usize {
        MAX
    }

    fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn ids(&self) -> Vec<u32> {
        self.headers().map(|h| h.id).collect()
    }

    fn header(&self, id: u32) -> Option<ResourceHeader> {
        self.slot(id).map(|slot| slot.header)
    }

    fn header_data(&self, id: u32) -> Option<&[u8]> {
        self.slot(id).map(|slot| slot.data.as_slice())
    }

    fn create(
        &mut self,
        header: &[u8],
        body: &[u8],
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<u32, ResourceError> {
        let data = Self::header_payload(header)?;
        let body_size = Self::body_len(body)?;
        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ResourceError::OutOfSpace)?;
        let id = self.next_id;
        store.write_body(self.name, id, body)?;
        self.next_id = id.wrapping_add(1).max(1);
        self.slots[free] = Some(Slot {
            header: ResourceHeader {
                id,
                version: 1,
                body_size,
            },
            data,
        });
        self.latch.raise();
        debug!(property = self.name, id, slot = free, body_size, "resource created");
        Ok(id)
    }

    fn update_header(&mut self, id: u32, header: &[u8]) -> std::result::Result<(), ResourceError> {
        let data = Self::header_payload(header)?;
        let slot = self.slot_mut(id)?;
        if slot.data != data {
            slot.data = data;
            self.latch.raise();
        }
        Ok(())
    }

    fn update_body(
        &mut self,
        id: u32,
        body: &[u8],
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<(), ResourceError> {
        let body_size = Self::body_len(body)?;
        self.slot_mut(id)?;
        store.write_body(self.name, id, body)?;
        let slot = self.slot_mut(id)?;
        slot.header.version = slot.header.version.wrapping_add(1);
        slot.header.body_size = body_size;
        self.latch.raise();
        Ok(())
    }

    fn delete(
        &mut self,
        id: u32,
        store: &mut dyn ResourceBodyStore,
    ) -> std::result::Result<(), ResourceError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.header.id == id))
            .ok_or(ResourceError::NotFound { id })?;
        if !store.delete_body(self.name, id) {
            debug!(property = self.name, id, "resource body already absent");
        }
        self.slots[index] = None;
        self.latch.raise();
        Ok(())
    }

    fn read_body(&self, id: u32, buf: &mut [u8], store: &dyn ResourceBodyStore) -> usize {
        if self.slot(id).is_none() {
            return 0;
        }
        store.read_body(self.name, id, buf)
    }

    fn remove_orphans(&mut self, store: &dyn ResourceBodyStore) -> usize {
        let mut removed = 0;
        for entry in &mut self.slots {
            if let Some(slot) = entry {
                if !store.body_exists(self.name, slot.header.id) {
                    warn!(property = self.name, id = slot.header.id, "clearing orphan resource header");
                    *entry = None;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.latch.raise();
        }
        removed
    }
}

impl<const MAX: usize, const HDR: usize> Property for ResourceProperty<MAX, HDR> {
    fn kind(&self) -> ValueKind {
        ValueKind::Resource
    }

    fn type_def(&self) -> TypeDef {
        TypeDef::resource(self.header_type.clone(), self.body_type.clone())
    }

    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_varint(self.len() as u32)?;
        for slot in self.slots.iter().flatten() {
            out.write_varint(slot.header.id)?;
            out.write_varint(slot.header.version)?;
            out.write_varint(slot.header.body_size)?;
            out.write_bytes(&slot.data)?;
        }
        Ok(())
    }

    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_varint(0)
    }

    /// Resources change only through resource operations.
    fn decode_value(&mut self, _input: &mut ReadBuffer<'_>) -> Result<bool> {
        Err(Error::ReadOnly {
            id: u16::from(self.id),
        })
    }

    fn save_to_blob(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        out.write_u16_le(self.len() as u16)?;
        out.write_u32_le(self.next_id)?;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                out.write_u8(index as u8)?;
                out.write_u32_le(slot.header.id)?;
                out.write_u32_le(slot.header.version)?;
                out.write_u32_le(slot.header.body_size)?;
                out.write_bytes(&slot.data)?;
            }
        }
        Ok(())
    }

    /// Rebuilds the slot table without touching bodies. Entries for slots
    /// beyond `MAX` are skipped.
    fn load_from_blob(&mut self, input: &mut ReadBuffer<'_>) -> Result<()> {
        let count = input.read_u16_le();
        let mut next_id = input.read_u32_le();
        input.status()?;
        let mut slots: [Option<Slot<HDR>>; MAX] = std::array::from_fn(|_| None);
        for _ in 0..count {
            let index = usize::from(input.read_u8());
            let header = ResourceHeader {
                id: input.read_u32_le(),
                version: input.read_u32_le(),
                body_size: input.read_u32_le(),
            };
            let data = input.read_bytes(HDR);
            input.status()?;
            let Some(entry) = slots.get_mut(index) else {
                warn!(property = self.name, index, "resource slot beyond capacity, skipping");
                continue;
            };
            *entry = Some(Slot {
                header,
                data: Self::header_payload(data)?,
            });
            next_id = next_id.max(header.id.wrapping_add(1));
        }
        self.slots = slots;
        self.next_id = next_id.max(1);
        Ok(())
    }

    fn take_change(&mut self) -> bool {
        self.latch.take()
    }

    fn attach(&mut self, meta: &PropertyMeta) {
        self.id = meta.id;
        self.name = meta.name;
    }

    fn as_resource(&self) -> Option<&dyn ResourceCollection> {
        Some(self)
    }

    fn as_resource_mut(&mut self) -> Option<&mut dyn ResourceCollection> {
        Some(self)
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
    use crate::property::Declaration;
    use crate::store::MemoryBodyStore;

    fn shaders() -> ResourceProperty<3, 4> {
        let mut prop = ResourceProperty::new();
        prop.attach(&Declaration::new("shaders").into_meta(2));
        prop
    }

    #[test]
    fn test_create_assigns_ids_from_one() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        let a = prop.create(&[1; 4], b"abc", &mut store).unwrap();
        let b = prop.create(&[2; 4], b"de", &mut store).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(
            prop.header(a),
            Some(ResourceHeader {
                id: 1,
                version: 1,
                body_size: 3
            })
        );
        assert!(store.body_exists("shaders", 1));
        assert!(prop.take_change());
    }

    #[test]
    fn test_lowest_slot_and_no_id_reuse() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        for _ in 0..3 {
            prop.create(&[0; 4], b"x", &mut store).unwrap();
        }
        assert_eq!(
            prop.create(&[0; 4], b"x", &mut store),
            Err(ResourceError::OutOfSpace)
        );
        prop.delete(1, &mut store).unwrap();
        let id = prop.create(&[0; 4], b"y", &mut store).unwrap();
        assert_eq!(id, 4);
        assert_eq!(prop.ids(), vec![4, 2, 3]);
    }

    #[test]
    fn test_failed_body_write_leaves_slot_empty() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::with_capacity(2);
        assert_eq!(
            prop.create(&[0; 4], b"too long", &mut store),
            Err(ResourceError::OutOfSpace)
        );
        assert!(prop.is_empty());
        assert_eq!(prop.next_id(), 1);
        assert!(!prop.take_change());
    }

    #[test]
    fn test_update_body_bumps_version() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::with_capacity(8);
        let id = prop.create(&[0; 4], b"abc", &mut store).unwrap();
        prop.update_body(id, b"abcdef", &mut store).unwrap();
        let header = prop.header(id).unwrap();
        assert_eq!((header.version, header.body_size), (2, 6));

        assert_eq!(
            prop.update_body(id, b"0123456789", &mut store),
            Err(ResourceError::OutOfSpace)
        );
        assert_eq!(prop.header(id), Some(header));
    }

    #[test]
    fn test_header_size_checked() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        assert_eq!(
            prop.create(&[0; 3], b"", &mut store),
            Err(ResourceError::InvalidData)
        );
        let id = prop.create(&[0; 4], b"", &mut store).unwrap();
        assert_eq!(
            prop.update_header(id, &[1; 5]),
            Err(ResourceError::InvalidData)
        );
        prop.update_header(id, &[1; 4]).unwrap();
        assert_eq!(prop.header_data(id), Some(&[1u8; 4][..]));
    }

    #[test]
    fn test_wire_value() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        prop.create(&[0xDE, 0xAD, 0xBE, 0xEF], &[1, 2, 3], &mut store)
            .unwrap();
        let mut storage = [0u8; 32];
        let mut out = WriteBuffer::new(&mut storage);
        prop.encode_value(&mut out).unwrap();
        assert_eq!(out.written(), &[1, 1, 1, 3, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_wire_write_is_readonly() {
        let mut prop = shaders();
        let mut input = ReadBuffer::new(&[0]);
        assert!(matches!(
            prop.decode_value(&mut input),
            Err(Error::ReadOnly { id: 2 })
        ));
    }

    #[test]
    fn test_blob_roundtrip_and_orphans() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        prop.create(&[1; 4], b"a", &mut store).unwrap();
        let second = prop.create(&[2; 4], b"bb", &mut store).unwrap();
        prop.update_body(second, b"bbb", &mut store).unwrap();

        let mut storage = [0u8; 64];
        let mut out = WriteBuffer::new(&mut storage);
        prop.save_to_blob(&mut out).unwrap();
        let blob = out.written().to_vec();
        assert_eq!(blob.len(), 2 + 4 + 2 * (1 + 12 + 4));

        let mut restored = shaders();
        restored.load_from_blob(&mut ReadBuffer::new(&blob)).unwrap();
        assert_eq!(restored.header(second), prop.header(second));
        assert_eq!(restored.next_id(), 3);

        store.delete_body("shaders", 1);
        assert_eq!(restored.remove_orphans(&store), 1);
        assert_eq!(restored.ids(), vec![second]);

        let mut buf = [0u8; 8];
        assert_eq!(restored.read_body(second, &mut buf, &store), 3);
        assert_eq!(restored.read_body(1, &mut buf, &store), 0);
    }

    #[test]
    fn test_truncated_blob_leaves_table() {
        let mut prop = shaders();
        let mut store = MemoryBodyStore::new();
        prop.create(&[1; 4], b"a", &mut store).unwrap();
        let blob = [1, 0, 5, 0, 0, 0, 0, 1];
        assert!(prop.load_from_blob(&mut ReadBuffer::new(&blob)).is_err());
        assert_eq!(prop.ids(), vec![1]);
    }
}
