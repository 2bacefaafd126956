//! Property registry and dirty tracking.
//!
//! [`PropertySystem`] owns every registered property. Ids are assigned in
//! registration order and never change. Accepted mutations that change a
//! value fire the property's change callback and set its bit in the dirty
//! set (and in the persistence-dirty set for persistent properties).
//!
//! Each [`flush_tick`](PropertySystem::flush_tick) folds the current dirty
//! sets into per-subscriber mailboxes, in subscription order, and clears
//! them. Subscribers drain their mailbox with
//! [`take_pending`](PropertySystem::take_pending) whenever they run, so a
//! subscriber that misses a tick still sees every id exactly once with the
//! newest value.

mod dirty;
mod persistence;

use std::borrow::Cow;

use tracing::{debug, trace};

pub use dirty::DirtySet;
pub use persistence::{
    BlobStore, MemoryBlobStore, Persistence, PersistenceConfig, StorageError, blob_key,
};

use crate::property::{
    ChangeCallback, Declaration, Handle, Property, PropertyId, PropertyMeta, ResourceCollection,
    Scalar, ScalarProperty, TypeDef, ValueKind,
};
use crate::protocol::{
    Error, ItemKind, ReadBuffer, Result, SchemaItem, SchemaLookup, WireError, WriteBuffer,
    encode_to_vec,
};

/// Registry capacity; ids are `0..MAX_PROPERTIES`.
pub const MAX_PROPERTIES: usize = 256;

/// Flush subscriber slots.
pub const MAX_SUBSCRIBERS: usize = 4;

/// Which dirty set a subscriber receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Every observable change
    Changes,
    /// Changes to persistent properties
    Persistence,
}

/// Subscriber slot returned by [`PropertySystem::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u8);

#[derive(Debug)]
struct Subscriber {
    interest: Interest,
    pending: DirtySet,
}

struct Entry {
    meta: PropertyMeta,
    type_def: TypeDef,
    property: Box<dyn Property>,
    on_change: Option<ChangeCallback>,
}

/// Owned property registry.
///
/// ```
/// use microproto::{Declaration, PropertySystem, ScalarProperty};
///
/// let mut system = PropertySystem::new();
/// let power = system.register(Declaration::new("power"), ScalarProperty::new(false))?;
/// assert!(system.set(power, true)?);
/// assert!(system.dirty().contains(power.id()));
/// # Ok::<(), microproto::Error>(())
/// ```
#[derive(Default)]
pub struct PropertySystem {
    entries: Vec<Entry>,
    dirty: DirtySet,
    persist_dirty: DirtySet,
    subscribers: [Option<Subscriber>; MAX_SUBSCRIBERS],
}

impl PropertySystem {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property; it receives the next free id.
    ///
    /// The declaration name must be a unique 1..=255 byte identifier, the
    /// type definition must be well formed and the default must satisfy the
    /// declared constraints.
    pub fn register<P: Property>(&mut self, decl: Declaration, mut property: P) -> Result<Handle<P>> {
        let id = PropertyId::try_from(self.entries.len()).map_err(|_| Error::RegistryFull {
            max: MAX_PROPERTIES,
        })?;
        let name = decl.name();
        if name.is_empty() || name.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidSchema {
                reason: "property name must be 1..=255 bytes",
            });
        }
        if self.entries.iter().any(|e| e.meta.name == name) {
            return Err(Error::InvalidSchema {
                reason: "duplicate property name",
            });
        }

        let type_def = property.type_def();
        type_def.check()?;
        if type_def.kind() != ValueKind::Resource {
            let default = encode_to_vec(|out| property.encode_default(out))?;
            type_def.validate_value(&mut ReadBuffer::new(&default))?;
        }

        let meta = decl.into_meta(id);
        property.attach(&meta);
        property.take_change();
        debug!(id, name, kind = %type_def.kind(), "property registered");
        self.entries.push(Entry {
            meta,
            type_def,
            property: Box::new(property),
            on_change: None,
        });
        Ok(Handle::new(id))
    }

    /// Number of registered properties
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: u16) -> Option<&Entry> {
        self.entries.get(usize::from(id))
    }

    fn entry_mut(&mut self, id: u16) -> Result<&mut Entry> {
        self.entries
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownProperty { id })
    }

    /// Property with wire id `id`
    #[must_use]
    pub fn find(&self, id: u16) -> Option<&dyn Property> {
        self.entry(id).map(|e| e.property.as_ref())
    }

    /// Metadata for `id`
    #[must_use]
    pub fn meta(&self, id: u16) -> Option<&PropertyMeta> {
        self.entry(id).map(|e| &e.meta)
    }

    /// Id of the property called `name`
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<PropertyId> {
        self.entries
            .iter()
            .find(|e| e.meta.name == name)
            .map(|e| e.meta.id)
    }

    /// Every registered property in id order
    pub fn iter(&self) -> impl Iterator<Item = (&PropertyMeta, &dyn Property)> {
        self.entries.iter().map(|e| (&e.meta, e.property.as_ref()))
    }

    /// Typed access
    #[must_use]
    pub fn get<P: Property>(&self, handle: Handle<P>) -> Option<&P> {
        self.entry(u16::from(handle.id()))?
            .property
            .as_any()
            .downcast_ref()
    }

    /// Current value of a scalar property
    #[must_use]
    pub fn value<T: Scalar>(&self, handle: Handle<ScalarProperty<T>>) -> Option<T> {
        self.get(handle).map(ScalarProperty::get)
    }

    /// Validate and store a scalar value. `Ok(false)` for idempotent writes.
    pub fn set<T: Scalar>(&mut self, handle: Handle<ScalarProperty<T>>, value: T) -> Result<bool> {
        Ok(self.modify(handle, |p| p.set(value))??)
    }

    /// Run `f` on the typed property, then notify if it changed the value.
    ///
    /// Readonly properties can be modified here; the flag only gates the
    /// wire path.
    pub fn modify<P: Property, R>(&mut self, handle: Handle<P>, f: impl FnOnce(&mut P) -> R) -> Result<R> {
        let id = u16::from(handle.id());
        let property = self
            .entry_mut(id)?
            .property
            .as_any_mut()
            .downcast_mut::<P>()
            .ok_or(Error::UnknownProperty { id })?;
        let out = f(property);
        self.settle(handle.id());
        Ok(out)
    }

    /// Apply a value received over the update channel.
    ///
    /// `bytes` must hold exactly one encoded value. Readonly properties are
    /// rejected with [`Error::ReadOnly`].
    pub fn set_from_wire(&mut self, id: u16, bytes: &[u8]) -> Result<bool> {
        let entry = self.entry_mut(id)?;
        if entry.meta.is_readonly() {
            return Err(Error::ReadOnly { id });
        }
        let mut probe = ReadBuffer::new(bytes);
        entry.type_def.skip_value(&mut probe)?;
        if !probe.is_empty() {
            return Err(Error::TrailingBytes {
                remaining: probe.remaining(),
            });
        }
        let changed = entry.property.decode_value(&mut ReadBuffer::new(bytes))?;
        let pid = entry.meta.id;
        self.settle(pid);
        Ok(changed)
    }

    /// Install the change callback, replacing any previous one
    pub fn set_callback<P>(&mut self, handle: Handle<P>, callback: ChangeCallback) -> Result<()> {
        self.entry_mut(u16::from(handle.id()))?.on_change = Some(callback);
        Ok(())
    }

    fn settle(&mut self, id: PropertyId) {
        let Some(entry) = self.entries.get_mut(usize::from(id)) else {
            return;
        };
        if !entry.property.take_change() {
            return;
        }
        if let Some(callback) = entry.on_change {
            callback(&entry.meta, entry.property.as_ref());
        }
        let persistent = entry.meta.is_persistent();
        self.mark_dirty(id, persistent);
    }

    /// Flag `id` as changed since the last flush
    pub fn mark_dirty(&mut self, id: PropertyId, persistent: bool) {
        trace!(id, persistent, "mark dirty");
        self.dirty.insert(id);
        if persistent {
            self.persist_dirty.insert(id);
        }
    }

    /// Ids changed since the last flush
    #[must_use]
    pub const fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// Persistent ids changed since the last flush
    #[must_use]
    pub const fn persist_dirty(&self) -> &DirtySet {
        &self.persist_dirty
    }

    /// Claim a flush subscriber slot
    pub fn subscribe(&mut self, interest: Interest) -> Result<SubscriberId> {
        let (index, slot) = self
            .subscribers
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(Error::SubscribersFull {
                max: MAX_SUBSCRIBERS,
            })?;
        *slot = Some(Subscriber {
            interest,
            pending: DirtySet::new(),
        });
        Ok(SubscriberId(index as u8))
    }

    /// Release a subscriber slot
    pub fn unsubscribe(&mut self, subscriber: SubscriberId) {
        if let Some(slot) = self.subscribers.get_mut(usize::from(subscriber.0)) {
            *slot = None;
        }
    }

    /// Fan the dirty sets out to subscriber mailboxes, then clear them.
    /// Returns the change set that was flushed.
    pub fn flush_tick(&mut self) -> DirtySet {
        let flushed = self.dirty;
        if flushed.is_empty() && self.persist_dirty.is_empty() {
            return flushed;
        }
        for subscriber in self.subscribers.iter_mut().flatten() {
            let set = match subscriber.interest {
                Interest::Changes => &self.dirty,
                Interest::Persistence => &self.persist_dirty,
            };
            subscriber.pending.union_with(set);
        }
        trace!(count = flushed.len(), "flush tick");
        self.dirty.clear();
        self.persist_dirty.clear();
        flushed
    }

    /// Drain a subscriber mailbox
    pub fn take_pending(&mut self, subscriber: SubscriberId) -> DirtySet {
        self.subscribers
            .get_mut(usize::from(subscriber.0))
            .and_then(Option::as_mut)
            .map(|s| std::mem::take(&mut s.pending))
            .unwrap_or_default()
    }

    /// Write the current value of `id`
    pub fn encode_value(&self, id: u16, out: &mut WriteBuffer<'_>) -> Result<()> {
        let entry = self.entry(id).ok_or(Error::UnknownProperty { id })?;
        entry.property.encode_value(out)?;
        Ok(())
    }

    /// Write the persistence blob of `id`
    pub fn save(&self, id: u16, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        match self.entry(id) {
            Some(entry) => entry.property.save_to_blob(out),
            None => Ok(()),
        }
    }

    /// Restore `id` from a persistence blob. No callback fires and nothing
    /// is marked dirty.
    pub fn load(&mut self, id: u16, blob: &[u8]) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.property.load_from_blob(&mut ReadBuffer::new(blob))?;
        entry.property.take_change();
        Ok(())
    }

    /// Read access to a RESOURCE property
    pub fn resource(&self, id: u16) -> Result<&dyn ResourceCollection> {
        let entry = self.entry(id).ok_or(Error::UnknownProperty { id })?;
        entry.property.as_resource().ok_or(Error::TypeMismatch {
            expected: ValueKind::Resource,
            found: entry.type_def.kind(),
        })
    }

    /// Run `f` on a RESOURCE property, then notify if it changed
    pub fn with_resource<R>(
        &mut self,
        id: u16,
        f: impl FnOnce(&mut dyn ResourceCollection) -> R,
    ) -> Result<R> {
        let entry = self.entry_mut(id)?;
        let found = entry.type_def.kind();
        let collection = entry
            .property
            .as_resource_mut()
            .ok_or(Error::TypeMismatch {
                expected: ValueKind::Resource,
                found,
            })?;
        let out = f(collection);
        let pid = entry.meta.id;
        self.settle(pid);
        Ok(out)
    }

    /// Schema item describing `id`
    pub fn schema_item(&self, id: u16) -> Result<SchemaItem<'_>> {
        let entry = self.entry(id).ok_or(Error::UnknownProperty { id })?;
        let default = encode_to_vec(|out| entry.property.encode_default(out))?;
        Ok(SchemaItem {
            kind: ItemKind::Property,
            id,
            namespace: 0,
            name: entry.meta.name,
            description: entry.meta.description.unwrap_or_default(),
            level: entry.meta.level,
            flags: entry.meta.flags,
            type_def: Cow::Borrowed(&entry.type_def),
            default_value: Cow::Owned(default),
            ui: Cow::Borrowed(&entry.meta.ui),
        })
    }
}

impl SchemaLookup for PropertySystem {
    fn type_def(&self, id: u16) -> Option<&TypeDef> {
        self.entry(id).map(|e| &e.type_def)
    }
}
