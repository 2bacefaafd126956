//! Typed properties.
//!
//! Every tunable is a [`Property`]: a value with a wire kind, a type
//! definition, constraints and a change latch. Concrete kinds are
//! [`ScalarProperty`], [`ArrayProperty`], [`ListProperty`],
//! [`ObjectProperty`], [`VariantProperty`] and [`ResourceProperty`].
//!
//! Properties are owned by the [`PropertySystem`](crate::PropertySystem);
//! callers hold a typed [`Handle`] and go through the registry, which fires
//! change callbacks and marks dirty bits.

mod array;
mod constraints;
mod list;
mod object;
mod resource;
mod scalar;
mod typedef;
mod ui;
mod value;
mod variant;

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

pub use array::ArrayProperty;
pub use constraints::{ContainerConstraints, MAX_ONE_OF, ValidationError, ValueConstraints};
pub use list::ListProperty;
pub use object::ObjectProperty;
pub use resource::{ResourceCollection, ResourceError, ResourceHeader, ResourceProperty};
pub use scalar::ScalarProperty;
pub use typedef::{Field, MAX_TYPE_DEPTH, TypeDef};
pub use ui::{Color, UiHints, Widget};
pub use value::{Scalar, ScalarValue, ValueKind};
pub use variant::VariantProperty;

use crate::protocol::{ReadBuffer, Result, WireError, WriteBuffer};

/// Registry-assigned property id; ids are dense from zero.
pub type PropertyId = u8;

/// Typed reference to a registered property.
pub struct Handle<P> {
    id: PropertyId,
    _marker: PhantomData<fn() -> P>,
}

impl<P> Handle<P> {
    pub(crate) const fn new(id: PropertyId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Registry id
    #[must_use]
    pub const fn id(&self) -> PropertyId {
        self.id
    }
}

impl<P> Clone for Handle<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Handle<P> {}

impl<P> PartialEq for Handle<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Handle<P> {}

impl<P> fmt::Debug for Handle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

/// Distribution level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    /// Device-local
    #[default]
    Local,
    /// Shared with a device group
    Group(u8),
    /// Shared with every device
    Global,
}

impl Level {
    /// Two-bit wire code
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Group(_) => 1,
            Self::Global => 2,
        }
    }
}

/// Property flag set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyFlags(u8);

impl PropertyFlags {
    /// Saved to the blob store
    pub const PERSISTENT: u8 = 1 << 0;
    /// Rejects writes over the update channel
    pub const READONLY: u8 = 1 << 1;
    /// Not shown by default in clients
    pub const HIDDEN: u8 = 1 << 2;
    /// Published over BLE
    pub const BLE_EXPOSED: u8 = 1 << 3;

    /// Empty set
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a flag
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        self.0 |= flag;
        self
    }

    /// Check a flag
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Registration-time metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMeta {
    /// Assigned id
    pub id: PropertyId,
    /// Identifier, unique per registry
    pub name: &'static str,
    /// Human description
    pub description: Option<&'static str>,
    /// Distribution level
    pub level: Level,
    /// Flag set
    pub flags: PropertyFlags,
    /// UI hints
    pub ui: UiHints,
}

impl PropertyMeta {
    /// Persistent flag
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.flags.has(PropertyFlags::PERSISTENT)
    }

    /// Readonly flag
    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.flags.has(PropertyFlags::READONLY)
    }

    /// Hidden flag
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.flags.has(PropertyFlags::HIDDEN)
    }

    /// BLE-exposed flag
    #[must_use]
    pub const fn is_ble_exposed(&self) -> bool {
        self.flags.has(PropertyFlags::BLE_EXPOSED)
    }
}

/// Builder for the metadata half of a registration.
///
/// ```
/// use microproto::property::{Declaration, UiHints, Widget};
///
/// let decl = Declaration::new("brightness")
///     .description("LED brightness")
///     .persistent()
///     .ui(UiHints::new().widget(Widget::SLIDER));
/// assert_eq!(decl.name(), "brightness");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct Declaration {
    name: &'static str,
    description: Option<&'static str>,
    level: Level,
    flags: PropertyFlags,
    ui: UiHints,
}

impl Declaration {
    /// Start a declaration
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            description: None,
            level: Level::Local,
            flags: PropertyFlags::new(),
            ui: UiHints::new(),
        }
    }

    /// Declared name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Human description
    pub fn description(mut self, text: &'static str) -> Self {
        self.description = Some(text);
        self
    }

    /// Distribution level
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Save to the blob store
    pub fn persistent(mut self) -> Self {
        self.flags = self.flags.with(PropertyFlags::PERSISTENT);
        self
    }

    /// Reject writes over the update channel
    pub fn readonly(mut self) -> Self {
        self.flags = self.flags.with(PropertyFlags::READONLY);
        self
    }

    /// Hide from default client views
    pub fn hidden(mut self) -> Self {
        self.flags = self.flags.with(PropertyFlags::HIDDEN);
        self
    }

    /// Publish over BLE
    pub fn ble_exposed(mut self) -> Self {
        self.flags = self.flags.with(PropertyFlags::BLE_EXPOSED);
        self
    }

    /// UI hints
    pub fn ui(mut self, ui: UiHints) -> Self {
        self.ui = ui;
        self
    }

    pub(crate) fn into_meta(self, id: PropertyId) -> PropertyMeta {
        PropertyMeta {
            id,
            name: self.name,
            description: self.description,
            level: self.level,
            flags: self.flags,
            ui: self.ui,
        }
    }
}

/// Records that an accepted mutation changed the stored value.
///
/// Typed setters raise the latch; the registry drains it after each
/// mutation to fire the callback and mark the property dirty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeLatch(bool);

impl ChangeLatch {
    /// Raise the latch
    pub fn raise(&mut self) {
        self.0 = true;
    }

    /// Whether the latch is raised
    #[must_use]
    pub const fn is_raised(&self) -> bool {
        self.0
    }

    /// Lower the latch, returning its previous state
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.0)
    }
}

/// Change callback: a plain function pointer, invoked after every accepted
/// mutation that changed the value.
pub type ChangeCallback = fn(&PropertyMeta, &dyn Property);

/// Object-safe property interface used by the registry and the server.
pub trait Property: Any + Send {
    /// Wire kind
    fn kind(&self) -> ValueKind;

    /// Type definition, including constraints
    fn type_def(&self) -> TypeDef;

    /// Write the current value in on-wire form
    fn encode_value(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError>;

    /// Write the declared default in on-wire form
    fn encode_default(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError>;

    /// Decode a value, validate it and store it.
    ///
    /// Returns `Ok(true)` when the stored value changed. On any error the
    /// property is left untouched.
    fn decode_value(&mut self, input: &mut ReadBuffer<'_>) -> Result<bool>;

    /// Write the persistence blob; the on-wire value by default
    fn save_to_blob(&self, out: &mut WriteBuffer<'_>) -> std::result::Result<(), WireError> {
        self.encode_value(out)
    }

    /// Restore from a persistence blob
    fn load_from_blob(&mut self, input: &mut ReadBuffer<'_>) -> Result<()> {
        self.decode_value(input).map(|_| ())
    }

    /// Lower the change latch, returning whether it was raised
    fn take_change(&mut self) -> bool;

    /// Called once at registration with the final metadata
    fn attach(&mut self, _meta: &PropertyMeta) {}

    /// Resource view, for RESOURCE properties
    fn as_resource(&self) -> Option<&dyn ResourceCollection> {
        None
    }

    /// Mutable resource view, for RESOURCE properties
    fn as_resource_mut(&mut self) -> Option<&mut dyn ResourceCollection> {
        None
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
