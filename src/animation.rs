//! LED animation engine surface.
//!
//! Declares the engine's tunables on a [`PropertySystem`] and keeps the
//! active shader script loaded. Shaders are entries of a RESOURCE
//! collection: the header holds a zero-padded name, the body the script.

use tracing::{debug, info, warn};

use crate::property::{
    Declaration, Handle, ResourceCollection, ResourceError, ResourceProperty, ScalarProperty,
    UiHints, ValueConstraints, Widget,
};
use crate::protocol::{Error, Result};
use crate::registry::PropertySystem;
use crate::store::ResourceBodyStore;

/// Shader slots
pub const MAX_SHADERS: usize = 8;

/// Shader name header size
pub const SHADER_NAME_LEN: usize = 16;

/// Speed change applied by [`AnimationEngine::faster`] and
/// [`AnimationEngine::slower`]
pub const SPEED_STEP: u8 = 10;

/// Highest speed
pub const MAX_SPEED: u8 = 100;

/// Shader collection type
pub type Shaders = ResourceProperty<MAX_SHADERS, SHADER_NAME_LEN>;

/// Script of the active shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedShader {
    /// Resource id
    pub id: u32,
    /// Body version the script was read at
    pub version: u32,
    /// Name from the header
    pub name: String,
    /// Script bytes
    pub script: Vec<u8>,
}

/// Pad `name` into a shader header, truncating past [`SHADER_NAME_LEN`]
#[must_use]
pub fn shader_header(name: &str) -> [u8; SHADER_NAME_LEN] {
    let mut header = [0u8; SHADER_NAME_LEN];
    let len = name.len().min(SHADER_NAME_LEN);
    header[..len].copy_from_slice(&name.as_bytes()[..len]);
    header
}

/// Name stored in a shader header
#[must_use]
pub fn shader_name(header: &[u8]) -> String {
    let end = header.iter().position(|&b| b == 0).unwrap_or(header.len());
    String::from_utf8_lossy(&header[..end]).into_owned()
}

/// Handles to the engine's properties plus the loaded script.
#[derive(Debug)]
pub struct AnimationEngine {
    brightness: Handle<ScalarProperty<u8>>,
    speed: Handle<ScalarProperty<u8>>,
    active_shader: Handle<ScalarProperty<i32>>,
    shaders: Handle<Shaders>,
    loaded: Option<LoadedShader>,
}

impl AnimationEngine {
    /// Register `brightness`, `speed`, `active_shader` and `shaders`
    pub fn register(system: &mut PropertySystem) -> Result<Self> {
        let brightness = system.register(
            Declaration::new("brightness")
                .description("LED brightness")
                .persistent()
                .ui(UiHints::new().widget(Widget::SLIDER).unit("%")),
            ScalarProperty::new(128u8),
        )?;
        let speed = system.register(
            Declaration::new("speed")
                .description("Animation speed")
                .persistent()
                .ui(UiHints::new().widget(Widget::SLIDER)),
            ScalarProperty::new(50u8)
                .with_constraints(ValueConstraints::new().range(0u8, MAX_SPEED)),
        )?;
        let active_shader = system.register(
            Declaration::new("active_shader")
                .description("Resource id of the running shader, 0 for none")
                .persistent(),
            ScalarProperty::new(0i32).with_constraints(ValueConstraints::new().min(0i32)),
        )?;
        let shaders = system.register(
            Declaration::new("shaders").description("Shader scripts"),
            Shaders::new(),
        )?;
        Ok(Self {
            brightness,
            speed,
            active_shader,
            shaders,
            loaded: None,
        })
    }

    /// `brightness` handle
    #[must_use]
    pub const fn brightness(&self) -> Handle<ScalarProperty<u8>> {
        self.brightness
    }

    /// `speed` handle
    #[must_use]
    pub const fn speed(&self) -> Handle<ScalarProperty<u8>> {
        self.speed
    }

    /// `active_shader` handle
    #[must_use]
    pub const fn active_shader(&self) -> Handle<ScalarProperty<i32>> {
        self.active_shader
    }

    /// `shaders` handle
    #[must_use]
    pub const fn shaders(&self) -> Handle<Shaders> {
        self.shaders
    }

    /// Script loaded by the last [`load_active`](Self::load_active)
    #[must_use]
    pub const fn loaded(&self) -> Option<&LoadedShader> {
        self.loaded.as_ref()
    }

    fn collection<'a>(&self, system: &'a PropertySystem) -> Result<&'a Shaders> {
        system.get(self.shaders).ok_or(Error::UnknownProperty {
            id: u16::from(self.shaders.id()),
        })
    }

    fn active_id(&self, system: &PropertySystem) -> Option<u32> {
        let id = system.value(self.active_shader)?;
        u32::try_from(id).ok().filter(|&id| id != 0)
    }

    /// Store a new shader; returns its resource id
    pub fn add_shader(
        &self,
        system: &mut PropertySystem,
        store: &mut dyn ResourceBodyStore,
        name: &str,
        script: &[u8],
    ) -> Result<u32> {
        let header = shader_header(name);
        let id = system.modify(self.shaders, |shaders| shaders.create(&header, script, store))??;
        debug!(id, name, len = script.len(), "shader added");
        Ok(id)
    }

    /// Resource ids of the stored shaders, ascending
    pub fn shader_ids(&self, system: &PropertySystem) -> Result<Vec<u32>> {
        let mut ids = self.collection(system)?.ids();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Point `active_shader` at `id`
    pub fn select(&self, system: &mut PropertySystem, id: u32) -> Result<bool> {
        let value = i32::try_from(id).map_err(|_| Error::OutOfRange {
            index: id as usize,
            len: i32::MAX as usize,
        })?;
        if self.collection(system)?.header(id).is_none() {
            return Err(ResourceError::NotFound { id }.into());
        }
        system.set(self.active_shader, value)
    }

    /// Read the active shader's script.
    ///
    /// A header whose body is gone is cleared from the collection and the
    /// selection falls back to none. Returns `None` when nothing is active.
    pub fn load_active(
        &mut self,
        system: &mut PropertySystem,
        store: &dyn ResourceBodyStore,
    ) -> Result<Option<&LoadedShader>> {
        let Some(id) = self.active_id(system) else {
            self.loaded = None;
            return Ok(None);
        };
        if self.loaded.as_ref().is_some_and(|loaded| {
            self.collection(system)
                .ok()
                .and_then(|shaders| shaders.header(id))
                .is_some_and(|header| header.id == loaded.id && header.version == loaded.version)
        }) {
            return Ok(self.loaded.as_ref());
        }

        let shaders = self.collection(system)?;
        let Some(header) = shaders.header(id) else {
            warn!(id, "active shader missing, clearing selection");
            system.set(self.active_shader, 0)?;
            self.loaded = None;
            return Ok(None);
        };
        let name = shaders.header_data(id).map(shader_name).unwrap_or_default();

        let mut script = vec![0u8; header.body_size as usize];
        let read = shaders.read_body(id, &mut script, store);
        if !store.body_exists(shaders.name(), id) || read != script.len() {
            warn!(id, name = %name, "shader body missing, removing orphans");
            system.modify(self.shaders, |shaders| shaders.remove_orphans(store))?;
            system.set(self.active_shader, 0)?;
            self.loaded = None;
            return Ok(None);
        }

        info!(id, name = %name, len = read, "shader loaded");
        self.loaded = Some(LoadedShader {
            id,
            version: header.version,
            name,
            script,
        });
        Ok(self.loaded.as_ref())
    }

    fn step(&self, system: &mut PropertySystem, forward: bool) -> Result<Option<u32>> {
        let ids = self.shader_ids(system)?;
        let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
            system.set(self.active_shader, 0)?;
            return Ok(None);
        };
        let target = match self.active_id(system) {
            None => {
                if forward {
                    first
                } else {
                    last
                }
            }
            Some(current) if forward => ids.iter().copied().find(|&id| id > current).unwrap_or(first),
            Some(current) => ids
                .iter()
                .rev()
                .copied()
                .find(|&id| id < current)
                .unwrap_or(last),
        };
        self.select(system, target)?;
        Ok(Some(target))
    }

    /// Select the shader after the active one, wrapping around
    pub fn next(&self, system: &mut PropertySystem) -> Result<Option<u32>> {
        self.step(system, true)
    }

    /// Select the shader before the active one, wrapping around
    pub fn previous(&self, system: &mut PropertySystem) -> Result<Option<u32>> {
        self.step(system, false)
    }

    /// Raise speed by one step, saturating at [`MAX_SPEED`]
    pub fn faster(&self, system: &mut PropertySystem) -> Result<bool> {
        let speed = system.value(self.speed).unwrap_or_default();
        system.set(self.speed, speed.saturating_add(SPEED_STEP).min(MAX_SPEED))
    }

    /// Lower speed by one step, saturating at zero
    pub fn slower(&self, system: &mut PropertySystem) -> Result<bool> {
        let speed = system.value(self.speed).unwrap_or_default();
        system.set(self.speed, speed.saturating_sub(SPEED_STEP))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBodyStore;

    fn engine() -> (PropertySystem, AnimationEngine, MemoryBodyStore) {
        let mut system = PropertySystem::new();
        let engine = AnimationEngine::register(&mut system).unwrap();
        (system, engine, MemoryBodyStore::new())
    }

    #[test]
    fn test_registers_properties() {
        let (system, engine, _) = engine();
        assert_eq!(system.len(), 4);
        assert_eq!(system.id_of("brightness"), Some(engine.brightness().id()));
        assert!(system.meta(0).unwrap().is_persistent());
        assert_eq!(system.resource(3).unwrap().header_size(), SHADER_NAME_LEN);
    }

    #[test]
    fn test_header_name() {
        let header = shader_header("rainbow");
        assert_eq!(&header[..7], b"rainbow");
        assert_eq!(shader_name(&header), "rainbow");
        assert_eq!(shader_name(&shader_header("a_very_long_shader_name")).len(), 16);
    }

    #[test]
    fn test_load_active() {
        let (mut system, mut engine, mut store) = engine();
        assert_eq!(engine.load_active(&mut system, &store).unwrap(), None);

        let id = engine
            .add_shader(&mut system, &mut store, "fire", b"return 1")
            .unwrap();
        engine.select(&mut system, id).unwrap();
        let loaded = engine.load_active(&mut system, &store).unwrap().unwrap();
        assert_eq!(loaded.name, "fire");
        assert_eq!(loaded.script, b"return 1");
    }

    #[test]
    fn test_orphan_cleared_on_load() {
        let (mut system, mut engine, mut store) = engine();
        let id = engine
            .add_shader(&mut system, &mut store, "fire", b"x")
            .unwrap();
        engine.select(&mut system, id).unwrap();
        store.delete_body("shaders", id);

        assert_eq!(engine.load_active(&mut system, &store).unwrap(), None);
        assert!(engine.shader_ids(&system).unwrap().is_empty());
        assert_eq!(system.value(engine.active_shader()), Some(0));
    }

    #[test]
    fn test_next_previous_wrap() {
        let (mut system, engine, mut store) = engine();
        assert_eq!(engine.next(&mut system).unwrap(), None);

        let a = engine.add_shader(&mut system, &mut store, "a", b"1").unwrap();
        let b = engine.add_shader(&mut system, &mut store, "b", b"2").unwrap();
        let c = engine.add_shader(&mut system, &mut store, "c", b"3").unwrap();

        assert_eq!(engine.next(&mut system).unwrap(), Some(a));
        assert_eq!(engine.next(&mut system).unwrap(), Some(b));
        assert_eq!(engine.next(&mut system).unwrap(), Some(c));
        assert_eq!(engine.next(&mut system).unwrap(), Some(a));
        assert_eq!(engine.previous(&mut system).unwrap(), Some(c));

        system
            .modify(engine.shaders(), |s| s.delete(b, &mut store))
            .unwrap()
            .unwrap();
        assert_eq!(engine.previous(&mut system).unwrap(), Some(a));
        assert_eq!(engine.next(&mut system).unwrap(), Some(c));
    }

    #[test]
    fn test_speed_steps_saturate() {
        let (mut system, engine, _) = engine();
        for _ in 0..10 {
            engine.faster(&mut system).unwrap();
        }
        assert_eq!(system.value(engine.speed()), Some(MAX_SPEED));
        assert!(!engine.faster(&mut system).unwrap());
        for _ in 0..20 {
            engine.slower(&mut system).unwrap();
        }
        assert_eq!(system.value(engine.speed()), Some(0));
    }

    #[test]
    fn test_select_unknown_shader() {
        let (mut system, engine, _) = engine();
        assert!(matches!(engine.select(&mut system, 9), Err(Error::Resource(_))));
    }

    #[test]
    fn test_select_id_beyond_i32() {
        let (mut system, engine, _) = engine();
        let id = u32::try_from(i32::MAX).unwrap() + 1;
        assert!(matches!(
            engine.select(&mut system, id),
            Err(Error::OutOfRange { index, .. }) if index == id as usize
        ));
        assert_eq!(system.value(engine.active_shader()), Some(0));
    }
}
