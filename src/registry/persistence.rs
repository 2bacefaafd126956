//! Persistence subscriber.
//!
//! Saves persistent properties to a key-value [`BlobStore`] under keys
//! `"p{id}"`. Each property is written once it has been quiet for
//! [`PersistenceConfig::debounce`], so a slider drag produces one write.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{Error, Result, WireError, WriteBuffer};

use super::{DirtySet, Interest, MAX_PROPERTIES, PropertySystem, SubscriberId};

/// Blob store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No blob under this key
    #[error("no blob stored under {key}")]
    NotFound {
        /// Requested key
        key: String,
    },

    /// Blob does not fit the buffer or the configured limit
    #[error("blob of {size} bytes exceeds {max}")]
    TooLarge {
        /// Blob size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Backend failure
    #[error("storage backend failure: {reason}")]
    Backend {
        /// What failed
        reason: &'static str,
    },
}

/// Key-value backend for property blobs.
pub trait BlobStore {
    /// Create or replace the blob under `key`
    fn save_blob(&mut self, key: &str, bytes: &[u8]) -> std::result::Result<(), StorageError>;

    /// Copy the blob under `key` into `buf`, returning its length
    fn load_blob(&self, key: &str, buf: &mut [u8]) -> std::result::Result<usize, StorageError>;
}

/// Heap-backed blob store for hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Vec<u8>>,
    writes: usize,
}

impl MemoryBlobStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored blob
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.blobs.get(key).map(Vec::as_slice)
    }

    /// Number of `save_blob` calls so far
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl BlobStore for MemoryBlobStore {
    fn save_blob(&mut self, key: &str, bytes: &[u8]) -> std::result::Result<(), StorageError> {
        self.writes += 1;
        self.blobs.insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn load_blob(&self, key: &str, buf: &mut [u8]) -> std::result::Result<usize, StorageError> {
        let blob = self.blobs.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_owned(),
        })?;
        let max = buf.len();
        let target = buf.get_mut(..blob.len()).ok_or(StorageError::TooLarge {
            size: blob.len(),
            max,
        })?;
        target.copy_from_slice(blob);
        Ok(blob.len())
    }
}

/// Storage key for property `id`
#[must_use]
pub fn blob_key(id: u16) -> String {
    format!("p{id}")
}

/// Persistence tuning
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistenceConfig {
    /// Quiet period after the last change before a property is written
    pub debounce: Duration,

    /// Largest blob a property may produce
    pub max_blob_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            max_blob_size: 4096,
        }
    }
}

/// Debounced writer of persistent properties.
#[derive(Debug)]
pub struct Persistence<S: BlobStore> {
    store: S,
    config: PersistenceConfig,
    subscriber: SubscriberId,
    pending: DirtySet,
    last_change: Vec<Option<Instant>>,
}

impl<S: BlobStore> Persistence<S> {
    /// Subscribe to the persistence-dirty set of `system`
    pub fn new(system: &mut PropertySystem, store: S, config: PersistenceConfig) -> Result<Self> {
        let subscriber = system.subscribe(Interest::Persistence)?;
        Ok(Self {
            store,
            config,
            subscriber,
            pending: DirtySet::new(),
            last_change: vec![None; MAX_PROPERTIES],
        })
    }

    /// Backend
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Properties waiting for their debounce to expire
    #[must_use]
    pub const fn pending(&self) -> &DirtySet {
        &self.pending
    }

    fn collect(&mut self, system: &mut PropertySystem, now: Instant) {
        for id in system.take_pending(self.subscriber).iter() {
            self.pending.insert(id);
            self.last_change[usize::from(id)] = Some(now);
        }
    }

    /// Write properties whose debounce expired at `now`. Returns the
    /// number written.
    pub fn tick(&mut self, system: &mut PropertySystem, now: Instant) -> usize {
        self.collect(system, now);
        let due: Vec<u8> = self
            .pending
            .iter()
            .filter(|id| {
                self.last_change[usize::from(*id)]
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.debounce)
            })
            .collect();
        due.into_iter()
            .filter(|id| self.write(system, *id))
            .count()
    }

    /// Write every pending property now, ignoring the debounce
    pub fn flush_all(&mut self, system: &mut PropertySystem) -> usize {
        self.collect(system, Instant::now());
        let due: Vec<u8> = self.pending.iter().collect();
        due.into_iter()
            .filter(|id| self.write(system, *id))
            .count()
    }

    fn write(&mut self, system: &PropertySystem, id: u8) -> bool {
        self.pending.remove(id);
        self.last_change[usize::from(id)] = None;
        match self.save(system, u16::from(id)) {
            Ok(()) => true,
            Err(err) => {
                warn!(property = id, error = %err, "failed to persist property");
                false
            }
        }
    }

    /// Write one property immediately
    pub fn save(&mut self, system: &PropertySystem, id: u16) -> Result<()> {
        let mut storage = vec![0u8; self.config.max_blob_size];
        let mut out = WriteBuffer::new(&mut storage);
        system.save(id, &mut out).map_err(|err| match err {
            WireError::Overflow => Error::Storage(StorageError::TooLarge {
                size: self.config.max_blob_size + 1,
                max: self.config.max_blob_size,
            }),
            other => other.into(),
        })?;
        let blob = out.finish()?;
        self.store.save_blob(&blob_key(id), blob)?;
        debug!(property = id, size = blob.len(), "property persisted");
        Ok(())
    }

    /// Write every persistent property. Returns the number written.
    pub fn save_all(&mut self, system: &PropertySystem) -> Result<usize> {
        let ids: Vec<u16> = system
            .iter()
            .filter(|(meta, _)| meta.is_persistent())
            .map(|(meta, _)| u16::from(meta.id))
            .collect();
        for id in &ids {
            self.save(system, *id)?;
        }
        Ok(ids.len())
    }

    /// Restore every persistent property that has a stored blob. Values
    /// load silently; a blob that fails to load leaves the default in
    /// place. Returns the number restored.
    pub fn load_all(&mut self, system: &mut PropertySystem) -> usize {
        let ids: Vec<u16> = system
            .iter()
            .filter(|(meta, _)| meta.is_persistent())
            .map(|(meta, _)| u16::from(meta.id))
            .collect();
        let mut buf = vec![0u8; self.config.max_blob_size];
        let mut loaded = 0;
        for id in ids {
            let len = match self.store.load_blob(&blob_key(id), &mut buf) {
                Ok(len) => len,
                Err(StorageError::NotFound { .. }) => continue,
                Err(err) => {
                    warn!(property = id, error = %err, "failed to read stored blob");
                    continue;
                }
            };
            match system.load(id, &buf[..len]) {
                Ok(()) => loaded += 1,
                Err(err) => warn!(property = id, error = %err, "stored blob rejected, keeping default"),
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Declaration, Handle, ListProperty, ScalarProperty};

    fn setup() -> (
        PropertySystem,
        Handle<ScalarProperty<u8>>,
        Handle<ListProperty<u8, 8>>,
    ) {
        let mut system = PropertySystem::new();
        let brightness = system
            .register(Declaration::new("brightness").persistent(), ScalarProperty::new(128u8))
            .unwrap();
        system
            .register(Declaration::new("volatile"), ScalarProperty::new(0u8))
            .unwrap();
        let name = system
            .register(Declaration::new("name").persistent(), ListProperty::<u8, 8>::new())
            .unwrap();
        (system, brightness, name)
    }

    #[test]
    fn test_debounce() {
        let (mut system, brightness, _) = setup();
        let mut persistence =
            Persistence::new(&mut system, MemoryBlobStore::new(), PersistenceConfig::default())
                .unwrap();
        let start = Instant::now();

        system.set(brightness, 10).unwrap();
        system.flush_tick();
        assert_eq!(persistence.tick(&mut system, start), 0);

        system.set(brightness, 20).unwrap();
        system.flush_tick();
        let later = start + Duration::from_millis(500);
        assert_eq!(persistence.tick(&mut system, later), 0);

        assert_eq!(persistence.tick(&mut system, later + Duration::from_millis(999)), 0);
        assert_eq!(persistence.tick(&mut system, later + Duration::from_secs(1)), 1);
        assert_eq!(persistence.store().get("p0"), Some(&[20u8][..]));
        assert_eq!(persistence.store().writes(), 1);
    }

    #[test]
    fn test_volatile_properties_ignored() {
        let (mut system, _, _) = setup();
        let mut persistence =
            Persistence::new(&mut system, MemoryBlobStore::new(), PersistenceConfig::default())
                .unwrap();
        system.set_from_wire(1, &[5]).unwrap();
        system.flush_tick();
        assert_eq!(persistence.flush_all(&mut system), 0);
        assert!(persistence.store().get("p1").is_none());
    }

    #[test]
    fn test_save_and_load_all() {
        let (mut system, brightness, name) = setup();
        let mut persistence =
            Persistence::new(&mut system, MemoryBlobStore::new(), PersistenceConfig::default())
                .unwrap();
        system.set(brightness, 42).unwrap();
        system.modify(name, |p| p.set_str("desk")).unwrap().unwrap();
        assert_eq!(persistence.save_all(&system).unwrap(), 2);
        let store = persistence.store().clone();

        let (mut fresh, brightness, name) = setup();
        let mut restore = Persistence::new(&mut fresh, store, PersistenceConfig::default()).unwrap();
        assert_eq!(restore.load_all(&mut fresh), 2);
        assert_eq!(fresh.value(brightness), Some(42));
        assert_eq!(fresh.get(name).unwrap().as_str(), Some("desk"));
        assert!(fresh.dirty().is_empty());
    }

    #[test]
    fn test_blob_too_large() {
        let (mut system, _, name) = setup();
        let config = PersistenceConfig {
            max_blob_size: 3,
            ..PersistenceConfig::default()
        };
        let mut persistence =
            Persistence::new(&mut system, MemoryBlobStore::new(), config).unwrap();
        system.modify(name, |p| p.set_str("long")).unwrap().unwrap();
        assert!(matches!(
            persistence.save(&system, 2),
            Err(Error::Storage(StorageError::TooLarge { max: 3, .. }))
        ));
    }

    #[test]
    fn test_load_into_short_buffer() {
        let mut store = MemoryBlobStore::new();
        store.save_blob("p1", &[1, 2, 3, 4]).unwrap();

        let mut short = [0u8; 2];
        assert_eq!(
            store.load_blob("p1", &mut short),
            Err(StorageError::TooLarge { size: 4, max: 2 })
        );
        assert_eq!(short, [0, 0]);

        let mut buf = [0u8; 8];
        assert_eq!(store.load_blob("p1", &mut buf), Ok(4));
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_blob_keys() {
        assert_eq!(blob_key(0), "p0");
        assert_eq!(blob_key(255), "p255");
    }
}
