//! Resource body storage.
//!
//! Bodies live outside the property, keyed by `(property name, resource
//! id)`. The core reaches them only through [`ResourceBodyStore`]; every
//! operation is synchronous and caller-buffered.

use std::collections::HashMap;

use thiserror::Error;

/// Body store failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStoreError {
    /// Not enough space for the body
    #[error("body store out of space")]
    OutOfSpace,

    /// Backend I/O failure
    #[error("body store I/O failure")]
    Io,
}

/// Backend for resource bodies.
pub trait ResourceBodyStore {
    /// Create or replace a body
    fn write_body(&mut self, property: &str, id: u32, body: &[u8]) -> Result<(), BodyStoreError>;

    /// Copy a body into `buf`; returns bytes copied, `0` on a miss
    fn read_body(&self, property: &str, id: u32, buf: &mut [u8]) -> usize;

    /// Remove a body; `false` when nothing was stored
    fn delete_body(&mut self, property: &str, id: u32) -> bool;

    /// Whether a body is stored
    fn body_exists(&self, property: &str, id: u32) -> bool;

    /// Stored body size
    fn body_size(&self, property: &str, id: u32) -> Option<usize>;
}

/// Heap-backed body store for hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBodyStore {
    bodies: HashMap<(String, u32), Vec<u8>>,
    capacity: Option<usize>,
}

impl MemoryBodyStore {
    /// Unbounded store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `bytes` of body data in total
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bodies: HashMap::new(),
            capacity: Some(bytes),
        }
    }

    /// Total stored bytes
    #[must_use]
    pub fn used(&self) -> usize {
        self.bodies.values().map(Vec::len).sum()
    }

    /// Number of stored bodies
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// `true` when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    fn key(property: &str, id: u32) -> (String, u32) {
        (property.to_owned(), id)
    }
}

impl ResourceBodyStore for MemoryBodyStore {
    fn write_body(&mut self, property: &str, id: u32, body: &[u8]) -> Result<(), BodyStoreError> {
        let key = Self::key(property, id);
        if let Some(capacity) = self.capacity {
            let replaced = self.bodies.get(&key).map_or(0, Vec::len);
            if self.used() - replaced + body.len() > capacity {
                return Err(BodyStoreError::OutOfSpace);
            }
        }
        self.bodies.insert(key, body.to_vec());
        Ok(())
    }

    fn read_body(&self, property: &str, id: u32, buf: &mut [u8]) -> usize {
        self.bodies.get(&Self::key(property, id)).map_or(0, |body| {
            let len = body.len().min(buf.len());
            buf[..len].copy_from_slice(&body[..len]);
            len
        })
    }

    fn delete_body(&mut self, property: &str, id: u32) -> bool {
        self.bodies.remove(&Self::key(property, id)).is_some()
    }

    fn body_exists(&self, property: &str, id: u32) -> bool {
        self.bodies.contains_key(&Self::key(property, id))
    }

    fn body_size(&self, property: &str, id: u32) -> Option<usize> {
        self.bodies.get(&Self::key(property, id)).map(Vec::len)
    }
}
