//! 256-bit property id set.

use std::fmt;

use crate::property::PropertyId;

/// Set of property ids, one bit per id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DirtySet([u64; 4]);

impl DirtySet {
    /// Empty set
    #[must_use]
    pub const fn new() -> Self {
        Self([0; 4])
    }

    /// Add `id`
    pub fn insert(&mut self, id: PropertyId) {
        self.0[usize::from(id >> 6)] |= 1 << (id & 63);
    }

    /// Remove `id`
    pub fn remove(&mut self, id: PropertyId) {
        self.0[usize::from(id >> 6)] &= !(1 << (id & 63));
    }

    /// Membership test
    #[must_use]
    pub const fn contains(&self, id: PropertyId) -> bool {
        self.0[(id >> 6) as usize] & (1 << (id & 63)) != 0
    }

    /// `true` when no id is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Number of ids set
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Remove every id
    pub fn clear(&mut self) {
        self.0 = [0; 4];
    }

    /// Add every id of `other`
    pub fn union_with(&mut self, other: &Self) {
        for (word, theirs) in self.0.iter_mut().zip(other.0) {
            *word |= theirs;
        }
    }

    /// Ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = PropertyId> + '_ {
        (0..=u8::MAX).filter(move |id| self.contains(*id))
    }
}

impl FromIterator<PropertyId> for DirtySet {
    fn from_iter<I: IntoIterator<Item = PropertyId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for DirtySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
