//! Immutable key sets handed from one extraction stage to the next.

use std::borrow::Borrow;
use std::collections::BTreeSet;

/// Set of surviving identifiers produced by a stage.
///
/// Backed by a `BTreeSet` so iteration order never depends on hashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySet<K: Ord> {
    keys: BTreeSet<K>,
}

impl<K: Ord> KeySet<K> {
    pub fn empty() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }
}

impl<K: Ord> Default for KeySet<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Ord> FromIterator<K> for KeySet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
