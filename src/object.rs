//! Keyed mapping passed between stages of the engine.
//!
//! An [`Object<T>`] maps input names ([`Keyword`]s) to values. Producers extend
//! their own working copy one key at a time and hand out clones, so a consumer
//! can keep a past snapshot while the producer keeps mutating.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Name of an entry in an [`Object`].
pub type Keyword = String;

/// Mapping from [`Keyword`] to `T` with value semantics.
///
/// Key order carries no meaning; a sorted map is used so that debug output and
/// serialized snapshots are stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object<T> {
    entries: BTreeMap<Keyword, T>,
}

impl<T> Default for Object<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Object<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<Keyword>, value: T) -> Option<T> {
        self.entries.insert(key.into(), value)
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<Keyword>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Keyword> {
        self.entries.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Keyword, T> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Object<T> {
    /// Return a copy of `self` extended with every entry of `other`.
    ///
    /// Values from `other` win on overlapping keys.
    #[must_use]
    pub fn concat(&self, other: &Object<T>) -> Object<T> {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.entries.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl<T: PartialEq> Object<T> {
    /// First key present in both objects with differing values, if any.
    pub fn conflicts_with<'a>(&'a self, other: &Object<T>) -> Option<&'a Keyword> {
        self.entries
            .iter()
            .find(|(k, v)| other.get(k).is_some_and(|ov| ov != *v))
            .map(|(k, _)| k)
    }

    /// Two objects are compatible when they agree on every shared key.
    ///
    /// Keys present on only one side never conflict.
    #[must_use]
    pub fn is_compatible(&self, other: &Object<T>) -> bool {
        self.conflicts_with(other).is_none()
    }
}

impl<K: Into<Keyword>, T> FromIterator<(K, T)> for Object<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<T> IntoIterator for Object<T> {
    type Item = (Keyword, T);
    type IntoIter = btree_map::IntoIter<Keyword, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Object<T> {
    type Item = (&'a Keyword, &'a T);
    type IntoIter = btree_map::Iter<'a, Keyword, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
