//! Record keys, values and ordered batch results

use rusqlite::types::{FromSql, ToSql};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A value usable as a storage-engine key (`String`, `i64`, ...).
pub trait RecordKey: ToSql + FromSql + Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> RecordKey for T where T: ToSql + FromSql + Clone + Eq + Hash + Debug + Send + Sync + 'static
{}

/// A value stored in a record. Persisted as JSON text.
pub trait RecordValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> RecordValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Result of a batched read: every requested key, in request order, mapped
/// to its value or `None` when no record exists.
///
/// Repeated keys keep the position of their first occurrence.
#[derive(Debug, Clone)]
pub struct BatchResult<K, V> {
    entries: Vec<(K, Option<V>)>,
    index: HashMap<K, usize>,
}

impl<K: RecordKey, V> BatchResult<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: K, value: Option<V>) {
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// `None` when the key was not part of the batch, `Some(None)` when it
    /// was requested but has no record.
    pub fn get(&self, key: &K) -> Option<Option<&V>> {
        self.index
            .get(key)
            .map(|&pos| self.entries[pos].1.as_ref())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&V>> {
        self.entries.iter().map(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Option<&V>)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }
}

impl<K: RecordKey, V> FromIterator<(K, Option<V>)> for BatchResult<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = Self::with_capacity(iter.size_hint().0);
        for (key, value) in iter {
            batch.insert(key, value);
        }
        batch
    }
}

impl<K, V> IntoIterator for BatchResult<K, V> {
    type Item = (K, Option<V>);
    type IntoIter = std::vec::IntoIter<(K, Option<V>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
