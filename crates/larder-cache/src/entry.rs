//! Cache entries

/// Resolved in-memory state of one key.
///
/// A key with no entry at all has not been resolved yet; `ConfirmedAbsent`
/// means the persistent store was checked (or the key deleted through the
/// cache) and holds no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<V> {
    Value(V),
    ConfirmedAbsent,
}

impl<V> CacheEntry<V> {
    pub fn is_absent(&self) -> bool {
        matches!(self, CacheEntry::ConfirmedAbsent)
    }

    pub fn as_value(&self) -> Option<&V> {
        match self {
            CacheEntry::Value(value) => Some(value),
            CacheEntry::ConfirmedAbsent => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            CacheEntry::Value(value) => Some(value),
            CacheEntry::ConfirmedAbsent => None,
        }
    }
}

impl<V> From<Option<V>> for CacheEntry<V> {
    fn from(lookup: Option<V>) -> Self {
        match lookup {
            Some(value) => CacheEntry::Value(value),
            None => CacheEntry::ConfirmedAbsent,
        }
    }
}
