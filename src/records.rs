//! Records exchanged with the Merkle layer

use crate::hash::Hash;

/// Sentinel path meaning "no path"
pub const INVALID_PATH: i64 = -1;

/// A tree leaf: its position, hash, key and value
#[derive(Debug, Clone, PartialEq)]
pub struct LeafRecord<K, V> {
    pub path: i64,
    pub hash: Hash,
    pub key: K,
    pub value: V,
}

impl<K, V> LeafRecord<K, V> {
    pub fn new(path: i64, hash: Hash, key: K, value: V) -> Self {
        Self {
            path,
            hash,
            key,
            value,
        }
    }
}

/// A non-leaf tree node: only a path and a hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalRecord {
    pub path: i64,
    pub hash: Hash,
}

impl InternalRecord {
    pub fn new(path: i64, hash: Hash) -> Self {
        Self { path, hash }
    }
}

/// Inclusive range of valid keys (paths) for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min_valid_key: i64,
    pub max_valid_key: i64,
}

impl KeyRange {
    /// The range of an empty tree: nothing is within it
    pub const INVALID: KeyRange = KeyRange {
        min_valid_key: INVALID_PATH,
        max_valid_key: INVALID_PATH,
    };

    /// Every non-negative key is valid
    pub const UNBOUNDED: KeyRange = KeyRange {
        min_valid_key: 0,
        max_valid_key: i64::MAX,
    };

    pub fn new(min_valid_key: i64, max_valid_key: i64) -> Self {
        Self {
            min_valid_key,
            max_valid_key,
        }
    }

    pub fn within_range(&self, key: i64) -> bool {
        key >= 0 && key >= self.min_valid_key && key <= self.max_valid_key
    }
}
