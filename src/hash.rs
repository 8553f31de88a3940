//! Merkle node hash value
//!
//! Hashes are computed by the Merkle layer; the engine only stores them.

use std::fmt;

use crate::error::{Result, VirtDbError};

/// Size in bytes of every stored hash (SHA-384 digest)
pub const HASH_SIZE: usize = 48;

/// A fixed-size Merkle node hash
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice that must be exactly HASH_SIZE long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            VirtDbError::Serialization(format!(
                "hash must be {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first 6 bytes are plenty to tell hashes apart in logs
        write!(f, "Hash(")?;
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}
