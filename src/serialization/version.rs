//! Packed data versions
//!
//! ```text
//! bit   47        32 31        16 15         0
//!      ┌────────────┬────────────┬────────────┐
//!      │hash version│key version │value vers. │
//!      └────────────┴────────────┴────────────┘
//! ```

/// Independent format versions of the hash, key and value in a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataVersion {
    pub hash: u16,
    pub key: u16,
    pub value: u16,
}

impl DataVersion {
    pub const fn new(hash: u16, key: u16, value: u16) -> Self {
        Self { hash, key, value }
    }

    pub const fn pack(&self) -> u64 {
        ((self.hash as u64) << 32) | ((self.key as u64) << 16) | self.value as u64
    }

    pub const fn unpack(packed: u64) -> Self {
        Self {
            hash: ((packed >> 32) & 0xFFFF) as u16,
            key: ((packed >> 16) & 0xFFFF) as u16,
            value: (packed & 0xFFFF) as u16,
        }
    }
}

impl From<u64> for DataVersion {
    fn from(packed: u64) -> Self {
        Self::unpack(packed)
    }
}

impl From<DataVersion> for u64 {
    fn from(version: DataVersion) -> Self {
        version.pack()
    }
}
