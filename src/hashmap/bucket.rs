//! Hash map buckets
//!
//! ## Bucket Layout
//! ```text
//! ┌──────────────────┬────────────┬─────────────────────────────────────────┐
//! │ bucket index u64 │ count u32  │ count x [hash u32][value i64][len u32]  │
//! │                  │            │         [key bytes]                     │
//! └──────────────────┴────────────┴─────────────────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, VirtDbError};
use crate::serialization::{DataItemHeader, DataItemSerializer};

const BUCKET_HEADER_SIZE: usize = 12;
const ENTRY_HEADER_SIZE: usize = 16;
const BUCKET_FORMAT_VERSION: u64 = 1;

/// One `key -> value` pair in a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    pub hash_code: u32,
    pub value: i64,
    /// The key's serialized bytes
    pub key: Bytes,
}

/// All entries whose keys hash to the same bucket index
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bucket {
    pub index: u32,
    pub entries: Vec<BucketEntry>,
}

impl Bucket {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            entries: Vec::new(),
        }
    }

    pub fn find(&self, hash_code: u32, key: &[u8]) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.hash_code == hash_code && e.key.as_ref() == key)
            .map(|e| e.value)
    }

    /// Insert or overwrite the value for `key`
    pub fn put(&mut self, hash_code: u32, key: Bytes, value: i64) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.hash_code == hash_code && e.key == key)
        {
            Some(entry) => entry.value = value,
            None => self.entries.push(BucketEntry {
                hash_code,
                value,
                key,
            }),
        }
    }

    /// Returns whether the key was present
    pub fn remove(&mut self, hash_code: u32, key: &[u8]) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.hash_code == hash_code && e.key.as_ref() == key));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stores buckets in data files keyed by bucket index
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketSerializer;

impl DataItemSerializer for BucketSerializer {
    type Item = Bucket;

    fn data_version(&self) -> u64 {
        BUCKET_FORMAT_VERSION
    }

    fn read_header(&self, data: &[u8]) -> Result<DataItemHeader> {
        if data.len() < BUCKET_HEADER_SIZE {
            return Err(truncated(data.len()));
        }
        let key = u64::from_le_bytes(fixed(&data[0..8]));
        let count = u32::from_le_bytes(fixed(&data[8..12]));

        let mut pos = BUCKET_HEADER_SIZE;
        for _ in 0..count {
            let header = data
                .get(pos..pos + ENTRY_HEADER_SIZE)
                .ok_or_else(|| truncated(data.len()))?;
            let key_len = u32::from_le_bytes(fixed(&header[12..16])) as usize;
            pos += ENTRY_HEADER_SIZE + key_len;
            if pos > data.len() {
                return Err(truncated(data.len()));
            }
        }
        Ok(DataItemHeader {
            size_bytes: pos,
            key,
        })
    }

    fn serialize(&self, bucket: &Bucket, buf: &mut BytesMut) -> Result<()> {
        let count = u32::try_from(bucket.entries.len()).map_err(|_| {
            VirtDbError::IllegalState(format!("bucket {} has too many entries", bucket.index))
        })?;
        buf.put_u64_le(bucket.index as u64);
        buf.put_u32_le(count);
        for entry in &bucket.entries {
            buf.put_u32_le(entry.hash_code);
            buf.put_i64_le(entry.value);
            buf.put_u32_le(entry.key.len() as u32);
            buf.put_slice(&entry.key);
        }
        Ok(())
    }

    fn deserialize(&self, data: &[u8], _data_version: u64) -> Result<Bucket> {
        let header = self.read_header(data)?;
        let count = u32::from_le_bytes(fixed(&data[8..12])) as usize;
        let mut bucket = Bucket {
            index: header.key as u32,
            entries: Vec::with_capacity(count),
        };

        let mut pos = BUCKET_HEADER_SIZE;
        for _ in 0..count {
            let hash_code = u32::from_le_bytes(fixed(&data[pos..pos + 4]));
            let value = i64::from_le_bytes(fixed(&data[pos + 4..pos + 12]));
            let key_len = u32::from_le_bytes(fixed(&data[pos + 12..pos + 16])) as usize;
            pos += ENTRY_HEADER_SIZE;
            bucket.entries.push(BucketEntry {
                hash_code,
                value,
                key: Bytes::copy_from_slice(&data[pos..pos + key_len]),
            });
            pos += key_len;
        }
        Ok(bucket)
    }
}

/// Copy a slice whose length was already checked into an array
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn truncated(len: usize) -> VirtDbError {
    VirtDbError::Serialization(format!("bucket truncated at {} bytes", len))
}
