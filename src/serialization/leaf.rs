//! Leaf record encoding

use std::marker::PhantomData;
use std::ops::Range;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, VirtDbError};
use crate::hash::{Hash, HASH_SIZE};
use crate::records::LeafRecord;

use super::{
    size_violation, DataItemHeader, DataItemSerializer, DataVersion, Serializable, SerializedSize,
    VirtualKey, VirtualValue,
};

const HASH_VERSION: u16 = 1;
const PREFIX_SIZE: usize = 8 + HASH_SIZE;

/// Serializer for `path -> (hash, key, value)` records
pub struct LeafRecordSerializer<K, V> {
    size_field_bytes: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: VirtualKey, V: VirtualValue> LeafRecordSerializer<K, V> {
    pub fn new() -> Self {
        let max_record = K::MAX_SERIALIZED_LEN + HASH_SIZE + V::MAX_SERIALIZED_LEN;
        let size_field_bytes = if max_record <= u8::MAX as usize { 1 } else { 4 };
        Self {
            size_field_bytes,
            _marker: PhantomData,
        }
    }

    /// Width of each length prefix: 1 or 4 bytes
    pub fn size_field_bytes(&self) -> usize {
        self.size_field_bytes
    }

    /// Record size when both key and value are fixed size
    pub fn fixed_record_size(&self) -> Option<usize> {
        match (K::SERIALIZED_SIZE, V::SERIALIZED_SIZE) {
            (SerializedSize::Fixed(k), SerializedSize::Fixed(v)) => Some(PREFIX_SIZE + k + v),
            _ => None,
        }
    }

    fn write_part<T: Serializable>(&self, part: &T, what: &str, buf: &mut BytesMut) -> Result<()> {
        if let Some(problem) = size_violation(part, what) {
            return Err(VirtDbError::Serialization(problem));
        }
        let len = part.serialized_len();
        if T::SERIALIZED_SIZE.is_variable() {
            if self.size_field_bytes == 1 {
                buf.put_u8(len as u8);
            } else {
                buf.put_u32_le(len as u32);
            }
        }
        let before = buf.len();
        part.serialize(buf);
        let written = buf.len() - before;
        if written != len {
            return Err(VirtDbError::Serialization(format!(
                "{} reported {} bytes but wrote {}",
                what, len, written
            )));
        }
        Ok(())
    }

    fn read_part(&self, size: SerializedSize, data: &[u8], pos: &mut usize) -> Result<Range<usize>> {
        let len = match size {
            SerializedSize::Fixed(n) => n,
            SerializedSize::Variable => {
                let width = self.size_field_bytes;
                let field = data.get(*pos..*pos + width).ok_or_else(|| truncated(data.len()))?;
                *pos += width;
                if width == 1 {
                    field[0] as usize
                } else {
                    let mut len = [0u8; 4];
                    len.copy_from_slice(field);
                    u32::from_le_bytes(len) as usize
                }
            }
        };
        let start = *pos;
        let end = start + len;
        if end > data.len() {
            return Err(truncated(data.len()));
        }
        *pos = end;
        Ok(start..end)
    }

    /// Byte ranges of the key and value inside a serialized record
    fn layout(&self, data: &[u8]) -> Result<(Range<usize>, Range<usize>)> {
        if data.len() < PREFIX_SIZE {
            return Err(truncated(data.len()));
        }
        let mut pos = PREFIX_SIZE;
        let key = self.read_part(K::SERIALIZED_SIZE, data, &mut pos)?;
        let value = self.read_part(V::SERIALIZED_SIZE, data, &mut pos)?;
        Ok((key, value))
    }
}

fn truncated(len: usize) -> VirtDbError {
    VirtDbError::Serialization(format!("leaf record truncated at {} bytes", len))
}

impl<K: VirtualKey, V: VirtualValue> Default for LeafRecordSerializer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: VirtualKey, V: VirtualValue> DataItemSerializer for LeafRecordSerializer<K, V> {
    type Item = LeafRecord<K, V>;

    fn data_version(&self) -> u64 {
        DataVersion::new(HASH_VERSION, K::VERSION, V::VERSION).pack()
    }

    fn read_header(&self, data: &[u8]) -> Result<DataItemHeader> {
        let (_, value) = self.layout(data)?;
        let mut path = [0u8; 8];
        path.copy_from_slice(&data[..8]);
        Ok(DataItemHeader {
            size_bytes: value.end,
            key: u64::from_le_bytes(path),
        })
    }

    fn serialize(&self, item: &LeafRecord<K, V>, buf: &mut BytesMut) -> Result<()> {
        if item.path < 0 {
            return Err(VirtDbError::IllegalArgument(format!(
                "cannot serialize leaf record with path {}",
                item.path
            )));
        }
        buf.reserve(PREFIX_SIZE + item.key.serialized_len() + item.value.serialized_len() + 8);
        buf.put_u64_le(item.path as u64);
        buf.put_slice(item.hash.as_bytes());
        self.write_part(&item.key, "key", buf)?;
        self.write_part(&item.value, "value", buf)
    }

    fn deserialize(&self, data: &[u8], data_version: u64) -> Result<LeafRecord<K, V>> {
        let version = DataVersion::unpack(data_version);
        let (key_range, value_range) = self.layout(data)?;
        let mut path = [0u8; 8];
        path.copy_from_slice(&data[..8]);
        let hash = Hash::from_slice(&data[8..PREFIX_SIZE])?;
        let key = K::deserialize(&data[key_range], version.key)?;
        let value = V::deserialize(&data[value_range], version.value)?;
        Ok(LeafRecord::new(u64::from_le_bytes(path) as i64, hash, key, value))
    }
}
