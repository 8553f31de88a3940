//! Internal record encoding

use bytes::{BufMut, BytesMut};

use crate::error::{Result, VirtDbError};
use crate::hash::{Hash, HASH_SIZE};
use crate::records::InternalRecord;

use super::{DataItemHeader, DataItemSerializer, DataVersion};

/// Size of every serialized internal record
pub const INTERNAL_RECORD_SIZE: usize = 8 + HASH_SIZE;

const HASH_VERSION: u16 = 1;

/// Serializer for `path -> hash` records of the disk hash store
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalRecordSerializer;

impl DataItemSerializer for InternalRecordSerializer {
    type Item = InternalRecord;

    fn data_version(&self) -> u64 {
        DataVersion::new(HASH_VERSION, 0, 0).pack()
    }

    fn read_header(&self, data: &[u8]) -> Result<DataItemHeader> {
        if data.len() < INTERNAL_RECORD_SIZE {
            return Err(VirtDbError::Serialization(format!(
                "internal record needs {} bytes, got {}",
                INTERNAL_RECORD_SIZE,
                data.len()
            )));
        }
        let mut path = [0u8; 8];
        path.copy_from_slice(&data[..8]);
        Ok(DataItemHeader {
            size_bytes: INTERNAL_RECORD_SIZE,
            key: u64::from_le_bytes(path),
        })
    }

    fn serialize(&self, item: &InternalRecord, buf: &mut BytesMut) -> Result<()> {
        if item.path < 0 {
            return Err(VirtDbError::IllegalArgument(format!(
                "cannot serialize internal record with path {}",
                item.path
            )));
        }
        buf.reserve(INTERNAL_RECORD_SIZE);
        buf.put_u64_le(item.path as u64);
        buf.put_slice(item.hash.as_bytes());
        Ok(())
    }

    fn deserialize(&self, data: &[u8], _data_version: u64) -> Result<InternalRecord> {
        let header = self.read_header(data)?;
        let hash = Hash::from_slice(&data[8..INTERNAL_RECORD_SIZE])?;
        Ok(InternalRecord::new(header.key as i64, hash))
    }
}
