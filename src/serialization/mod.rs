//! Serialization Layer
//!
//! Binary encodings for keys, values and the records stored in data files.
//!
//! ## Leaf Record Layout
//! ```text
//! ┌──────────┬──────────┬─────────┬─────┬───────────┬───────┐
//! │ path u64 │ hash (48)│ key len?│ key │ value len?│ value │
//! └──────────┴──────────┴─────────┴─────┴───────────┴───────┘
//! ```
//! Length fields are present only for variable-size parts. They are 1 byte
//! wide when the largest possible key + hash + value fits in 255 bytes,
//! 4 bytes otherwise.
//!
//! ## Internal Record Layout
//! ```text
//! ┌──────────┬──────────┐
//! │ path u64 │ hash (48)│
//! └──────────┴──────────┘
//! ```

mod codec;
mod internal;
mod leaf;
mod version;

use bytes::BytesMut;

use crate::error::Result;

pub use codec::{
    is_long_key_type, long_key_of, size_violation, to_bytes, LongKey, Serializable, SerializedSize,
    VirtualKey, VirtualValue, MAX_BYTES_LEN, MAX_STRING_LEN,
};
pub use internal::{InternalRecordSerializer, INTERNAL_RECORD_SIZE};
pub use leaf::LeafRecordSerializer;
pub use version::DataVersion;

/// What a data file store needs to know about an item without decoding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItemHeader {
    /// Total serialized size of the item in bytes
    pub size_bytes: usize,
    /// The item's index key (path, long key or bucket index)
    pub key: u64,
}

/// Converts the items of one store to and from their on-disk bytes
pub trait DataItemSerializer: Send + Sync + 'static {
    type Item: Send;

    /// Packed version of the encoding this serializer writes
    fn data_version(&self) -> u64;

    /// Peek at the size and index key of a serialized item
    fn read_header(&self, data: &[u8]) -> Result<DataItemHeader>;

    fn serialize(&self, item: &Self::Item, buf: &mut BytesMut) -> Result<()>;

    /// Decode an item written with encoding `data_version`
    fn deserialize(&self, data: &[u8], data_version: u64) -> Result<Self::Item>;

    /// Re-encode item bytes written with `data_version` into the current
    /// encoding. Used by merge when copying items out of older files.
    fn reserialize(&self, data: &[u8], data_version: u64, buf: &mut BytesMut) -> Result<()> {
        if data_version == self.data_version() {
            buf.extend_from_slice(data);
            return Ok(());
        }
        let item = self.deserialize(data, data_version)?;
        self.serialize(&item, buf)
    }
}
