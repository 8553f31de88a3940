//! Key and value encodings
//!
//! Every key and value type stored by a data source implements [`Serializable`].
//! Types declare either an exact byte length or that they are variable length;
//! variable-length parts get a length prefix from the record serializer.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, VirtDbError};

/// Declared on-disk size of a key or value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializedSize {
    /// Always exactly this many bytes
    Fixed(usize),
    /// Self-delimited by a length prefix
    Variable,
}

impl SerializedSize {
    pub const fn is_variable(&self) -> bool {
        matches!(self, SerializedSize::Variable)
    }
}

/// A type with a versioned binary encoding
pub trait Serializable: Clone + fmt::Debug + Send + Sync + 'static {
    /// Exact size for fixed types, `Variable` otherwise
    const SERIALIZED_SIZE: SerializedSize;

    /// Upper bound of `serialized_len()` for any value of the type
    const MAX_SERIALIZED_LEN: usize;

    /// Current encoding version, stored in every data file's data version
    const VERSION: u16;

    /// Number of bytes `serialize` will append
    fn serialized_len(&self) -> usize;

    fn serialize(&self, buf: &mut BytesMut);

    /// Decode from exactly the bytes produced by `serialize`, written with
    /// encoding `version`
    fn deserialize(data: &[u8], version: u16) -> Result<Self>;
}

/// Types usable as leaf keys. Equality must agree with the serialized bytes.
pub trait VirtualKey: Serializable + PartialEq {}

impl<T: Serializable + PartialEq> VirtualKey for T {}

/// Types usable as leaf values
pub trait VirtualValue: Serializable {}

impl<T: Serializable> VirtualValue for T {}

/// Why `part` cannot be stored under its type's declared size, if it cannot
pub fn size_violation<T: Serializable>(part: &T, what: &str) -> Option<String> {
    let len = part.serialized_len();
    match T::SERIALIZED_SIZE {
        SerializedSize::Fixed(n) if n != len => Some(format!(
            "{} declares fixed size {} but serialized to {} bytes",
            what, n, len
        )),
        SerializedSize::Variable if len > T::MAX_SERIALIZED_LEN => Some(format!(
            "{} is {} bytes, maximum is {}",
            what,
            len,
            T::MAX_SERIALIZED_LEN
        )),
        _ => None,
    }
}

fn check_version(type_name: &str, version: u16, current: u16) -> Result<()> {
    if version > current {
        return Err(VirtDbError::Serialization(format!(
            "{} encoding version {} is newer than supported version {}",
            type_name, version, current
        )));
    }
    Ok(())
}

fn fixed_u64(type_name: &str, data: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| {
        VirtDbError::Serialization(format!(
            "{} expects 8 bytes, got {}",
            type_name,
            data.len()
        ))
    })?;
    Ok(u64::from_le_bytes(bytes))
}

// =============================================================================
// Long Keys
// =============================================================================

/// A numeric key that serializes to exactly 8 bytes.
///
/// Data sources keyed by `LongKey` run in long key mode: key to path lookups go
/// through a dense in-memory list instead of the half-disk hash map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LongKey(pub u64);

impl Serializable for LongKey {
    const SERIALIZED_SIZE: SerializedSize = SerializedSize::Fixed(8);
    const MAX_SERIALIZED_LEN: usize = 8;
    const VERSION: u16 = 1;

    fn serialized_len(&self) -> usize {
        8
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.0);
    }

    fn deserialize(data: &[u8], version: u16) -> Result<Self> {
        check_version("LongKey", version, Self::VERSION)?;
        fixed_u64("LongKey", data).map(LongKey)
    }
}

impl From<u64> for LongKey {
    fn from(value: u64) -> Self {
        LongKey(value)
    }
}

impl Serializable for u64 {
    const SERIALIZED_SIZE: SerializedSize = SerializedSize::Fixed(8);
    const MAX_SERIALIZED_LEN: usize = 8;
    const VERSION: u16 = 1;

    fn serialized_len(&self) -> usize {
        8
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self);
    }

    fn deserialize(data: &[u8], version: u16) -> Result<Self> {
        check_version("u64", version, Self::VERSION)?;
        fixed_u64("u64", data)
    }
}

// =============================================================================
// Variable Length Types
// =============================================================================

/// Longest string accepted as a key or value
pub const MAX_STRING_LEN: usize = 1024;

/// Longest byte vector accepted as a key or value
pub const MAX_BYTES_LEN: usize = 64 * 1024;

impl Serializable for String {
    const SERIALIZED_SIZE: SerializedSize = SerializedSize::Variable;
    const MAX_SERIALIZED_LEN: usize = MAX_STRING_LEN;
    const VERSION: u16 = 1;

    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_slice(self.as_bytes());
    }

    fn deserialize(data: &[u8], version: u16) -> Result<Self> {
        check_version("String", version, Self::VERSION)?;
        String::from_utf8(data.to_vec())
            .map_err(|e| VirtDbError::Serialization(format!("invalid UTF-8 string: {}", e)))
    }
}

impl Serializable for Vec<u8> {
    const SERIALIZED_SIZE: SerializedSize = SerializedSize::Variable;
    const MAX_SERIALIZED_LEN: usize = MAX_BYTES_LEN;
    const VERSION: u16 = 1;

    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }

    fn deserialize(data: &[u8], version: u16) -> Result<Self> {
        check_version("Vec<u8>", version, Self::VERSION)?;
        Ok(data.to_vec())
    }
}

/// Serialize a value into a fresh buffer
pub fn to_bytes<T: Serializable>(value: &T) -> BytesMut {
    let mut buf = BytesMut::with_capacity(value.serialized_len());
    value.serialize(&mut buf);
    buf
}

/// The long key of a type in long key mode: its 8 serialized bytes read as a
/// little-endian integer. `None` for types that are not exactly 8 bytes.
pub fn long_key_of<K: Serializable>(key: &K) -> Option<u64> {
    if K::SERIALIZED_SIZE != SerializedSize::Fixed(8) {
        return None;
    }
    let buf = to_bytes(key);
    let bytes: [u8; 8] = buf.as_ref().try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Whether keys of this type are addressed in long key mode
pub const fn is_long_key_type<K: Serializable>() -> bool {
    matches!(K::SERIALIZED_SIZE, SerializedSize::Fixed(8))
}
