//! Append-Only Data File Store
//!
//! Immutable, sequentially written data files plus the machinery to read,
//! replay, snapshot and merge them.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (56 bytes)                                            │
//! │   Magic: "VDBF" (4) | Version: u16 (2) | Reserved (2)        │
//! │   FileIndex: u32 (4) | CreationMs: u64 (8)                   │
//! │   DataVersion: u64 (8) | ItemCount: u64 (8)                  │
//! │   MinKey: u64 (8) | MaxKey: u64 (8)                          │
//! │   Completed: u8 (1) | Padding (3)                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Items (variable)                                             │
//! │   [Len: u32][CRC32: u32][Item bytes]                         │
//! │   ... repeated ItemCount times ...                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header is written as a placeholder when a file is created and
//! patched when the file is sealed. A file whose Completed flag is still 0
//! was never sealed and is discarded on open.

mod collection;
mod filter;
mod iterator;
pub mod location;
mod reader;
mod store;
mod writer;

use std::path::{Path, PathBuf};

use crate::error::{Result, VirtDbError};

pub use collection::DataFileCollection;
pub use filter::MergeFilter;
pub use iterator::DataFileIterator;
pub use location::{data_location, NON_EXISTENT_DATA_LOCATION};
pub use reader::DataFileReader;
pub use store::{DiskKeyValueStore, PendingBatch};

// =============================================================================
// Shared Constants (used by writer, reader, iterator)
// =============================================================================

/// Magic bytes identifying a data file
pub(crate) const MAGIC: &[u8; 4] = b"VDBF";

/// Current data file format version
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Fixed header size at the start of every data file
pub(crate) const HEADER_SIZE: u64 = 56;

/// Per-item frame header: Len (4) + CRC32 (4)
pub(crate) const FRAME_HEADER_SIZE: u64 = 8;

/// Data file extension
pub(crate) const DATA_FILE_EXTENSION: &str = "vdf";

/// Attempts made by index-driven reads racing with a merge
pub const READ_RETRIES: usize = 5;

// =============================================================================
// Data File Metadata
// =============================================================================

/// Contents of a data file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileMetadata {
    pub index: u32,
    /// Milliseconds since the epoch, strictly increasing within a collection
    /// for newly written files. Merge output inherits the newest source's time.
    pub creation_ms: u64,
    pub data_version: u64,
    pub item_count: u64,
    pub min_key: u64,
    pub max_key: u64,
    pub completed: bool,
}

impl DataFileMetadata {
    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&self.index.to_le_bytes());
        header[12..20].copy_from_slice(&self.creation_ms.to_le_bytes());
        header[20..28].copy_from_slice(&self.data_version.to_le_bytes());
        header[28..36].copy_from_slice(&self.item_count.to_le_bytes());
        header[36..44].copy_from_slice(&self.min_key.to_le_bytes());
        header[44..52].copy_from_slice(&self.max_key.to_le_bytes());
        header[52] = self.completed as u8;
        header
    }

    pub(crate) fn decode(header: &[u8; HEADER_SIZE as usize], path: &Path) -> Result<Self> {
        if &header[0..4] != MAGIC {
            return Err(VirtDbError::Corruption(format!(
                "invalid data file magic in {}: {:?}",
                path.display(),
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(VirtDbError::Corruption(format!(
                "unsupported data file version {} in {}",
                version,
                path.display()
            )));
        }
        let u64_at = |start: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&header[start..start + 8]);
            u64::from_le_bytes(buf)
        };
        Ok(Self {
            index: u32::from_le_bytes([header[8], header[9], header[10], header[11]]),
            creation_ms: u64_at(12),
            data_version: u64_at(20),
            item_count: u64_at(28),
            min_key: u64_at(36),
            max_key: u64_at(44),
            completed: header[52] == 1,
        })
    }
}

// =============================================================================
// Merge Statistics
// =============================================================================

/// Outcome of merging one or more stores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Source files consumed
    pub files_merged: usize,
    /// Output files written
    pub files_created: usize,
    /// Live items copied into output files
    pub items_copied: u64,
    /// Copied items whose index entry was moved to the new location. The rest
    /// were superseded by a concurrent write while the merge ran.
    pub items_relocated: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl MergeStats {
    pub fn absorb(&mut self, other: &MergeStats) {
        self.files_merged += other.files_merged;
        self.files_created += other.files_created;
        self.items_copied += other.items_copied;
        self.items_relocated += other.items_relocated;
        self.bytes_before += other.bytes_before;
        self.bytes_after += other.bytes_after;
    }
}

// =============================================================================
// File Naming
// =============================================================================

/// "{dir}/leaves_000042.vdf"
pub(crate) fn data_file_path(dir: &Path, store_name: &str, index: u32) -> PathBuf {
    dir.join(format!("{}_{:06}.{}", store_name, index, DATA_FILE_EXTENSION))
}

/// "leaves_000042.vdf" → Some(42)
pub(crate) fn parse_data_file_index(path: &Path, store_name: &str) -> Option<u32> {
    if path.extension()?.to_str()? != DATA_FILE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let index = stem.strip_prefix(store_name)?.strip_prefix('_')?;
    index.parse().ok()
}
